//! Emergency classification.
//!
//! The classifier asks the model for a `(category, confidence)` pair over
//! the conversation so far. The mapping from model output to a routing
//! decision is a pure function of the label, the confidence, and the
//! configured threshold — no hidden randomness — so it is fully
//! deterministic under a stubbed gateway.

use std::sync::Arc;

use tracing::debug;

use crate::domain::Category;
use crate::gateway::{
    complete_with_retry, ChatTurn, ContractField, FieldKind, GatewayError, LanguageGateway,
    ResponseContract, RetryPolicy,
};

const TRIAGE_INSTRUCTION: &str = "You are an emergency triage assistant. \
Classify the citizen's report into exactly one category: medical (injuries, \
illnesses, ambulance needs), police (crimes, theft, violence), electricity \
(outages, electrical hazards), or fire (fires and fire hazards). Estimate \
your confidence between 0 and 1.";

/// The classifier's routing decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// None when confidence stayed below the threshold ("unclear")
    pub category: Option<Category>,

    /// The model's best guess regardless of confidence, used as the
    /// fallback after the one-shot clarifying menu
    pub best_guess: Category,

    pub confidence: f64,
}

/// Maps citizen text to an emergency category.
pub struct Classifier {
    gateway: Arc<dyn LanguageGateway>,
    retry: RetryPolicy,
    threshold: f64,
}

impl Classifier {
    pub fn new(gateway: Arc<dyn LanguageGateway>, retry: RetryPolicy, threshold: f64) -> Self {
        Self {
            gateway,
            retry,
            threshold,
        }
    }

    fn contract() -> ResponseContract {
        ResponseContract::new(
            "triage",
            vec![
                ContractField::required(
                    "category",
                    FieldKind::Text,
                    "one of: medical, police, electricity, fire",
                ),
                ContractField::required(
                    "confidence",
                    FieldKind::Number,
                    "confidence in the classification, 0 to 1",
                ),
            ],
        )
    }

    /// Classify the conversation so far. Prior turns are included so a
    /// citizen re-describing their emergency refines the decision.
    pub async fn classify(&self, history: &[ChatTurn]) -> Result<Classification, GatewayError> {
        let mut turns = vec![ChatTurn::system(TRIAGE_INSTRUCTION)];
        turns.extend_from_slice(history);

        let contract = Self::contract();
        let reply = complete_with_retry(&*self.gateway, &turns, Some(&contract), &self.retry)
            .await?;
        let object = reply.as_structured()?;

        let label = object
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let confidence = object
            .get("confidence")
            .and_then(value_as_f64)
            .unwrap_or(0.0);

        let decision = resolve(label, confidence, self.threshold)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        debug!(
            label,
            confidence,
            routed = ?decision.category,
            "classified utterance"
        );
        Ok(decision)
    }
}

fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Pure mapping from gateway output to a routing decision.
///
/// Confidence below the threshold routes to unclear (`category = None`)
/// while keeping the best guess for the post-menu fallback. Confidence is
/// clamped to [0, 1] before comparison.
pub fn resolve(
    label: &str,
    confidence: f64,
    threshold: f64,
) -> Result<Classification, crate::domain::UnknownCategory> {
    let best_guess: Category = label.parse()?;
    let confidence = confidence.clamp(0.0, 1.0);
    let category = if confidence >= threshold {
        Some(best_guess)
    } else {
        None
    };
    Ok(Classification {
        category,
        best_guess,
        confidence,
    })
}
