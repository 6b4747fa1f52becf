//! Language model boundary.
//!
//! The model is consumed as a stateless text-completion service: every call
//! carries the full conversation history and, optionally, a machine-readable
//! response contract describing the JSON object the caller expects back.
//! Transport failures and contract violations are both recoverable; callers
//! go through [`complete_with_retry`] which applies bounded exponential
//! backoff for the former and a single re-ask for the latter.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub use http::{HttpGateway, HttpGatewayConfig};

/// Role of one turn in the model-facing conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of model-facing history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// Expected JSON type of a contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            // Models sometimes quote numbers; accept parseable strings
            FieldKind::Number => {
                value.is_number()
                    || value
                        .as_str()
                        .map(|s| s.trim().parse::<f64>().is_ok())
                        .unwrap_or(false)
            }
            FieldKind::Boolean => value.is_boolean(),
        }
    }
}

/// One field the caller expects in the reply.
#[derive(Debug, Clone)]
pub struct ContractField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
}

impl ContractField {
    pub fn required(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

/// Machine-readable description of the JSON object a caller expects.
#[derive(Debug, Clone)]
pub struct ResponseContract {
    pub name: String,
    pub fields: Vec<ContractField>,
}

impl ResponseContract {
    pub fn new(name: &str, fields: Vec<ContractField>) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    /// Render the contract into instruction text for the model.
    pub fn instruction(&self) -> String {
        let mut lines = vec![
            "Respond with a single JSON object and nothing else.".to_string(),
            "Fields:".to_string(),
        ];
        for field in &self.fields {
            let kind = match field.kind {
                FieldKind::Text => "string",
                FieldKind::Number => "number",
                FieldKind::Boolean => "boolean",
            };
            let requirement = if field.required {
                "required"
            } else {
                "omit or null if unknown"
            };
            lines.push(format!(
                "- \"{}\" ({kind}, {requirement}): {}",
                field.name, field.description
            ));
        }
        lines.join("\n")
    }

    /// Parse and shape-check raw model output against this contract.
    ///
    /// Required fields must be present, non-null, and of the declared kind.
    /// Optional fields of the wrong kind are dropped rather than rejected;
    /// semantic validation happens downstream in the field validators.
    pub fn parse(&self, raw: &str) -> Result<Map<String, Value>, GatewayError> {
        let json = extract_json_object(raw).ok_or_else(|| {
            GatewayError::MalformedResponse(format!(
                "no JSON object found in reply for '{}'",
                self.name
            ))
        })?;

        let mut object: Map<String, Value> = serde_json::from_str(&json).map_err(|e| {
            GatewayError::MalformedResponse(format!("invalid JSON for '{}': {e}", self.name))
        })?;

        for field in &self.fields {
            match object.get(&field.name) {
                Some(value) if !value.is_null() => {
                    if !field.kind.matches(value) {
                        if field.required {
                            return Err(GatewayError::MalformedResponse(format!(
                                "field '{}' has the wrong type",
                                field.name
                            )));
                        }
                        object.remove(&field.name);
                    }
                }
                _ if field.required => {
                    return Err(GatewayError::MalformedResponse(format!(
                        "missing required field '{}'",
                        field.name
                    )));
                }
                _ => {}
            }
        }

        Ok(object)
    }
}

/// Pull the first JSON object out of a reply, tolerating code fences and
/// surrounding prose.
fn extract_json_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(raw[start..=end].to_string())
}

/// What a gateway call returns.
#[derive(Debug, Clone)]
pub enum GatewayReply {
    /// Parsed against the supplied contract
    Structured(Map<String, Value>),

    /// Free text (no contract supplied)
    Text(String),
}

impl GatewayReply {
    pub fn as_structured(&self) -> Result<&Map<String, Value>, GatewayError> {
        match self {
            GatewayReply::Structured(map) => Ok(map),
            GatewayReply::Text(_) => Err(GatewayError::MalformedResponse(
                "expected a structured reply".into(),
            )),
        }
    }
}

/// Gateway failure taxonomy. Both kinds are recoverable.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport or service failure, including timeouts
    #[error("language model unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The reply could not be parsed against the response contract
    #[error("language model reply violates contract: {0}")]
    MalformedResponse(String),
}

/// The stateless language model collaborator.
#[async_trait]
pub trait LanguageGateway: Send + Sync {
    /// Human-readable gateway name
    fn name(&self) -> &str;

    /// One completion over the full history. With a contract, the reply is
    /// parsed into a structured object; without one, free text is returned.
    async fn complete(
        &self,
        history: &[ChatTurn],
        contract: Option<&ResponseContract>,
    ) -> Result<GatewayReply, GatewayError>;
}

/// Retry policy for gateway calls: bounded attempts with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier applied after each retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }
        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Call the gateway with recovery applied: transport failures retry with
/// backoff up to the attempt cap; a contract violation gets exactly one
/// re-ask with a corrective nudge appended to the history.
pub async fn complete_with_retry(
    gateway: &dyn LanguageGateway,
    history: &[ChatTurn],
    contract: Option<&ResponseContract>,
    policy: &RetryPolicy,
) -> Result<GatewayReply, GatewayError> {
    let mut attempt = 0u32;
    let mut reasked = false;
    let mut turns: Vec<ChatTurn> = history.to_vec();

    loop {
        attempt += 1;
        match gateway.complete(&turns, contract).await {
            Ok(reply) => return Ok(reply),
            Err(GatewayError::UpstreamUnavailable(reason)) => {
                if !policy.should_retry(attempt) {
                    return Err(GatewayError::UpstreamUnavailable(reason));
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "gateway unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(GatewayError::MalformedResponse(reason)) => {
                if reasked {
                    return Err(GatewayError::MalformedResponse(reason));
                }
                reasked = true;
                warn!(%reason, "malformed gateway reply, re-asking once");
                turns.push(ChatTurn::user(
                    "Your previous reply did not match the required format. \
                     Reply again with only the JSON object.",
                ));
            }
        }
    }
}
