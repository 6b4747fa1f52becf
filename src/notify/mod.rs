//! Lifecycle notification dispatch.
//!
//! Delivery discipline is at-least-once with idempotent replay: event ids
//! are deterministic, a delivered event is never sent again, and a failed
//! send leaves the event undelivered for a later retry sweep. Duplicate
//! delivery is acceptable; lost delivery is not.

pub mod webhook;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    event_id, Case, CaseStatus, EventKind, NotificationEvent, NotificationPayload,
    RecipientClass,
};
use crate::store::EventStore;

pub use webhook::WebhookChannel;

/// External delivery collaborator (email/SMS/push). Any error is treated as
/// a delivery failure.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Attempt one delivery; `Ok(true)` is a confirmed send.
    async fn send(
        &self,
        recipient_class: RecipientClass,
        recipient_ref: &str,
        payload: &NotificationPayload,
    ) -> Result<bool>;
}

/// A channel that prints to stdout, for local operation and demos.
pub struct ConsoleChannel;

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(
        &self,
        recipient_class: RecipientClass,
        recipient_ref: &str,
        payload: &NotificationPayload,
    ) -> Result<bool> {
        println!(
            "[notify {recipient_class}] to {recipient_ref}: {} — {}",
            payload.title, payload.body
        );
        Ok(true)
    }
}

/// Fans lifecycle events out to interested parties.
pub struct Dispatcher {
    events: Arc<dyn EventStore>,
    channel: Arc<dyn NotificationChannel>,
}

impl Dispatcher {
    pub fn new(events: Arc<dyn EventStore>, channel: Arc<dyn NotificationChannel>) -> Self {
        Self { events, channel }
    }

    /// Notify one recipient class about a lifecycle moment.
    ///
    /// Returns whether the event is delivered after this call. Replaying the
    /// same `(case, kind, recipient)` after a confirmed send is a no-op; a
    /// channel failure records the attempt and leaves the event for the
    /// sweep.
    #[instrument(skip(self, case, kind, recipient), fields(case_id = %case.case_id, kind = %kind, recipient = %recipient))]
    pub async fn notify(
        &self,
        case: &Case,
        kind: EventKind,
        recipient: RecipientClass,
    ) -> Result<bool> {
        let id = event_id(case.case_id, case.history_seq(), kind, recipient);

        let mut event = match self.events.get_event(&id).await? {
            Some(existing) if existing.delivered => {
                debug!(event_id = %id, "already delivered, skipping");
                return Ok(true);
            }
            Some(existing) => existing,
            None => NotificationEvent::new(
                id.clone(),
                case.case_id,
                recipient,
                recipient_ref_for(case, recipient),
                payload_for(case, kind, recipient),
            ),
        };

        self.attempt(&mut event).await?;
        Ok(event.delivered)
    }

    /// Re-attempt every undelivered event. Returns how many were delivered.
    #[instrument(skip(self))]
    pub async fn retry_sweep(&self) -> Result<usize> {
        let pending = self.events.undelivered_events().await?;
        let mut delivered = 0usize;
        for mut event in pending {
            self.attempt(&mut event).await?;
            if event.delivered {
                delivered += 1;
            }
        }
        info!(delivered, "retry sweep finished");
        Ok(delivered)
    }

    async fn attempt(&self, event: &mut NotificationEvent) -> Result<()> {
        event.attempts += 1;
        let outcome = self
            .channel
            .send(event.recipient_class, &event.recipient_ref, &event.payload)
            .await;

        match outcome {
            Ok(true) => {
                event.delivered = true;
                info!(event_id = %event.event_id, attempts = event.attempts, "delivered");
            }
            Ok(false) => {
                warn!(event_id = %event.event_id, "channel declined delivery");
            }
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "delivery failed");
            }
        }

        // Persist either way so the sweep sees attempts and failures.
        self.events.put_event(event).await?;
        Ok(())
    }
}

/// Concrete delivery address for a recipient class on this case.
pub fn recipient_ref_for(case: &Case, recipient: RecipientClass) -> String {
    match recipient {
        RecipientClass::Citizen => case.citizen_ref.clone(),
        RecipientClass::Authority => case
            .assigned_authority_ref
            .clone()
            .unwrap_or_else(|| case.category.authority_queue()),
    }
}

/// Human-readable payload for a lifecycle moment.
pub fn payload_for(case: &Case, kind: EventKind, recipient: RecipientClass) -> NotificationPayload {
    let category = case.category;
    let short_id = &case.case_id.to_string()[..8];

    let (title, body) = match (kind, recipient) {
        (EventKind::Transition(t), RecipientClass::Authority) if t.from.is_none() => (
            format!("New {category} case"),
            format!(
                "A new {category} emergency case ({short_id}) has been reported and is awaiting assignment."
            ),
        ),
        (EventKind::Transition(t), RecipientClass::Authority)
            if t.from == Some(CaseStatus::Assigned) && t.to == CaseStatus::Open =>
        (
            format!("{category} case reopened"),
            format!(
                "The citizen reported that case {short_id} is not resolved. It has been reopened and needs attention."
            ),
        ),
        (EventKind::Transition(t), RecipientClass::Citizen) if t.to == CaseStatus::Assigned => (
            "Case assigned".to_string(),
            format!(
                "Your {category} emergency case ({short_id}) has been assigned to the responsible authority and is now in progress."
            ),
        ),
        (EventKind::Transition(t), RecipientClass::Citizen) if t.to == CaseStatus::Resolved => (
            "Case resolved".to_string(),
            format!("Your {category} emergency case ({short_id}) has been marked resolved."),
        ),
        (EventKind::ConfirmationRequest, _) => (
            "Please confirm resolution".to_string(),
            format!(
                "The authority reports that work on your {category} case ({short_id}) is done. Please confirm whether your emergency is resolved."
            ),
        ),
        (EventKind::ConfirmationReminder, _) => (
            "Reminder: please confirm resolution".to_string(),
            format!(
                "We have not heard back about your {category} case ({short_id}). Please confirm whether it is resolved."
            ),
        ),
        (EventKind::Transition(t), _) => (
            format!("Case {}", t.to),
            format!("Case {short_id} is now {}.", t.to),
        ),
    };

    NotificationPayload { title, body }
}
