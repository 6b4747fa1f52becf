//! Notification events and deterministic event ids.
//!
//! An event id is a pure function of its case, the lifecycle moment that
//! produced it, and the recipient class, so replaying a transition produces
//! the same id and the dispatcher can deduplicate delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::Transition;

/// Who a notification is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientClass {
    Citizen,
    Authority,
}

impl std::fmt::Display for RecipientClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientClass::Citizen => f.write_str("citizen"),
            RecipientClass::Authority => f.write_str("authority"),
        }
    }
}

/// The lifecycle moment a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A status transition (including the initial `new->open`)
    Transition(Transition),

    /// Follow-up: ask the citizen to confirm resolution
    ConfirmationRequest,

    /// Follow-up: the single reminder after the confirmation window lapses
    ConfirmationReminder,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Transition(t) => write!(f, "{t}"),
            EventKind::ConfirmationRequest => f.write_str("confirm-request"),
            EventKind::ConfirmationReminder => f.write_str("confirm-reminder"),
        }
    }
}

/// What the channel collaborator actually delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

/// A single notification, persisted so delivery survives process restarts
/// and the retry sweep can pick up failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Deduplication key; see [`event_id`]
    pub event_id: String,

    pub case_id: Uuid,
    pub recipient_class: RecipientClass,

    /// Concrete delivery address (citizen ref or authority queue)
    pub recipient_ref: String,

    pub payload: NotificationPayload,

    /// Set only on a confirmed send
    pub delivered: bool,

    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        event_id: String,
        case_id: Uuid,
        recipient_class: RecipientClass,
        recipient_ref: String,
        payload: NotificationPayload,
    ) -> Self {
        Self {
            event_id,
            case_id,
            recipient_class,
            recipient_ref,
            payload,
            delivered: false,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Deterministic event id: `{case_id}:{seq}:{kind}:{recipient}` digested to
/// 16 hex chars. `seq` is the case's history sequence number at the moment
/// of the event, which keeps a second reopen from colliding with the first.
pub fn event_id(case_id: Uuid, seq: usize, kind: EventKind, recipient: RecipientClass) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{case_id}:{seq}:{kind}:{recipient}").as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
