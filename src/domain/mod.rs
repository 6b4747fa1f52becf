//! Domain types for the intake and lifecycle engine.
//!
//! This module contains the core data structures:
//! - Category: the fixed emergency types
//! - ConversationSession: one citizen's in-progress interview
//! - Case: the durable, auditable record with its status machine
//! - NotificationEvent: idempotent lifecycle notifications

pub mod case;
pub mod category;
pub mod notification;
pub mod session;

// Re-export commonly used types
pub use case::{report_fingerprint, Actor, Case, CaseStatus, StatusEntry, Transition};
pub use category::{Category, UnknownCategory};
pub use notification::{
    event_id, EventKind, NotificationEvent, NotificationPayload, RecipientClass,
};
pub use session::{ConversationSession, Role, SessionStatus, Turn};
