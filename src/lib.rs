//! caseline - Emergency intake triage and case lifecycle
//!
//! Turns free-form emergency descriptions into validated structured case
//! records and tracks each case through assignment, notification, and
//! citizen-confirmed resolution.
//!
//! # Architecture
//!
//! The core is a conversation engine plus a case state machine:
//! - Raw text is classified into an emergency category
//! - A generic slot-filling interview collects the category's schema fields
//! - A completed report becomes a durable case with an append-only audit
//!   history; concurrent actors serialize through compare-and-swap updates
//! - Lifecycle events fan out through an idempotent notification dispatcher
//! - A follow-up resolver closes the loop with citizen-confirmed resolution
//!
//! # Modules
//!
//! - `gateway`: Language model boundary (contracts, retries, HTTP client)
//! - `triage`: Emergency classification with threshold fallback
//! - `dialogue`: Slot-filling interview engine
//! - `lifecycle`: Case manager and status state machine
//! - `notify`: At-least-once, deduplicated notification dispatch
//! - `followup`: Citizen-confirmed resolution and reopen
//! - `schema`: Data-driven per-category interview schemas
//! - `store`: Persistence collaborator (in-memory and SQLite)
//! - `domain`: Records (sessions, cases, notifications)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start an intake conversation
//! caseline chat --citizen alice@example.org
//!
//! # Authority queue
//! caseline cases --category fire --status open
//! caseline assign <case-id> station-12
//!
//! # Citizen-confirmed resolution
//! caseline done <case-id>
//! caseline confirm <case-id> "yes, all good now"
//! ```

pub mod cli;
pub mod config;
pub mod dialogue;
pub mod domain;
pub mod followup;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod schema;
pub mod store;
pub mod triage;

// Re-export main types at crate root for convenience
pub use dialogue::{DialogueEngine, DialogueSettings, TurnOutcome};
pub use domain::{
    Actor, Case, CaseStatus, Category, ConversationSession, EventKind, NotificationEvent,
    RecipientClass, SessionStatus, Transition,
};
pub use followup::{FollowupOutcome, FollowupResolver, FollowupTicket};
pub use gateway::{GatewayError, LanguageGateway, RetryPolicy};
pub use lifecycle::{CaseError, CaseManager};
pub use notify::{Dispatcher, NotificationChannel};
pub use schema::{EmergencySchema, FieldValidator, SchemaRegistry};
pub use store::{MemoryStore, SqliteStore};
pub use triage::Classifier;
