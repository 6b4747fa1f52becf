//! Persistence collaborator.
//!
//! All lifecycle operations go through these handles; there is no ambient
//! shared state, which keeps every component testable with in-memory
//! doubles. The contract mirrors what the engine needs and nothing more:
//! atomic create/read/compare-and-swap for cases, create/read/overwrite for
//! sessions (the session itself is append-only at the domain level), and
//! keyed upserts for notification events and follow-up tickets.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Case, CaseStatus, Category, ConversationSession, NotificationEvent};
use crate::followup::FollowupTicket;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage faults, kept separate from domain errors so the lifecycle layer
/// can map conflicts onto its own taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// Compare-and-swap lost the race: current status differed from expected
    #[error("case {0} was modified concurrently")]
    Conflict(Uuid),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(format!("serialization: {e}"))
    }
}

/// Conversation sessions: owned exclusively by their dialogue, so a plain
/// overwrite is sufficient — no cross-actor locking.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError>;

    /// Persist the session after a turn. The engine re-reads and discards
    /// writes against archived sessions before calling this.
    async fn put_session(&self, session: &ConversationSession) -> Result<(), StoreError>;
}

/// Case records: the only cross-actor shared mutable resource.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn insert_case(&self, case: &Case) -> Result<(), StoreError>;

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError>;

    /// Atomically replace the record iff its current status equals
    /// `expected`. Returns `Conflict` when a racer got there first.
    async fn compare_and_update(
        &self,
        expected: CaseStatus,
        case: &Case,
    ) -> Result<(), StoreError>;

    async fn list_cases(
        &self,
        category: Option<Category>,
        status: Option<CaseStatus>,
    ) -> Result<Vec<Case>, StoreError>;

    /// Most recent case from this citizen with this fingerprint created at
    /// or after `since`, for the duplicate-submission window.
    async fn find_recent_fingerprint(
        &self,
        citizen_ref: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError>;
}

/// Notification events, keyed by their deterministic event id.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Option<NotificationEvent>, StoreError>;

    async fn put_event(&self, event: &NotificationEvent) -> Result<(), StoreError>;

    /// Events still awaiting a confirmed send, for the retry sweep.
    async fn undelivered_events(&self) -> Result<Vec<NotificationEvent>, StoreError>;
}

/// Follow-up confirmation tickets, one per case at most.
#[async_trait]
pub trait FollowupStore: Send + Sync {
    async fn put_ticket(&self, ticket: &FollowupTicket) -> Result<(), StoreError>;

    async fn get_ticket(&self, case_id: Uuid) -> Result<Option<FollowupTicket>, StoreError>;

    async fn remove_ticket(&self, case_id: Uuid) -> Result<(), StoreError>;

    async fn open_tickets(&self) -> Result<Vec<FollowupTicket>, StoreError>;
}
