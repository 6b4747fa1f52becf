//! In-memory store for tests and ephemeral runs.
//!
//! Case mutation holds a single mutex across the compare-and-swap so racing
//! writers serialize; readers only contend for the instant of commit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::domain::{Case, CaseStatus, Category, ConversationSession, NotificationEvent};
use crate::followup::FollowupTicket;

use super::{CaseStore, EventStore, FollowupStore, SessionStore, StoreError};

/// One store implementing every collaborator trait.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, ConversationSession>>,
    cases: Mutex<HashMap<Uuid, Case>>,
    events: RwLock<HashMap<String, NotificationEvent>>,
    tickets: RwLock<HashMap<Uuid, FollowupTicket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn put_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn insert_case(&self, case: &Case) -> Result<(), StoreError> {
        self.cases.lock().await.insert(case.case_id, case.clone());
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        Ok(self.cases.lock().await.get(&id).cloned())
    }

    async fn compare_and_update(
        &self,
        expected: CaseStatus,
        case: &Case,
    ) -> Result<(), StoreError> {
        let mut cases = self.cases.lock().await;
        let current = cases
            .get(&case.case_id)
            .ok_or_else(|| StoreError::NotFound(case.case_id.to_string()))?;
        if current.status != expected {
            return Err(StoreError::Conflict(case.case_id));
        }
        cases.insert(case.case_id, case.clone());
        Ok(())
    }

    async fn list_cases(
        &self,
        category: Option<Category>,
        status: Option<CaseStatus>,
    ) -> Result<Vec<Case>, StoreError> {
        let cases = self.cases.lock().await;
        let mut matched: Vec<Case> = cases
            .values()
            .filter(|c| category.map_or(true, |cat| c.category == cat))
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn find_recent_fingerprint(
        &self,
        citizen_ref: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let cases = self.cases.lock().await;
        Ok(cases
            .values()
            .filter(|c| {
                c.citizen_ref == citizen_ref
                    && c.fingerprint == fingerprint
                    && c.created_at >= since
            })
            .max_by_key(|c| c.created_at)
            .map(|c| c.case_id))
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get_event(&self, event_id: &str) -> Result<Option<NotificationEvent>, StoreError> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn put_event(&self, event: &NotificationEvent) -> Result<(), StoreError> {
        self.events
            .write()
            .await
            .insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn undelivered_events(&self) -> Result<Vec<NotificationEvent>, StoreError> {
        let events = self.events.read().await;
        let mut pending: Vec<NotificationEvent> =
            events.values().filter(|e| !e.delivered).cloned().collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}

#[async_trait]
impl FollowupStore for MemoryStore {
    async fn put_ticket(&self, ticket: &FollowupTicket) -> Result<(), StoreError> {
        self.tickets
            .write()
            .await
            .insert(ticket.case_id, ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, case_id: Uuid) -> Result<Option<FollowupTicket>, StoreError> {
        Ok(self.tickets.read().await.get(&case_id).cloned())
    }

    async fn remove_ticket(&self, case_id: Uuid) -> Result<(), StoreError> {
        self.tickets.write().await.remove(&case_id);
        Ok(())
    }

    async fn open_tickets(&self) -> Result<Vec<FollowupTicket>, StoreError> {
        let tickets = self.tickets.read().await;
        let mut open: Vec<FollowupTicket> = tickets.values().cloned().collect();
        open.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(open)
    }
}
