//! SQLite-backed store for durable operation.
//!
//! Records are stored as JSON documents with the columns the engine
//! queries by (status, category, fingerprint) denormalized for indexing.
//! The compare-and-swap is a single `UPDATE … WHERE id = ? AND status = ?`,
//! so racing writers serialize inside SQLite and exactly one wins.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::domain::{Case, CaseStatus, Category, ConversationSession, NotificationEvent};
use crate::followup::FollowupTicket;

use super::{CaseStore, EventStore, FollowupStore, SessionStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cases (
    id          TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    category    TEXT NOT NULL,
    citizen_ref TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    data        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cases_fingerprint
    ON cases (citizen_ref, fingerprint, created_at);
CREATE TABLE IF NOT EXISTS sessions (
    id     TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    data   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id        TEXT PRIMARY KEY,
    delivered INTEGER NOT NULL,
    data      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS followups (
    case_id TEXT PRIMARY KEY,
    data    TEXT NOT NULL
);
";

/// Durable store over a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-process database, useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".into()))
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        self.put_session(session).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ConversationSession>, StoreError> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn put_session(&self, session: &ConversationSession) -> Result<(), StoreError> {
        let data = serde_json::to_string(session)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, status, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET status = ?2, data = ?3",
            params![
                session.session_id.to_string(),
                serde_json::to_string(&session.status)?,
                data
            ],
        )
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl CaseStore for SqliteStore {
    async fn insert_case(&self, case: &Case) -> Result<(), StoreError> {
        let data = serde_json::to_string(case)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cases (id, status, category, citizen_ref, fingerprint, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                case.case_id.to_string(),
                case.status.as_str(),
                case.category.as_str(),
                case.citizen_ref,
                case.fingerprint,
                case.created_at.to_rfc3339(),
                data
            ],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<Case>, StoreError> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM cases WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn compare_and_update(
        &self,
        expected: CaseStatus,
        case: &Case,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_string(case)?;
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE cases SET status = ?1, data = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    case.status.as_str(),
                    data,
                    case.case_id.to_string(),
                    expected.as_str()
                ],
            )
            .map_err(backend)?;
        if updated == 1 {
            return Ok(());
        }

        // Distinguish a lost race from a missing record.
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM cases WHERE id = ?1",
                params![case.case_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        match exists {
            Some(_) => Err(StoreError::Conflict(case.case_id)),
            None => Err(StoreError::NotFound(case.case_id.to_string())),
        }
    }

    async fn list_cases(
        &self,
        category: Option<Category>,
        status: Option<CaseStatus>,
    ) -> Result<Vec<Case>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT data FROM cases
                 WHERE (?1 IS NULL OR category = ?1)
                   AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(
                params![
                    category.map(|c| c.as_str().to_string()),
                    status.map(|s| s.as_str().to_string())
                ],
                |row| row.get::<_, String>(0),
            )
            .map_err(backend)?;

        let mut cases = Vec::new();
        for row in rows {
            let data = row.map_err(backend)?;
            cases.push(serde_json::from_str(&data)?);
        }
        Ok(cases)
    }

    async fn find_recent_fingerprint(
        &self,
        citizen_ref: &str,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let conn = self.lock()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM cases
                 WHERE citizen_ref = ?1 AND fingerprint = ?2 AND created_at >= ?3
                 ORDER BY created_at DESC LIMIT 1",
                params![citizen_ref, fingerprint, since.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        id.map(|s| {
            Uuid::parse_str(&s).map_err(|e| StoreError::Backend(format!("bad case id: {e}")))
        })
        .transpose()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn get_event(&self, event_id: &str) -> Result<Option<NotificationEvent>, StoreError> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM events WHERE id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn put_event(&self, event: &NotificationEvent) -> Result<(), StoreError> {
        let data = serde_json::to_string(event)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (id, delivered, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET delivered = ?2, data = ?3",
            params![event.event_id, event.delivered as i64, data],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn undelivered_events(&self) -> Result<Vec<NotificationEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM events WHERE delivered = 0")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut events: Vec<NotificationEvent> = Vec::new();
        for row in rows {
            let data = row.map_err(backend)?;
            events.push(serde_json::from_str(&data)?);
        }
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }
}

#[async_trait]
impl FollowupStore for SqliteStore {
    async fn put_ticket(&self, ticket: &FollowupTicket) -> Result<(), StoreError> {
        let data = serde_json::to_string(ticket)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO followups (case_id, data) VALUES (?1, ?2)
             ON CONFLICT(case_id) DO UPDATE SET data = ?2",
            params![ticket.case_id.to_string(), data],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn get_ticket(&self, case_id: Uuid) -> Result<Option<FollowupTicket>, StoreError> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM followups WHERE case_id = ?1",
                params![case_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend)?;
        data.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    async fn remove_ticket(&self, case_id: Uuid) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM followups WHERE case_id = ?1",
            params![case_id.to_string()],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn open_tickets(&self) -> Result<Vec<FollowupTicket>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM followups")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut tickets: Vec<FollowupTicket> = Vec::new();
        for row in rows {
            let data = row.map_err(backend)?;
            tickets.push(serde_json::from_str(&data)?);
        }
        tickets.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(tickets)
    }
}
