//! Conversation session state.
//!
//! A session is one citizen's in-progress intake conversation. It is owned
//! exclusively by the dialogue engine: turns are appended in receipt order,
//! validated fields accumulate, and the session is archived the moment it
//! becomes a case or is abandoned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Category;
use crate::schema::{FieldMap, FieldValue};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Citizen,
    Assistant,
}

/// One entry in a session's append-only turn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Interview in progress
    Collecting,

    /// All required fields collected; a case has been created
    Complete,

    /// Ended without a case: inactivity, explicit exit, or stall
    Abandoned,
}

/// One citizen's in-progress intake conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: Uuid,

    /// Reference to the reporting citizen (delivery address / account id)
    pub citizen_ref: String,

    /// None until the classifier has routed the session
    pub category: Option<Category>,

    /// Append-only; never truncated or reordered
    pub turn_history: Vec<Turn>,

    /// Validated values only; keys are always a subset of the category schema
    pub collected_fields: FieldMap,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,

    /// Last turn receipt time, for the inactivity bound
    pub last_activity: DateTime<Utc>,

    /// Consecutive turns that yielded no extractable information
    pub stall_turns: u32,

    /// Whether the clarifying category menu was already shown once
    pub menu_shown: bool,

    /// Fields the engine has already asked for (optionals are asked once)
    pub prompted_fields: Vec<String>,
}

impl ConversationSession {
    /// Start a new session on the citizen's first message.
    pub fn new(citizen_ref: impl Into<String>, category: Option<Category>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            citizen_ref: citizen_ref.into(),
            category,
            turn_history: Vec::new(),
            collected_fields: FieldMap::new(),
            status: SessionStatus::Collecting,
            created_at: now,
            last_activity: now,
            stall_turns: 0,
            menu_shown: false,
            prompted_fields: Vec::new(),
        }
    }

    /// Append a turn and refresh the activity clock.
    pub fn record_turn(&mut self, role: Role, text: impl Into<String>) {
        let turn = Turn::new(role, text);
        self.last_activity = turn.at;
        self.turn_history.push(turn);
    }

    /// Store a validated value. Callers validate first; this only records.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.collected_fields.insert(name.into(), value);
    }

    pub fn mark_prompted(&mut self, field: &str) {
        if !self.prompted_fields.iter().any(|f| f == field) {
            self.prompted_fields.push(field.to_string());
        }
    }

    pub fn was_prompted(&self, field: &str) -> bool {
        self.prompted_fields.iter().any(|f| f == field)
    }

    /// A session is archived once it is no longer collecting; writes against
    /// an archived session are discarded by the engine.
    pub fn is_archived(&self) -> bool {
        self.status != SessionStatus::Collecting
    }

    /// True when the inactivity bound has elapsed since the last turn.
    pub fn is_inactive(&self, now: DateTime<Utc>, bound: chrono::Duration) -> bool {
        now - self.last_activity > bound
    }
}
