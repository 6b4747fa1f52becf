//! Case records and the lifecycle state machine.
//!
//! A case is the durable, auditable record created once intake completes.
//! Every status change appends exactly one history entry; the history is
//! never mutated or truncated, and cases are never physically deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::Category;
use crate::schema::FieldMap;

/// Case lifecycle states.
///
/// Legal edges: `open → assigned`, `open → resolved`, `assigned → resolved`,
/// and `assigned → open` (reopen, follow-up resolver only). `resolved` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Assigned,
    Resolved,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Assigned => "assigned",
            CaseStatus::Resolved => "resolved",
        }
    }

    /// The transition legality table.
    pub fn can_transition_to(&self, next: CaseStatus) -> bool {
        matches!(
            (self, next),
            (CaseStatus::Open, CaseStatus::Assigned)
                | (CaseStatus::Open, CaseStatus::Resolved)
                | (CaseStatus::Assigned, CaseStatus::Resolved)
                | (CaseStatus::Assigned, CaseStatus::Open)
        )
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(CaseStatus::Open),
            "assigned" => Ok(CaseStatus::Assigned),
            "resolved" => Ok(CaseStatus::Resolved),
            other => Err(format!("unknown case status: {other}")),
        }
    }
}

/// Who performed a status change. Recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    /// The reporting citizen (directly or through the follow-up resolver)
    Citizen(String),

    /// An authority user or queue
    Authority(String),

    /// The intake engine itself (initial entry)
    System,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Citizen(id) => write!(f, "citizen:{id}"),
            Actor::Authority(id) => write!(f, "authority:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

/// One entry in a case's append-only audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: CaseStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// A status move, used for notification payloads and event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// None for the initial entry at creation
    pub from: Option<CaseStatus>,
    pub to: CaseStatus,
}

impl Transition {
    pub fn created() -> Self {
        Self {
            from: None,
            to: CaseStatus::Open,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.from {
            Some(from) => write!(f, "{}->{}", from, self.to),
            None => write!(f, "new->{}", self.to),
        }
    }
}

/// The durable case record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub category: Category,

    /// The completed field mapping from the originating session
    pub structured_report: FieldMap,

    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,

    /// Append-only; the last entry's status always equals `status`
    pub status_history: Vec<StatusEntry>,

    pub citizen_ref: String,
    pub assigned_authority_ref: Option<String>,

    /// Digest of (citizen, category, report) for the duplicate-submission window
    pub fingerprint: String,
}

impl Case {
    /// Create a new case in `open` with its initial history entry.
    pub fn new(category: Category, structured_report: FieldMap, citizen_ref: String) -> Self {
        let now = Utc::now();
        let fingerprint = report_fingerprint(&citizen_ref, category, &structured_report);
        Self {
            case_id: Uuid::new_v4(),
            category,
            structured_report,
            status: CaseStatus::Open,
            created_at: now,
            status_history: vec![StatusEntry {
                status: CaseStatus::Open,
                actor: Actor::System,
                at: now,
            }],
            citizen_ref,
            assigned_authority_ref: None,
            fingerprint,
        }
    }

    /// Apply a transition in memory: set the status and append the matching
    /// history entry. Legality is checked by the lifecycle manager before
    /// this is called; the store's compare-and-swap makes it visible
    /// atomically.
    pub fn apply(&mut self, to: CaseStatus, actor: Actor) -> Transition {
        let transition = Transition {
            from: Some(self.status),
            to,
        };
        self.status = to;
        self.status_history.push(StatusEntry {
            status: to,
            actor,
            at: Utc::now(),
        });
        transition
    }

    /// Sequence number of the latest history entry, used to keep repeated
    /// transitions from colliding on notification event ids.
    pub fn history_seq(&self) -> usize {
        self.status_history.len()
    }
}

/// Digest identifying a submission for the dedup window: same citizen, same
/// category, identical report content. First 16 hex chars of SHA-256.
pub fn report_fingerprint(citizen_ref: &str, category: Category, report: &FieldMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(citizen_ref.as_bytes());
    hasher.update(b":");
    hasher.update(category.as_str().as_bytes());
    for (name, value) in report {
        hasher.update(b":");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.display().as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
