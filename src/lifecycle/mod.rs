//! Case lifecycle management.
//!
//! The manager owns the status state machine and the audit discipline:
//! every transition is validated against the legality table, applied
//! together with its history append, and committed through the store's
//! compare-and-swap so concurrent actors serialize per case — exactly one
//! racer wins, the loser is told to re-read.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{report_fingerprint, Actor, Case, CaseStatus, Category, Transition};
use crate::schema::FieldMap;
use crate::store::{CaseStore, StoreError};

/// Lifecycle failure taxonomy. Each kind is scoped to one case.
#[derive(Debug, Error)]
pub enum CaseError {
    /// The requested move is not an edge of the state machine
    #[error("illegal transition from {from} to {to}")]
    InvalidTransition { from: CaseStatus, to: CaseStatus },

    /// A concurrent writer committed first; re-read and retry if still valid
    #[error("case {case_id} was modified concurrently")]
    ConcurrentModification { case_id: Uuid },

    /// An identical report from the same citizen inside the dedup window
    #[error("duplicate submission, existing case {existing}")]
    DuplicateSubmission { existing: Uuid },

    #[error("case {0} not found")]
    NotFound(Uuid),

    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl CaseError {
    /// Map store-level outcomes onto the lifecycle taxonomy.
    fn from_store(e: StoreError, case_id: Uuid) -> Self {
        match e {
            StoreError::Conflict(_) => CaseError::ConcurrentModification { case_id },
            StoreError::NotFound(_) => CaseError::NotFound(case_id),
            other => CaseError::Storage(other),
        }
    }
}

/// Owns case records and their transitions.
#[derive(Clone)]
pub struct CaseManager {
    store: Arc<dyn CaseStore>,
    dedup_window: chrono::Duration,
}

impl CaseManager {
    pub fn new(store: Arc<dyn CaseStore>, dedup_window: chrono::Duration) -> Self {
        Self {
            store,
            dedup_window,
        }
    }

    /// Create a case from a completed structured report.
    ///
    /// An identical report from the same citizen within the dedup window is
    /// rejected with the existing case id instead of creating a second
    /// record — retried network calls never double-submit.
    #[instrument(skip(self, structured_report, category), fields(category = %category))]
    pub async fn create(
        &self,
        category: Category,
        structured_report: FieldMap,
        citizen_ref: String,
    ) -> Result<Case, CaseError> {
        let fingerprint = report_fingerprint(&citizen_ref, category, &structured_report);
        let since = Utc::now() - self.dedup_window;
        if let Some(existing) = self
            .store
            .find_recent_fingerprint(&citizen_ref, &fingerprint, since)
            .await
            .map_err(CaseError::Storage)?
        {
            warn!(%existing, "duplicate submission inside dedup window");
            return Err(CaseError::DuplicateSubmission { existing });
        }

        let case = Case::new(category, structured_report, citizen_ref);
        self.store
            .insert_case(&case)
            .await
            .map_err(CaseError::Storage)?;
        info!(case_id = %case.case_id, "case created");
        Ok(case)
    }

    /// Assign a case to an authority. Legal only from `open`.
    #[instrument(skip(self))]
    pub async fn assign(
        &self,
        case_id: Uuid,
        authority_ref: &str,
    ) -> Result<(Case, Transition), CaseError> {
        let mut case = self.fetch(case_id).await?;
        if case.status != CaseStatus::Open {
            return Err(CaseError::InvalidTransition {
                from: case.status,
                to: CaseStatus::Assigned,
            });
        }

        let expected = case.status;
        case.assigned_authority_ref = Some(authority_ref.to_string());
        let transition = case.apply(
            CaseStatus::Assigned,
            Actor::Authority(authority_ref.to_string()),
        );
        self.commit(expected, &case).await?;
        info!(%case_id, authority = authority_ref, "case assigned");
        Ok((case, transition))
    }

    /// Apply an arbitrary status change after validating it against the
    /// state machine table. Atomic with its history append: a reader never
    /// observes the new status without its matching last history entry.
    #[instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn set_status(
        &self,
        case_id: Uuid,
        new_status: CaseStatus,
        actor: Actor,
    ) -> Result<(Case, Transition), CaseError> {
        let mut case = self.fetch(case_id).await?;
        if !case.status.can_transition_to(new_status) {
            return Err(CaseError::InvalidTransition {
                from: case.status,
                to: new_status,
            });
        }

        let expected = case.status;
        // A reopen clears the assignment so the case can be re-assigned.
        if new_status == CaseStatus::Open {
            case.assigned_authority_ref = None;
        }
        let transition = case.apply(new_status, actor);
        self.commit(expected, &case).await?;
        info!(%case_id, %transition, "status changed");
        Ok((case, transition))
    }

    /// Read-only lookup; never mutates.
    pub async fn get(&self, case_id: Uuid) -> Result<Case, CaseError> {
        self.fetch(case_id).await
    }

    /// Citizen-facing lookup: a case is only visible to the citizen who
    /// reported it. A mismatch reads as not-found rather than leaking that
    /// the case exists.
    pub async fn get_for_citizen(
        &self,
        case_id: Uuid,
        citizen_ref: &str,
    ) -> Result<Case, CaseError> {
        let case = self.fetch(case_id).await?;
        if case.citizen_ref != citizen_ref {
            return Err(CaseError::NotFound(case_id));
        }
        Ok(case)
    }

    /// Filtered listing for authority queues.
    pub async fn list(
        &self,
        category: Option<Category>,
        status: Option<CaseStatus>,
    ) -> Result<Vec<Case>, CaseError> {
        self.store
            .list_cases(category, status)
            .await
            .map_err(CaseError::Storage)
    }

    async fn fetch(&self, case_id: Uuid) -> Result<Case, CaseError> {
        self.store
            .get_case(case_id)
            .await
            .map_err(CaseError::Storage)?
            .ok_or(CaseError::NotFound(case_id))
    }

    async fn commit(&self, expected: CaseStatus, case: &Case) -> Result<(), CaseError> {
        self.store
            .compare_and_update(expected, case)
            .await
            .map_err(|e| CaseError::from_store(e, case.case_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;
    use crate::store::MemoryStore;

    fn manager() -> CaseManager {
        CaseManager::new(Arc::new(MemoryStore::new()), chrono::Duration::minutes(5))
    }

    fn report() -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("location".into(), FieldValue::Text("12 Elm Street".into()));
        map.insert("hazard".into(), FieldValue::Text("kitchen fire".into()));
        map
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let manager = manager();
        let case = manager
            .create(Category::Fire, report(), "citizen-1".into())
            .await
            .unwrap();

        let loaded = manager.get(case.case_id).await.unwrap();
        assert_eq!(loaded.status, CaseStatus::Open);
        assert_eq!(loaded.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_existing() {
        let manager = manager();
        let first = manager
            .create(Category::Fire, report(), "citizen-1".into())
            .await
            .unwrap();

        let err = manager
            .create(Category::Fire, report(), "citizen-1".into())
            .await
            .unwrap_err();
        match err {
            CaseError::DuplicateSubmission { existing } => assert_eq!(existing, first.case_id),
            other => panic!("expected DuplicateSubmission, got {other:?}"),
        }

        // A different citizen with the same content is not a duplicate.
        assert!(manager
            .create(Category::Fire, report(), "citizen-2".into())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_assign_only_from_open() {
        let manager = manager();
        let case = manager
            .create(Category::Police, report(), "citizen-1".into())
            .await
            .unwrap();

        manager.assign(case.case_id, "precinct-7").await.unwrap();
        let err = manager.assign(case.case_id, "precinct-9").await.unwrap_err();
        assert!(matches!(err, CaseError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_resolved_is_terminal_except_reopen() {
        let manager = manager();
        let case = manager
            .create(Category::Medical, report(), "citizen-1".into())
            .await
            .unwrap();

        // open -> resolved is a legal direct edge.
        manager
            .set_status(case.case_id, CaseStatus::Resolved, Actor::System)
            .await
            .unwrap();

        let err = manager
            .set_status(case.case_id, CaseStatus::Open, Actor::System)
            .await
            .unwrap_err();
        assert!(matches!(err, CaseError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reopen_clears_assignment() {
        let manager = manager();
        let case = manager
            .create(Category::Electricity, report(), "citizen-1".into())
            .await
            .unwrap();
        manager.assign(case.case_id, "utility-1").await.unwrap();

        let (reopened, transition) = manager
            .set_status(
                case.case_id,
                CaseStatus::Open,
                Actor::Citizen("citizen-1".into()),
            )
            .await
            .unwrap();
        assert_eq!(transition.from, Some(CaseStatus::Assigned));
        assert_eq!(reopened.assigned_authority_ref, None);
        assert_eq!(reopened.status_history.len(), 3);
    }

    #[tokio::test]
    async fn test_history_matches_status_after_every_change() {
        let manager = manager();
        let case = manager
            .create(Category::Fire, report(), "citizen-1".into())
            .await
            .unwrap();
        manager.assign(case.case_id, "fire-dept").await.unwrap();
        manager
            .set_status(
                case.case_id,
                CaseStatus::Resolved,
                Actor::Citizen("citizen-1".into()),
            )
            .await
            .unwrap();

        let final_case = manager.get(case.case_id).await.unwrap();
        assert_eq!(
            final_case.status_history.last().unwrap().status,
            final_case.status
        );
        let times: Vec<_> = final_case.status_history.iter().map(|e| e.at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}
