//! Follow-up Resolution Integration Tests
//!
//! Citizen-confirmed resolution, the dispute/reopen path, and the
//! one-reminder-then-stop policy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caseline::domain::{CaseStatus, Category, NotificationPayload, RecipientClass};
use caseline::followup::{FollowupOutcome, FollowupResolver};
use caseline::gateway::{ChatTurn, GatewayError, GatewayReply, LanguageGateway, ResponseContract};
use caseline::lifecycle::CaseManager;
use caseline::notify::{Dispatcher, NotificationChannel};
use caseline::schema::{FieldMap, FieldValue};
use caseline::store::{FollowupStore, MemoryStore};
use caseline::RetryPolicy;
use chrono::Utc;
use uuid::Uuid;

struct ScriptedGateway {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedGateway {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LanguageGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _history: &[ChatTurn],
        contract: Option<&ResponseContract>,
    ) -> Result<GatewayReply, GatewayError> {
        let raw = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GatewayError::UpstreamUnavailable("script exhausted".into()))?;
        match contract {
            Some(contract) => Ok(GatewayReply::Structured(contract.parse(&raw)?)),
            None => Ok(GatewayReply::Text(raw)),
        }
    }
}

struct RecordingChannel {
    sends: Mutex<Vec<(RecipientClass, String, String)>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
        }
    }

    fn count_for(&self, class: RecipientClass) -> usize {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _, _)| *c == class)
            .count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        recipient_class: RecipientClass,
        recipient_ref: &str,
        payload: &NotificationPayload,
    ) -> anyhow::Result<bool> {
        self.sends.lock().unwrap().push((
            recipient_class,
            recipient_ref.to_string(),
            payload.title.clone(),
        ));
        Ok(true)
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 1,
        backoff_multiplier: 1.0,
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    channel: Arc<RecordingChannel>,
    cases: CaseManager,
    resolver: FollowupResolver,
}

fn fixture(replies: &[&str], confirm_window: chrono::Duration) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let cases = CaseManager::new(store.clone(), chrono::Duration::minutes(5));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), channel.clone()));
    let resolver = FollowupResolver::new(
        Arc::new(ScriptedGateway::new(replies)),
        fast_retry(),
        cases.clone(),
        dispatcher,
        store.clone(),
        confirm_window,
    );
    Fixture {
        store,
        channel,
        cases,
        resolver,
    }
}

fn report() -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("location".into(), FieldValue::Text("12 Elm Street".into()));
    map.insert("hazard".into(), FieldValue::Text("kitchen fire".into()));
    map
}

async fn assigned_case(fx: &Fixture) -> Uuid {
    let case = fx
        .cases
        .create(Category::Fire, report(), "alice".into())
        .await
        .unwrap();
    fx.cases.assign(case.case_id, "station-12").await.unwrap();
    case.case_id
}

#[tokio::test]
async fn test_confirmed_resolution_resolves_case() {
    let fx = fixture(&[r#"{"resolved": true}"#], chrono::Duration::hours(4));
    let case_id = assigned_case(&fx).await;

    fx.resolver.request_confirmation(case_id).await.unwrap();
    assert_eq!(fx.channel.count_for(RecipientClass::Citizen), 1);

    let outcome = fx
        .resolver
        .handle_reply(case_id, "yes, everything is fine now")
        .await
        .unwrap();
    assert_eq!(outcome, FollowupOutcome::Resolved);

    let case = fx.cases.get(case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Resolved);
    // Ticket consumed: a second reply has nothing pending.
    assert_eq!(
        fx.resolver.handle_reply(case_id, "yes").await.unwrap(),
        FollowupOutcome::NotPending
    );
}

#[tokio::test]
async fn test_dispute_reopens_and_renotifies_authority() {
    // Scenario: authority assigned and marked done, citizen disagrees.
    let fx = fixture(&[r#"{"resolved": false}"#], chrono::Duration::hours(4));
    let case_id = assigned_case(&fx).await;

    fx.resolver.request_confirmation(case_id).await.unwrap();
    let outcome = fx
        .resolver
        .handle_reply(case_id, "no, the power is still out")
        .await
        .unwrap();
    assert_eq!(outcome, FollowupOutcome::Reopened);

    let case = fx.cases.get(case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Open);
    assert_eq!(case.assigned_authority_ref, None);
    assert_eq!(
        case.status_history.last().unwrap().status,
        CaseStatus::Open
    );

    // A fresh authority notification went out for the reopen.
    assert_eq!(fx.channel.count_for(RecipientClass::Authority), 1);
}

#[tokio::test]
async fn test_confirmation_requires_assigned_case() {
    let fx = fixture(&[], chrono::Duration::hours(4));
    let case = fx
        .cases
        .create(Category::Fire, report(), "alice".into())
        .await
        .unwrap();

    // Still open: no completion signal makes sense yet.
    assert!(fx.resolver.request_confirmation(case.case_id).await.is_err());
}

#[tokio::test]
async fn test_one_reminder_then_dormant_never_auto_resolves() {
    let window = chrono::Duration::minutes(60);
    let fx = fixture(&[], window);
    let case_id = assigned_case(&fx).await;

    fx.resolver.request_confirmation(case_id).await.unwrap();

    // Within the window: nothing due.
    assert_eq!(fx.resolver.check_reminders(Utc::now()).await.unwrap(), 0);

    // Window lapsed: exactly one reminder.
    let later = Utc::now() + window + chrono::Duration::minutes(1);
    assert_eq!(fx.resolver.check_reminders(later).await.unwrap(), 1);
    assert_eq!(fx.channel.count_for(RecipientClass::Citizen), 2); // request + reminder

    // Another window with no reply: ticket goes dormant, no more sends.
    let much_later = later + window + chrono::Duration::minutes(1);
    assert_eq!(fx.resolver.check_reminders(much_later).await.unwrap(), 0);
    assert!(fx.store.get_ticket(case_id).await.unwrap().is_none());
    assert_eq!(fx.channel.count_for(RecipientClass::Citizen), 2);

    // The case was never auto-resolved.
    let case = fx.cases.get(case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Assigned);
}

#[tokio::test]
async fn test_unparseable_reply_leaves_state_unchanged() {
    // Script exhausted => upstream unavailable for the interpretation call.
    let fx = fixture(&[], chrono::Duration::hours(4));
    let case_id = assigned_case(&fx).await;
    fx.resolver.request_confirmation(case_id).await.unwrap();

    let outcome = fx
        .resolver
        .handle_reply(case_id, "well, sort of, maybe")
        .await
        .unwrap();
    assert!(matches!(outcome, FollowupOutcome::Unclear(_)));

    let case = fx.cases.get(case_id).await.unwrap();
    assert_eq!(case.status, CaseStatus::Assigned);
    // Ticket still pending so the citizen can answer again.
    assert!(fx.store.get_ticket(case_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_stale_ticket_removed_when_case_moved_on() {
    let fx = fixture(&[], chrono::Duration::minutes(60));
    let case_id = assigned_case(&fx).await;
    fx.resolver.request_confirmation(case_id).await.unwrap();

    // The authority resolves the case through another path.
    fx.cases
        .set_status(
            case_id,
            CaseStatus::Resolved,
            caseline::domain::Actor::Authority("station-12".into()),
        )
        .await
        .unwrap();

    let later = Utc::now() + chrono::Duration::minutes(61);
    assert_eq!(fx.resolver.check_reminders(later).await.unwrap(), 0);
    assert!(fx.store.get_ticket(case_id).await.unwrap().is_none());
}
