//! Intake Conversation Integration Tests
//!
//! Drives the slot-filling engine end to end with a scripted gateway:
//! classification, extraction, validator-gated merges, stall abandonment,
//! and case creation on completion.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caseline::dialogue::{DialogueEngine, DialogueSettings, TurnOutcome};
use caseline::domain::{CaseStatus, Category, NotificationPayload, RecipientClass, SessionStatus};
use caseline::gateway::{ChatTurn, GatewayError, GatewayReply, LanguageGateway, ResponseContract};
use caseline::lifecycle::CaseManager;
use caseline::notify::{Dispatcher, NotificationChannel};
use caseline::schema::SchemaRegistry;
use caseline::store::{CaseStore, MemoryStore, SessionStore};
use caseline::triage::Classifier;
use caseline::RetryPolicy;

/// Gateway double that replays canned raw replies in order.
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

/// Channel double that records deliveries and always succeeds.
struct RecordingChannel {
    sends: Mutex<Vec<(RecipientClass, String)>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
        }
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
        _payload: &NotificationPayload,
    ) -> anyhow::Result<bool> {
        self.sends
            .lock()
            .unwrap()
            .push((recipient_class, recipient_ref.to_string()));
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

fn build_engine(
    store: Arc<MemoryStore>,
    gateway: Arc<ScriptedGateway>,
    channel: Arc<RecordingChannel>,
) -> DialogueEngine {
    let cases = CaseManager::new(store.clone(), chrono::Duration::minutes(5));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), channel));
    let classifier = Classifier::new(gateway.clone(), fast_retry(), 0.75);
    DialogueEngine::new(
        gateway,
        store,
        SchemaRegistry::builtin(),
        classifier,
        cases,
        dispatcher,
        fast_retry(),
        DialogueSettings {
            stall_turn_limit: 5,
            inactivity: chrono::Duration::minutes(30),
        },
    )
}

#[tokio::test]
async fn test_fire_report_completes_after_location() {
    // Scenario: "there's a fire and someone is trapped" → high-confidence
    // fire, hazard extracted, one more turn for the location, case created.
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let gateway = Arc::new(ScriptedGateway::new(&[
        r#"{"category": "fire", "confidence": 0.95}"#,
        r#"{"hazard": "house fire, one person trapped", "next_prompt": "Where is the fire?"}"#,
        r#"{"location": "12 Elm Street", "next_prompt": "Anything else?"}"#,
    ]));
    let engine = build_engine(store.clone(), gateway, channel.clone());

    let outcome = engine
        .submit_turn(None, "alice", None, "there's a fire and someone is trapped")
        .await
        .unwrap();
    let session_id = match outcome {
        TurnOutcome::Prompt {
            session_id, prompt, ..
        } => {
            assert_eq!(prompt, "Where is the fire?");
            session_id
        }
        other => panic!("expected a prompt, got {other:?}"),
    };

    let outcome = engine
        .submit_turn(Some(session_id), "alice", None, "12 Elm Street")
        .await
        .unwrap();
    let case_id = match outcome {
        TurnOutcome::CaseCreated { case_id, .. } => case_id,
        other => panic!("expected case creation, got {other:?}"),
    };

    // Case is open with the validated report.
    let case = store.get_case(case_id).await.unwrap().unwrap();
    assert_eq!(case.category, Category::Fire);
    assert_eq!(case.status, CaseStatus::Open);
    assert_eq!(
        case.structured_report.get("location").unwrap().display(),
        "12 Elm Street"
    );

    // The authority queue was notified exactly once.
    let sends = channel.sends.lock().unwrap();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0], (RecipientClass::Authority, "authority:fire".into()));

    // Session archived as complete.
    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Complete);
}

#[tokio::test]
async fn test_completed_session_discards_further_turns() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let gateway = Arc::new(ScriptedGateway::new(&[
        r#"{"category": "fire", "confidence": 0.95}"#,
        r#"{"hazard": "shed fire", "location": "4 Oak Lane", "next_prompt": "ok"}"#,
    ]));
    let engine = build_engine(store.clone(), gateway, channel);

    let outcome = engine
        .submit_turn(None, "alice", None, "my shed at 4 Oak Lane is on fire")
        .await
        .unwrap();
    let session_id = match outcome {
        TurnOutcome::CaseCreated { session_id, .. } => session_id,
        other => panic!("expected case creation, got {other:?}"),
    };

    // A session produces at most one case; later turns are no-ops.
    let outcome = engine
        .submit_turn(Some(session_id), "alice", None, "also my fence is burning")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::SessionClosed {
            status: SessionStatus::Complete,
            ..
        }
    ));
    assert_eq!(store.list_cases(None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stalled_medical_interview_is_abandoned() {
    // Scenario: five turns with nothing extractable → abandoned, no case.
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let no_info = r#"{"next_prompt": "Can you tell me the patient's name?"}"#;
    let gateway = Arc::new(ScriptedGateway::new(&[
        no_info, no_info, no_info, no_info, no_info,
    ]));
    let engine = build_engine(store.clone(), gateway, channel.clone());

    let mut session_id = None;
    let mut last = None;
    for _ in 0..5 {
        let outcome = engine
            .submit_turn(session_id, "bob", Some(Category::Medical), "hmm")
            .await
            .unwrap();
        session_id = Some(match &outcome {
            TurnOutcome::Prompt { session_id, .. } => *session_id,
            TurnOutcome::SessionClosed { session_id, .. } => *session_id,
            other => panic!("unexpected outcome {other:?}"),
        });
        last = Some(outcome);
    }

    assert!(matches!(
        last,
        Some(TurnOutcome::SessionClosed {
            status: SessionStatus::Abandoned,
            ..
        })
    ));
    assert!(store.list_cases(None, None).await.unwrap().is_empty());
    assert!(channel.sends.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_age_is_discarded_and_refetched() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let gateway = Arc::new(ScriptedGateway::new(&[
        // Non-numeric age must never be stored.
        r#"{"patient_name": "Ana", "patient_age": "forty-ish", "next_prompt": "How old is Ana?"}"#,
        r#"{"patient_age": 42, "next_prompt": "What are the symptoms?"}"#,
    ]));
    let engine = build_engine(store.clone(), gateway, channel);

    let outcome = engine
        .submit_turn(
            None,
            "bob",
            Some(Category::Medical),
            "my mother Ana collapsed, she is forty-ish",
        )
        .await
        .unwrap();
    let (session_id, prompt) = match outcome {
        TurnOutcome::Prompt {
            session_id, prompt, ..
        } => (session_id, prompt),
        other => panic!("expected a prompt, got {other:?}"),
    };
    assert!(prompt.contains("didn't look right"));

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert!(session.collected_fields.contains_key("patient_name"));
    assert!(!session.collected_fields.contains_key("patient_age"));

    let outcome = engine
        .submit_turn(Some(session_id), "bob", None, "she is 42")
        .await
        .unwrap();
    assert!(matches!(outcome, TurnOutcome::Prompt { .. }));
    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(
        session.collected_fields.get("patient_age").unwrap().display(),
        "42"
    );
}

#[tokio::test]
async fn test_unclear_classification_shows_menu_once_then_best_guess() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let gateway = Arc::new(ScriptedGateway::new(&[
        r#"{"category": "police", "confidence": 0.30}"#,
        r#"{"category": "police", "confidence": 0.40}"#,
        r#"{"incident_type": "bicycle theft", "next_prompt": "When did it happen?"}"#,
    ]));
    let engine = build_engine(store.clone(), gateway, channel);

    // First turn: below threshold, the literal category menu is shown.
    let outcome = engine
        .submit_turn(None, "carol", None, "something happened to my bike")
        .await
        .unwrap();
    let session_id = match outcome {
        TurnOutcome::Prompt {
            session_id, prompt, ..
        } => {
            assert!(prompt.contains("medical"));
            assert!(prompt.contains("fire"));
            session_id
        }
        other => panic!("expected the menu, got {other:?}"),
    };

    // Second turn: still unclear, best guess wins and the interview starts.
    let outcome = engine
        .submit_turn(Some(session_id), "carol", None, "someone took it I think")
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Prompt { prompt, .. } => assert_eq!(prompt, "When did it happen?"),
        other => panic!("expected a prompt, got {other:?}"),
    }

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.category, Some(Category::Police));
    assert!(session.menu_shown);
}

#[tokio::test]
async fn test_explicit_exit_abandons_session() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    let gateway = Arc::new(ScriptedGateway::new(&[
        r#"{"next_prompt": "What is the address?"}"#,
    ]));
    let engine = build_engine(store.clone(), gateway, channel);

    let outcome = engine
        .submit_turn(None, "dave", Some(Category::Electricity), "power lines down")
        .await
        .unwrap();
    let session_id = match outcome {
        TurnOutcome::Prompt { session_id, .. } => session_id,
        other => panic!("expected a prompt, got {other:?}"),
    };

    let outcome = engine
        .submit_turn(Some(session_id), "dave", None, "cancel")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        TurnOutcome::SessionClosed {
            status: SessionStatus::Abandoned,
            ..
        }
    ));
    assert!(store.list_cases(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_outage_surfaces_retry_message_not_crash() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(RecordingChannel::new());
    // Empty script: every call fails as UpstreamUnavailable.
    let gateway = Arc::new(ScriptedGateway::new(&[]));
    let engine = build_engine(store.clone(), gateway, channel);

    let outcome = engine
        .submit_turn(None, "erin", Some(Category::Fire), "fire at my house")
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Prompt { prompt, status, .. } => {
            assert_eq!(status, SessionStatus::Collecting);
            assert!(prompt.contains("try again"));
        }
        other => panic!("expected a retry prompt, got {other:?}"),
    }
}
