//! Slot-filling dialogue engine.
//!
//! One generic engine drives every category's interview off its declared
//! schema: each turn the model is asked to extract any schema fields present
//! in the citizen's message and to pose the next question. Extracted values
//! only land after passing their field validator; malformed data is
//! discarded and the field stays outstanding. The session completes the
//! first turn every required field is valid, at which point the structured
//! record is handed to the lifecycle manager and the session is archived —
//! a session produces at most one case.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Category, ConversationSession, EventKind, RecipientClass, Role, SessionStatus, Transition,
};
use crate::gateway::{
    complete_with_retry, ChatTurn, ContractField, FieldKind, GatewayError, LanguageGateway,
    ResponseContract, RetryPolicy,
};
use crate::lifecycle::{CaseError, CaseManager};
use crate::notify::Dispatcher;
use crate::schema::{FieldDef, FieldValidator, SchemaRegistry};
use crate::store::SessionStore;
use crate::triage::Classifier;

const UNAVAILABLE_MESSAGE: &str =
    "We're having trouble processing your message right now. Please try again in a moment.";

const ABANDON_STALL_MESSAGE: &str = "We couldn't gather enough information to file a report. \
If this is a life-threatening emergency, please contact emergency services directly.";

const ABANDON_EXIT_MESSAGE: &str =
    "Okay, this conversation has been closed. Reach out again any time.";

const ABANDON_INACTIVE_MESSAGE: &str =
    "This conversation expired due to inactivity. Please start a new report.";

const EXIT_PHRASES: [&str; 4] = ["cancel", "exit", "quit", "never mind"];

/// Engine tunables, all deployment parameters.
#[derive(Debug, Clone)]
pub struct DialogueSettings {
    /// Consecutive no-information turns before the session is abandoned
    pub stall_turn_limit: u32,

    /// Inactivity bound after which a session is abandoned
    pub inactivity: chrono::Duration,
}

/// What one intake turn produced.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// Interview continues; show this prompt to the citizen
    Prompt {
        session_id: Uuid,
        status: SessionStatus,
        prompt: String,
    },

    /// Interview finished and a case exists (possibly a pre-existing one
    /// when the submission was a duplicate)
    CaseCreated {
        session_id: Uuid,
        case_id: Uuid,
        message: String,
    },

    /// The session ended (or had already ended) without a new prompt
    SessionClosed {
        session_id: Uuid,
        status: SessionStatus,
        message: String,
    },
}

/// Drives intake conversations.
pub struct DialogueEngine {
    gateway: Arc<dyn LanguageGateway>,
    sessions: Arc<dyn SessionStore>,
    schemas: SchemaRegistry,
    classifier: Classifier,
    cases: CaseManager,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    settings: DialogueSettings,
}

impl DialogueEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn LanguageGateway>,
        sessions: Arc<dyn SessionStore>,
        schemas: SchemaRegistry,
        classifier: Classifier,
        cases: CaseManager,
        dispatcher: Arc<Dispatcher>,
        retry: RetryPolicy,
        settings: DialogueSettings,
    ) -> Self {
        Self {
            gateway,
            sessions,
            schemas,
            classifier,
            cases,
            dispatcher,
            retry,
            settings,
        }
    }

    /// Process one citizen turn. Starts a new session when `session_id` is
    /// absent; turns within one session are processed in receipt order.
    #[instrument(skip(self, text), fields(citizen = citizen_ref))]
    pub async fn submit_turn(
        &self,
        session_id: Option<Uuid>,
        citizen_ref: &str,
        category_hint: Option<Category>,
        text: &str,
    ) -> Result<TurnOutcome> {
        let mut session = match session_id {
            Some(id) => self
                .sessions
                .get_session(id)
                .await?
                .with_context(|| format!("unknown session {id}"))?,
            None => {
                let session = ConversationSession::new(citizen_ref, category_hint);
                self.sessions.create_session(&session).await?;
                info!(session_id = %session.session_id, "session started");
                session
            }
        };

        // Writes against an archived session are discarded, not performed.
        if session.is_archived() {
            return Ok(TurnOutcome::SessionClosed {
                session_id: session.session_id,
                status: session.status,
                message: "This conversation has already ended.".to_string(),
            });
        }

        if session.is_inactive(chrono::Utc::now(), self.settings.inactivity) {
            session.status = SessionStatus::Abandoned;
            self.sessions.put_session(&session).await?;
            info!(session_id = %session.session_id, "session abandoned: inactivity");
            return Ok(TurnOutcome::SessionClosed {
                session_id: session.session_id,
                status: session.status,
                message: ABANDON_INACTIVE_MESSAGE.to_string(),
            });
        }

        session.record_turn(Role::Citizen, text);

        if is_exit_phrase(text) {
            session.status = SessionStatus::Abandoned;
            session.record_turn(Role::Assistant, ABANDON_EXIT_MESSAGE);
            self.sessions.put_session(&session).await?;
            info!(session_id = %session.session_id, "session abandoned: explicit exit");
            return Ok(TurnOutcome::SessionClosed {
                session_id: session.session_id,
                status: session.status,
                message: ABANDON_EXIT_MESSAGE.to_string(),
            });
        }

        // Route to a category before interviewing.
        if session.category.is_none() {
            match category_hint {
                Some(hint) => session.category = Some(hint),
                None => match self.classify_session(&mut session).await? {
                    Some(outcome) => return Ok(outcome),
                    None => {}
                },
            }
        }

        let category = session
            .category
            .context("session has no category after routing")?;
        self.interview_turn(session, category, text).await
    }

    /// Classify an unrouted session. Returns an outcome when the turn ends
    /// here (clarifying menu, gateway trouble); `None` once routed.
    async fn classify_session(
        &self,
        session: &mut ConversationSession,
    ) -> Result<Option<TurnOutcome>> {
        let history = chat_history(session);
        match self.classifier.classify(&history).await {
            Ok(decision) => {
                match decision.category {
                    Some(category) => {
                        session.category = Some(category);
                        Ok(None)
                    }
                    None if !session.menu_shown => {
                        session.menu_shown = true;
                        let menu = Category::menu();
                        session.record_turn(Role::Assistant, &menu);
                        self.finish_prompt(session, menu).await.map(Some)
                    }
                    None => {
                        // The menu was already shown once; fall back to the
                        // best guess rather than looping.
                        debug!(
                            best_guess = %decision.best_guess,
                            confidence = decision.confidence,
                            "low confidence after menu, using best guess"
                        );
                        session.category = Some(decision.best_guess);
                        Ok(None)
                    }
                }
            }
            Err(GatewayError::UpstreamUnavailable(reason)) => {
                warn!(%reason, "classification unavailable");
                session.record_turn(Role::Assistant, UNAVAILABLE_MESSAGE);
                self.finish_prompt(session, UNAVAILABLE_MESSAGE.to_string())
                    .await
                    .map(Some)
            }
            Err(GatewayError::MalformedResponse(reason)) => {
                // Exhausted the re-ask; fall back to the literal menu.
                warn!(%reason, "classification unusable, showing menu");
                session.menu_shown = true;
                let menu = Category::menu();
                session.record_turn(Role::Assistant, &menu);
                self.finish_prompt(session, menu).await.map(Some)
            }
        }
    }

    /// One interview turn against the category schema: extract, validate,
    /// merge, then either complete or ask the next question.
    async fn interview_turn(
        &self,
        mut session: ConversationSession,
        category: Category,
        latest: &str,
    ) -> Result<TurnOutcome> {
        let schema = self.schemas.get(category).clone();

        let contract = extraction_contract(&schema.fields);
        let mut turns = vec![ChatTurn::system(interview_context(&session, category, &schema.fields))];
        turns.extend(chat_history(&session));

        let reply =
            complete_with_retry(&*self.gateway, &turns, Some(&contract), &self.retry).await;

        let object = match reply {
            Ok(reply) => reply.as_structured()?.clone(),
            Err(GatewayError::UpstreamUnavailable(reason)) => {
                warn!(%reason, "extraction unavailable");
                session.record_turn(Role::Assistant, UNAVAILABLE_MESSAGE);
                return self.finish_prompt(&mut session, UNAVAILABLE_MESSAGE.to_string()).await;
            }
            Err(GatewayError::MalformedResponse(reason)) => {
                // Exhausted the re-ask; fall back to a plain question for
                // the most important missing field.
                warn!(%reason, "extraction unusable, asking directly");
                let prompt = fallback_question(&schema.fields, &session);
                session.record_turn(Role::Assistant, &prompt);
                return self.finish_prompt(&mut session, prompt).await;
            }
        };

        // Merge: only validated values land; invalid ones stay outstanding.
        let mut extracted = 0usize;
        let mut rejection: Option<String> = None;
        for field in &schema.fields {
            let Some(raw) = object.get(&field.name) else {
                continue;
            };
            if raw.is_null() {
                continue;
            }
            match field.validator.validate(&field.name, raw) {
                Ok(value) => {
                    let changed = session.collected_fields.get(&field.name) != Some(&value);
                    if changed {
                        session.set_field(field.name.clone(), value);
                        extracted += 1;
                    }
                }
                Err(failure) => {
                    debug!(field = %failure.field, reason = %failure.reason, "discarded invalid value");
                    rejection = Some(failure.reason);
                }
            }
        }

        // Livelock prevention: a bounded number of fruitless turns ends the
        // interview instead of looping forever.
        if extracted == 0 {
            session.stall_turns += 1;
            if session.stall_turns >= self.settings.stall_turn_limit {
                session.status = SessionStatus::Abandoned;
                session.record_turn(Role::Assistant, ABANDON_STALL_MESSAGE);
                let session_id = session.session_id;
                self.archive(&session).await?;
                info!(%session_id, stalls = session.stall_turns, "session abandoned: stalled");
                return Ok(TurnOutcome::SessionClosed {
                    session_id,
                    status: SessionStatus::Abandoned,
                    message: ABANDON_STALL_MESSAGE.to_string(),
                });
            }
        } else {
            session.stall_turns = 0;
        }
        debug!(
            extracted,
            latest_len = latest.len(),
            collected = session.collected_fields.len(),
            "merged turn"
        );

        if schema.is_complete(&session.collected_fields) {
            return self.complete_session(session, category).await;
        }

        // Ask for the single most important missing field next.
        let target = next_target(&schema.fields, &session);
        let mut prompt = object
            .get("next_prompt")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_question(&schema.fields, &session));
        if let Some(reason) = rejection {
            prompt = format!("That didn't look right ({reason}). {prompt}");
        }
        if let Some(target) = target {
            session.mark_prompted(&target);
        }
        // Optionals are offered at most once each.
        let optionals: Vec<String> = schema
            .missing_optional(&session.collected_fields)
            .iter()
            .filter(|f| !session.was_prompted(&f.name))
            .map(|f| f.name.clone())
            .collect();
        for name in optionals {
            session.mark_prompted(&name);
        }

        session.record_turn(Role::Assistant, &prompt);
        self.finish_prompt(&mut session, prompt).await
    }

    /// All required fields are valid: create the case, notify the authority
    /// queue, archive the session.
    async fn complete_session(
        &self,
        mut session: ConversationSession,
        category: Category,
    ) -> Result<TurnOutcome> {
        session.status = SessionStatus::Complete;
        let report = session.collected_fields.clone();

        let (case_id, message) = match self
            .cases
            .create(category, report, session.citizen_ref.clone())
            .await
        {
            Ok(case) => {
                self.dispatcher
                    .notify(
                        &case,
                        EventKind::Transition(Transition::created()),
                        RecipientClass::Authority,
                    )
                    .await?;
                let message = format!(
                    "Your {category} report has been filed. Your case id is {}. \
                     The responsible authority has been notified.",
                    case.case_id
                );
                (case.case_id, message)
            }
            Err(CaseError::DuplicateSubmission { existing }) => {
                let message = format!(
                    "This report was already filed as case {existing}; we have not created a duplicate."
                );
                (existing, message)
            }
            Err(other) => return Err(other.into()),
        };

        session.record_turn(Role::Assistant, &message);
        let session_id = session.session_id;
        self.archive(&session).await?;
        info!(%session_id, %case_id, "session complete, case created");

        Ok(TurnOutcome::CaseCreated {
            session_id,
            case_id,
            message,
        })
    }

    /// Persist the session and emit a prompt outcome — unless the session
    /// was archived while a gateway call was in flight, in which case the
    /// write is discarded.
    async fn finish_prompt(
        &self,
        session: &mut ConversationSession,
        prompt: String,
    ) -> Result<TurnOutcome> {
        if let Some(stored) = self.sessions.get_session(session.session_id).await? {
            if stored.is_archived() {
                debug!(session_id = %session.session_id, "session archived mid-flight, discarding write");
                return Ok(TurnOutcome::SessionClosed {
                    session_id: session.session_id,
                    status: stored.status,
                    message: "This conversation has already ended.".to_string(),
                });
            }
        }
        self.sessions.put_session(session).await?;
        Ok(TurnOutcome::Prompt {
            session_id: session.session_id,
            status: session.status,
            prompt,
        })
    }

    async fn archive(&self, session: &ConversationSession) -> Result<()> {
        self.sessions
            .put_session(session)
            .await
            .context("failed to archive session")
    }
}

fn is_exit_phrase(text: &str) -> bool {
    let normalized = text.trim().to_ascii_lowercase();
    EXIT_PHRASES.iter().any(|p| *p == normalized)
}

/// Session history in model-facing form.
fn chat_history(session: &ConversationSession) -> Vec<ChatTurn> {
    session
        .turn_history
        .iter()
        .map(|turn| match turn.role {
            Role::Citizen => ChatTurn::user(&turn.text),
            Role::Assistant => ChatTurn::assistant(&turn.text),
        })
        .collect()
}

/// The extraction contract: every schema field (typed by its validator)
/// plus the model's next question.
fn extraction_contract(fields: &[FieldDef]) -> ResponseContract {
    let mut contract_fields: Vec<ContractField> = fields
        .iter()
        .map(|f| {
            let kind = match f.validator {
                FieldValidator::Integer { .. } => FieldKind::Number,
                _ => FieldKind::Text,
            };
            ContractField::optional(&f.name, kind, &f.description)
        })
        .collect();
    contract_fields.push(ContractField::required(
        "next_prompt",
        FieldKind::Text,
        "the single question to ask the citizen next",
    ));
    ResponseContract::new("intake_extraction", contract_fields)
}

/// Interview framing for the model: what is collected, what is missing,
/// what to ask next.
fn interview_context(
    session: &ConversationSession,
    category: Category,
    fields: &[FieldDef],
) -> String {
    let collected: Vec<String> = session
        .collected_fields
        .iter()
        .map(|(name, value)| format!("{name}={}", value.display()))
        .collect();
    let missing_required: Vec<String> = fields
        .iter()
        .filter(|f| f.required && !session.collected_fields.contains_key(&f.name))
        .map(|f| format!("{} ({})", f.name, f.description))
        .collect();
    let ask_once: Vec<String> = fields
        .iter()
        .filter(|f| {
            !f.required
                && !session.collected_fields.contains_key(&f.name)
                && !session.was_prompted(&f.name)
        })
        .map(|f| f.name.clone())
        .collect();

    format!(
        "You are conducting a structured {category} emergency intake interview. \
         Extract any of the listed fields present in the citizen's latest message. \
         Already collected: [{}]. Missing required fields, most important first: [{}]. \
         Optional fields you may ask about once: [{}]. \
         In next_prompt, ask only for the single most important missing required field. \
         Be calm, clear, and brief.",
        collected.join(", "),
        missing_required.join(", "),
        ask_once.join(", ")
    )
}

/// The single most important missing field: required first, then optionals
/// not yet asked.
fn next_target(fields: &[FieldDef], session: &ConversationSession) -> Option<String> {
    fields
        .iter()
        .find(|f| f.required && !session.collected_fields.contains_key(&f.name))
        .or_else(|| {
            fields.iter().find(|f| {
                !f.required
                    && !session.collected_fields.contains_key(&f.name)
                    && !session.was_prompted(&f.name)
            })
        })
        .map(|f| f.name.clone())
}

fn fallback_question(fields: &[FieldDef], session: &ConversationSession) -> String {
    match fields
        .iter()
        .find(|f| f.required && !session.collected_fields.contains_key(&f.name))
    {
        Some(field) => format!("Please tell me {}.", field.description),
        None => "Could you tell me more about the situation?".to_string(),
    }
}
