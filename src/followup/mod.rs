//! Follow-up resolution.
//!
//! After the authority signals that work on an assigned case is done, the
//! resolver asks the citizen to confirm. A confirmed reply resolves the
//! case; a dispute reopens it and re-notifies the authority. Silence earns
//! exactly one reminder after the configured window, then the ticket goes
//! dormant — a case the citizen never confirmed is never auto-resolved.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Actor, CaseStatus, EventKind, RecipientClass};
use crate::gateway::{
    complete_with_retry, ChatTurn, ContractField, FieldKind, GatewayError, LanguageGateway,
    ResponseContract, RetryPolicy,
};
use crate::lifecycle::CaseManager;
use crate::notify::Dispatcher;
use crate::store::FollowupStore;

const CONFIRM_INSTRUCTION: &str = "You are a follow-up assistant for an \
emergency case system. The citizen was asked whether their emergency has \
been resolved. Decide from their reply whether they confirm resolution \
(true) or dispute it (false).";

/// Per-case confirmation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupTicket {
    pub case_id: Uuid,
    pub citizen_ref: String,
    pub requested_at: DateTime<Utc>,

    /// Set once the single reminder has gone out
    pub reminded_at: Option<DateTime<Utc>>,
}

impl FollowupTicket {
    pub fn new(case_id: Uuid, citizen_ref: String) -> Self {
        Self {
            case_id,
            citizen_ref,
            requested_at: Utc::now(),
            reminded_at: None,
        }
    }
}

/// What a citizen reply led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowupOutcome {
    /// Citizen confirmed; case is resolved
    Resolved,

    /// Citizen disputed; case reopened and authority re-notified
    Reopened,

    /// No confirmation is pending for this case
    NotPending,

    /// The reply could not be interpreted; state unchanged
    Unclear(String),
}

/// Drives citizen-confirmed resolution.
pub struct FollowupResolver {
    gateway: Arc<dyn LanguageGateway>,
    retry: RetryPolicy,
    cases: CaseManager,
    dispatcher: Arc<Dispatcher>,
    tickets: Arc<dyn FollowupStore>,
    confirm_window: chrono::Duration,
}

impl FollowupResolver {
    pub fn new(
        gateway: Arc<dyn LanguageGateway>,
        retry: RetryPolicy,
        cases: CaseManager,
        dispatcher: Arc<Dispatcher>,
        tickets: Arc<dyn FollowupStore>,
        confirm_window: chrono::Duration,
    ) -> Self {
        Self {
            gateway,
            retry,
            cases,
            dispatcher,
            tickets,
            confirm_window,
        }
    }

    /// The authority marked work done: ask the citizen to confirm.
    #[instrument(skip(self))]
    pub async fn request_confirmation(&self, case_id: Uuid) -> Result<()> {
        let case = self.cases.get(case_id).await?;
        if case.status != CaseStatus::Assigned {
            anyhow::bail!(
                "confirmation can only be requested for an assigned case (status is {})",
                case.status
            );
        }

        self.dispatcher
            .notify(&case, EventKind::ConfirmationRequest, RecipientClass::Citizen)
            .await?;
        let ticket = FollowupTicket::new(case_id, case.citizen_ref.clone());
        self.tickets
            .put_ticket(&ticket)
            .await
            .context("failed to record follow-up ticket")?;
        info!(%case_id, "confirmation requested");
        Ok(())
    }

    /// Interpret the citizen's reply and advance the case.
    #[instrument(skip(self, reply))]
    pub async fn handle_reply(&self, case_id: Uuid, reply: &str) -> Result<FollowupOutcome> {
        let Some(_ticket) = self.tickets.get_ticket(case_id).await? else {
            return Ok(FollowupOutcome::NotPending);
        };

        let confirmed = match self.interpret_reply(reply).await {
            Ok(confirmed) => confirmed,
            Err(GatewayError::UpstreamUnavailable(reason)) => {
                warn!(%case_id, %reason, "could not interpret reply, state unchanged");
                return Ok(FollowupOutcome::Unclear(
                    "We could not process your reply right now. Please try again in a moment."
                        .to_string(),
                ));
            }
            Err(GatewayError::MalformedResponse(reason)) => {
                warn!(%case_id, %reason, "unparseable reply, asking for clarification");
                return Ok(FollowupOutcome::Unclear(
                    "Sorry, we did not catch that. Is your emergency resolved? Please answer yes or no."
                        .to_string(),
                ));
            }
        };

        let case = self.cases.get(case_id).await?;
        let citizen = Actor::Citizen(case.citizen_ref.clone());

        if confirmed {
            let (case, transition) = self
                .cases
                .set_status(case_id, CaseStatus::Resolved, citizen)
                .await?;
            self.dispatcher
                .notify(&case, EventKind::Transition(transition), RecipientClass::Citizen)
                .await?;
            self.tickets.remove_ticket(case_id).await?;
            info!(%case_id, "citizen confirmed resolution");
            Ok(FollowupOutcome::Resolved)
        } else {
            let (case, transition) = self
                .cases
                .set_status(case_id, CaseStatus::Open, citizen)
                .await?;
            // Fresh event id: the reopen transition is a new lifecycle moment.
            self.dispatcher
                .notify(&case, EventKind::Transition(transition), RecipientClass::Authority)
                .await?;
            self.tickets.remove_ticket(case_id).await?;
            info!(%case_id, "citizen disputed resolution, case reopened");
            Ok(FollowupOutcome::Reopened)
        }
    }

    /// Send due reminders; tickets past their reminder go dormant. Returns
    /// how many reminders went out.
    #[instrument(skip(self))]
    pub async fn check_reminders(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sent = 0usize;
        for mut ticket in self.tickets.open_tickets().await? {
            let case = self.cases.get(ticket.case_id).await?;
            if case.status != CaseStatus::Assigned {
                // Resolved or reopened through another path; ticket is stale.
                self.tickets.remove_ticket(ticket.case_id).await?;
                continue;
            }

            match ticket.reminded_at {
                None if now - ticket.requested_at > self.confirm_window => {
                    self.dispatcher
                        .notify(&case, EventKind::ConfirmationReminder, RecipientClass::Citizen)
                        .await?;
                    ticket.reminded_at = Some(now);
                    self.tickets.put_ticket(&ticket).await?;
                    sent += 1;
                }
                Some(reminded_at) if now - reminded_at > self.confirm_window => {
                    // One reminder only; stop without touching the case.
                    self.tickets.remove_ticket(ticket.case_id).await?;
                    info!(case_id = %ticket.case_id, "follow-up went unanswered, ticket dormant");
                }
                _ => {}
            }
        }
        Ok(sent)
    }

    async fn interpret_reply(&self, reply: &str) -> Result<bool, GatewayError> {
        let contract = ResponseContract::new(
            "confirm_resolution",
            vec![ContractField::required(
                "resolved",
                FieldKind::Boolean,
                "true if the citizen confirms the emergency is resolved",
            )],
        );
        let turns = vec![ChatTurn::system(CONFIRM_INSTRUCTION), ChatTurn::user(reply)];
        let object = complete_with_retry(&*self.gateway, &turns, Some(&contract), &self.retry)
            .await?;
        let object = object.as_structured()?;
        object
            .get("resolved")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| GatewayError::MalformedResponse("missing 'resolved' flag".into()))
    }
}
