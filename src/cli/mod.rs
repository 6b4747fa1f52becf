//! Command-line interface for caseline.
//!
//! Provides the intake chat, the authority operations (listing, assignment,
//! status updates, work-done signal), the citizen-facing case query and
//! follow-up confirmation, and the notification retry sweep.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::dialogue::{DialogueEngine, TurnOutcome};
use crate::domain::{Actor, Case, CaseStatus, Category, EventKind, RecipientClass};
use crate::followup::{FollowupOutcome, FollowupResolver};
use crate::gateway::HttpGateway;
use crate::lifecycle::CaseManager;
use crate::notify::{ConsoleChannel, Dispatcher, NotificationChannel, WebhookChannel};
use crate::schema::SchemaRegistry;
use crate::store::SqliteStore;
use crate::triage::Classifier;

/// caseline - emergency intake triage and case lifecycle
#[derive(Parser, Debug)]
#[command(name = "caseline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive intake conversation
    Chat {
        /// Citizen reference (delivery address / account id)
        #[arg(short, long)]
        citizen: String,

        /// Skip triage and start directly in this category
        #[arg(long)]
        category: Option<Category>,
    },

    /// List cases, optionally filtered
    Cases {
        /// Filter by category
        #[arg(long)]
        category: Option<Category>,

        /// Filter by status (open, assigned, resolved)
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one case with its audit history
    Show {
        /// Case ID (UUID)
        case_id: String,

        /// Restrict the lookup to this citizen's own case
        #[arg(long)]
        citizen: Option<String>,
    },

    /// Assign an open case to an authority
    Assign {
        /// Case ID (UUID)
        case_id: String,

        /// Authority reference (e.g. station-12)
        authority: String,
    },

    /// Apply a status change as an authority actor
    UpdateStatus {
        /// Case ID (UUID)
        case_id: String,

        /// Target status (open, assigned, resolved)
        status: String,

        /// Acting authority reference
        #[arg(long)]
        actor: String,
    },

    /// Authority signal: work on an assigned case is done, ask the citizen
    Done {
        /// Case ID (UUID)
        case_id: String,
    },

    /// Record the citizen's reply to a resolution confirmation
    Confirm {
        /// Case ID (UUID)
        case_id: String,

        /// The citizen's reply text
        reply: String,
    },

    /// Redeliver pending notifications and send due follow-up reminders
    Sweep,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = Config::load()?;

        match self.command {
            Commands::Chat { citizen, category } => chat(&config, &citizen, category).await,
            Commands::Cases { category, status } => list_cases(&config, category, status).await,
            Commands::Show { case_id, citizen } => show_case(&config, &case_id, citizen).await,
            Commands::Assign { case_id, authority } => {
                assign_case(&config, &case_id, &authority).await
            }
            Commands::UpdateStatus {
                case_id,
                status,
                actor,
            } => update_status(&config, &case_id, &status, &actor).await,
            Commands::Done { case_id } => mark_done(&config, &case_id).await,
            Commands::Confirm { case_id, reply } => confirm(&config, &case_id, &reply).await,
            Commands::Sweep => sweep(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Everything the commands need, wired from configuration.
struct App {
    engine: DialogueEngine,
    cases: CaseManager,
    dispatcher: Arc<Dispatcher>,
    followup: FollowupResolver,
}

impl App {
    fn build(config: &Config) -> Result<Self> {
        let home = config.home_dir()?;
        std::fs::create_dir_all(&home)
            .with_context(|| format!("failed to create data directory: {}", home.display()))?;

        let store = Arc::new(
            SqliteStore::open(&config.db_path()?)
                .map_err(|e| anyhow::anyhow!("failed to open database: {e}"))?,
        );

        let gateway = Arc::new(
            HttpGateway::new(config.gateway.clone())
                .map_err(|e| anyhow::anyhow!("failed to build gateway: {e}"))?,
        );

        let channel: Arc<dyn NotificationChannel> = match &config.webhook {
            Some(webhook) => Arc::new(WebhookChannel::new(webhook.clone())?),
            None => Arc::new(ConsoleChannel),
        };
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), channel));

        let cases = CaseManager::new(store.clone(), config.dedup_window());
        let classifier = Classifier::new(
            gateway.clone(),
            config.retry.clone(),
            config.triage.confidence_threshold,
        );
        let engine = DialogueEngine::new(
            gateway.clone(),
            store.clone(),
            SchemaRegistry::builtin(),
            classifier,
            cases.clone(),
            dispatcher.clone(),
            config.retry.clone(),
            config.dialogue_settings(),
        );
        let followup = FollowupResolver::new(
            gateway,
            config.retry.clone(),
            cases.clone(),
            dispatcher.clone(),
            store,
            config.confirm_window(),
        );

        Ok(Self {
            engine,
            cases,
            dispatcher,
            followup,
        })
    }
}

/// Interactive intake loop over stdin.
async fn chat(config: &Config, citizen: &str, category: Option<Category>) -> Result<()> {
    let app = App::build(config)?;
    let stdin = io::stdin();

    println!("caseline intake — describe your emergency (or 'exit' to stop)");
    let mut session_id: Option<Uuid> = None;

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let outcome = app
            .engine
            .submit_turn(session_id, citizen, category, text)
            .await?;

        match outcome {
            TurnOutcome::Prompt {
                session_id: id,
                prompt,
                ..
            } => {
                session_id = Some(id);
                println!("{prompt}");
            }
            TurnOutcome::CaseCreated {
                case_id, message, ..
            } => {
                println!("{message}");
                println!("Track it with: caseline show {case_id} --citizen {citizen}");
                break;
            }
            TurnOutcome::SessionClosed { message, .. } => {
                println!("{message}");
                break;
            }
        }
    }

    Ok(())
}

async fn list_cases(
    config: &Config,
    category: Option<Category>,
    status: Option<String>,
) -> Result<()> {
    let app = App::build(config)?;
    let status = parse_status(status.as_deref())?;

    let cases = app.cases.list(category, status).await?;
    if cases.is_empty() {
        println!("No matching cases.");
        return Ok(());
    }

    for case in cases {
        println!(
            "{}  {:11}  {:8}  {}  {}",
            case.case_id,
            case.category.to_string(),
            case.status.to_string(),
            case.created_at.format("%Y-%m-%d %H:%M"),
            case.assigned_authority_ref.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn show_case(config: &Config, case_id: &str, citizen: Option<String>) -> Result<()> {
    let app = App::build(config)?;
    let case_id = parse_case_id(case_id)?;

    let case = match citizen {
        Some(citizen) => app.cases.get_for_citizen(case_id, &citizen).await?,
        None => app.cases.get(case_id).await?,
    };
    print_case(&case);
    Ok(())
}

async fn assign_case(config: &Config, case_id: &str, authority: &str) -> Result<()> {
    let app = App::build(config)?;
    let case_id = parse_case_id(case_id)?;

    let (case, transition) = app.cases.assign(case_id, authority).await?;
    app.dispatcher
        .notify(&case, EventKind::Transition(transition), RecipientClass::Citizen)
        .await?;
    println!("Case {case_id} assigned to {authority}.");
    Ok(())
}

async fn update_status(config: &Config, case_id: &str, status: &str, actor: &str) -> Result<()> {
    let app = App::build(config)?;
    let case_id = parse_case_id(case_id)?;
    let new_status: CaseStatus = status
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let (case, transition) = app
        .cases
        .set_status(case_id, new_status, Actor::Authority(actor.to_string()))
        .await?;
    app.dispatcher
        .notify(&case, EventKind::Transition(transition), RecipientClass::Citizen)
        .await?;
    println!("Case {case_id} is now {new_status}.");
    Ok(())
}

async fn mark_done(config: &Config, case_id: &str) -> Result<()> {
    let app = App::build(config)?;
    let case_id = parse_case_id(case_id)?;

    app.followup.request_confirmation(case_id).await?;
    println!("Confirmation request sent to the citizen for case {case_id}.");
    Ok(())
}

async fn confirm(config: &Config, case_id: &str, reply: &str) -> Result<()> {
    let app = App::build(config)?;
    let case_id = parse_case_id(case_id)?;

    match app.followup.handle_reply(case_id, reply).await? {
        FollowupOutcome::Resolved => println!("Case {case_id} confirmed resolved."),
        FollowupOutcome::Reopened => {
            println!("Case {case_id} reopened; the authority has been re-notified.")
        }
        FollowupOutcome::NotPending => {
            println!("No confirmation is pending for case {case_id}.")
        }
        FollowupOutcome::Unclear(message) => println!("{message}"),
    }
    Ok(())
}

async fn sweep(config: &Config) -> Result<()> {
    let app = App::build(config)?;

    let delivered = app.dispatcher.retry_sweep().await?;
    let reminders = app.followup.check_reminders(Utc::now()).await?;
    println!("Sweep done: {delivered} notifications delivered, {reminders} reminders sent.");
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("home:                {}", config.home_dir()?.display());
    println!("gateway endpoint:    {}", config.gateway.endpoint);
    println!("gateway model:       {}", config.gateway.model);
    println!("confidence threshold: {}", config.triage.confidence_threshold);
    println!("stall turn limit:    {}", config.dialogue.stall_turn_limit);
    println!("inactivity minutes:  {}", config.dialogue.inactivity_minutes);
    println!("dedup window (s):    {}", config.lifecycle.dedup_window_seconds);
    println!("confirm window (m):  {}", config.followup.confirm_window_minutes);
    println!(
        "notifications:       {}",
        if config.webhook.is_some() {
            "webhook"
        } else {
            "console"
        }
    );
    Ok(())
}

fn print_case(case: &Case) {
    println!("case:      {}", case.case_id);
    println!("category:  {}", case.category);
    println!("status:    {}", case.status);
    println!("citizen:   {}", case.citizen_ref);
    println!(
        "authority: {}",
        case.assigned_authority_ref.as_deref().unwrap_or("-")
    );
    println!("created:   {}", case.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("report:");
    for (name, value) in &case.structured_report {
        println!("  {name}: {}", value.display());
    }
    println!("history:");
    for entry in &case.status_history {
        println!(
            "  {}  {:8}  {}",
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.to_string(),
            entry.actor
        );
    }
}

fn parse_case_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid case id: {raw}"))
}

fn parse_status(raw: Option<&str>) -> Result<Option<CaseStatus>> {
    raw.map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
        .transpose()
}
