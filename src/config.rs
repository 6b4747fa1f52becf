//! Configuration for caseline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CASELINE_HOME)
//! 2. Config file (.caseline/config.yaml)
//! 3. Defaults (~/.caseline, conservative tunables)
//!
//! Config file discovery:
//! - Searches current directory and parents for .caseline/config.yaml
//!
//! Triage thresholds, interview bounds, the dedup window, and retry policy
//! are deployment parameters, never hard-coded at call sites.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dialogue::DialogueSettings;
use crate::gateway::{HttpGatewayConfig, RetryPolicy};
use crate::notify::webhook::WebhookConfig;

/// Classification tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageSettings {
    /// Confidence below this routes to "unclear" and the category menu
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.75
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Interview tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct DialogueSection {
    /// Consecutive no-information turns before abandoning
    #[serde(default = "default_stall_turn_limit")]
    pub stall_turn_limit: u32,

    /// Minutes of silence before a session is abandoned
    #[serde(default = "default_inactivity_minutes")]
    pub inactivity_minutes: i64,
}

fn default_stall_turn_limit() -> u32 {
    5
}
fn default_inactivity_minutes() -> i64 {
    30
}

impl Default for DialogueSection {
    fn default() -> Self {
        Self {
            stall_turn_limit: default_stall_turn_limit(),
            inactivity_minutes: default_inactivity_minutes(),
        }
    }
}

/// Case lifecycle tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSettings {
    /// Window in which an identical resubmission returns the existing case
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: i64,
}

fn default_dedup_window_seconds() -> i64 {
    300
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            dedup_window_seconds: default_dedup_window_seconds(),
        }
    }
}

/// Follow-up tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowupSettings {
    /// Minutes to wait for a confirmation before the single reminder
    #[serde(default = "default_confirm_window_minutes")]
    pub confirm_window_minutes: i64,
}

fn default_confirm_window_minutes() -> i64 {
    240
}

impl Default for FollowupSettings {
    fn default() -> Self {
        Self {
            confirm_window_minutes: default_confirm_window_minutes(),
        }
    }
}

/// The full resolved configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Data directory (database lives here)
    #[serde(default)]
    pub home: Option<PathBuf>,

    #[serde(default)]
    pub gateway: HttpGatewayConfig,

    #[serde(default)]
    pub triage: TriageSettings,

    #[serde(default)]
    pub dialogue: DialogueSection,

    #[serde(default)]
    pub lifecycle: LifecycleSettings,

    #[serde(default)]
    pub followup: FollowupSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Optional webhook notification endpoints; console output otherwise
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: None,
            gateway: HttpGatewayConfig::default(),
            triage: TriageSettings::default(),
            dialogue: DialogueSection::default(),
            lifecycle: LifecycleSettings::default(),
            followup: FollowupSettings::default(),
            retry: RetryPolicy::default(),
            webhook: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => load_config_file(&path)?,
            None => Config::default(),
        };

        if let Ok(env_home) = std::env::var("CASELINE_HOME") {
            config.home = Some(PathBuf::from(env_home));
        }
        Ok(config)
    }

    /// Resolved data directory: explicit setting, else ~/.caseline.
    pub fn home_dir(&self) -> Result<PathBuf> {
        if let Some(home) = &self.home {
            return Ok(home.clone());
        }
        Ok(dirs::home_dir()
            .context("failed to determine home directory")?
            .join(".caseline"))
    }

    /// Path to the SQLite database file.
    pub fn db_path(&self) -> Result<PathBuf> {
        Ok(self.home_dir()?.join("caseline.db"))
    }

    pub fn dialogue_settings(&self) -> DialogueSettings {
        DialogueSettings {
            stall_turn_limit: self.dialogue.stall_turn_limit,
            inactivity: chrono::Duration::minutes(self.dialogue.inactivity_minutes),
        }
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lifecycle.dedup_window_seconds)
    }

    pub fn confirm_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.followup.confirm_window_minutes)
    }
}

/// Find config file by searching current directory and parents.
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".caseline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file.
fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.triage.confidence_threshold, 0.75);
        assert_eq!(config.dialogue.stall_turn_limit, 5);
        assert_eq!(config.lifecycle.dedup_window_seconds, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let caseline_dir = temp.path().join(".caseline");
        std::fs::create_dir_all(&caseline_dir).unwrap();

        let config_path = caseline_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
home: /var/lib/caseline
triage:
  confidence_threshold: 0.6
dialogue:
  stall_turn_limit: 3
  inactivity_minutes: 15
followup:
  confirm_window_minutes: 60
gateway:
  model: gpt-4o-mini
  timeout_seconds: 20
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.home, Some(PathBuf::from("/var/lib/caseline")));
        assert_eq!(config.triage.confidence_threshold, 0.6);
        assert_eq!(config.dialogue.stall_turn_limit, 3);
        assert_eq!(config.followup.confirm_window_minutes, 60);
        assert_eq!(config.gateway.timeout_seconds, 20);
        // Sections not mentioned keep their defaults.
        assert_eq!(config.lifecycle.dedup_window_seconds, 300);
    }

    #[test]
    fn test_window_conversions() {
        let config = Config::default();
        assert_eq!(config.dedup_window(), chrono::Duration::seconds(300));
        assert_eq!(config.confirm_window(), chrono::Duration::minutes(240));
        assert_eq!(
            config.dialogue_settings().inactivity,
            chrono::Duration::minutes(30)
        );
    }
}
