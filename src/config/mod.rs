//! Configuration system
//!
//! Handles loading configuration from multiple sources:
//! - Global config (~/.config/pr-sentinel/config.toml)
//! - Environment variables (PR_SENTINEL_*)
//!
//! Every tunable the monitor uses lives here so deployments can adjust
//! poll cadence, work hours, and bot filtering without a rebuild.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the GitHub CLI binary
    pub gh_binary: String,

    /// Dashboard binary launched (best-effort) when a monitor starts
    pub viewer_binary: String,

    /// Seconds between heartbeat progress lines while a tool call is in flight
    pub heartbeat_secs: u64,

    /// Milliseconds to wait after a trigger-file event before reading it
    pub trigger_settle_ms: u64,

    /// Slow polling down outside working hours; false polls around the clock
    pub enforce_work_hours: bool,

    /// Local hour the working day starts (polling slows down outside it)
    pub work_start_hour: u32,

    /// Local hour the working day ends
    pub work_end_hour: u32,

    /// Review/comment authors treated as CI noise and dropped
    pub ci_bot_logins: Vec<String>,

    /// Bot logins that are kept even though they appear in the bot set
    /// (AI reviewers whose comments the author is expected to address)
    pub kept_bot_logins: Vec<String>,

    /// Check names dropped before counting (pipeline-internal steps)
    pub noise_check_names: Vec<String>,

    /// Poll cadence settings
    pub poll: PollConfig,
}

/// Adaptive poll intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Interval while checks are pending or queued
    pub pending_secs: u64,

    /// Interval when no checks have been observed at all
    pub no_checks_secs: u64,

    /// Interval once every check has completed
    pub complete_secs: u64,

    /// Minimum sleep when entering the after-hours window
    pub after_hours_min_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            pending_secs: 60,
            no_checks_secs: 30,
            complete_secs: 120,
            after_hours_min_secs: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gh_binary: "gh".to_string(),
            viewer_binary: "pr-sentinel-dash".to_string(),
            heartbeat_secs: 30,
            trigger_settle_ms: 50,
            enforce_work_hours: true,
            work_start_hour: 9,
            work_end_hour: 18,
            ci_bot_logins: vec![
                "github-actions[bot]".to_string(),
                "github-actions".to_string(),
                "dependabot[bot]".to_string(),
                "codecov[bot]".to_string(),
                "vercel[bot]".to_string(),
                "netlify[bot]".to_string(),
                "sonarqubecloud[bot]".to_string(),
            ],
            kept_bot_logins: vec!["coderabbitai[bot]".to_string()],
            noise_check_names: vec![
                "Initialize job".to_string(),
                "Checkout".to_string(),
                "Post-job cleanup".to_string(),
                "Finalize".to_string(),
                "Summary".to_string(),
            ],
            poll: PollConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, layering file over defaults and env over file
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                config = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply PR_SENTINEL_* environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PR_SENTINEL_GH_BINARY") {
            if !v.is_empty() {
                self.gh_binary = v;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_VIEWER_BINARY") {
            if !v.is_empty() {
                self.viewer_binary = v;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_HEARTBEAT_SECS") {
            if let Ok(n) = v.parse() {
                self.heartbeat_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_TRIGGER_SETTLE_MS") {
            if let Ok(n) = v.parse() {
                self.trigger_settle_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_WORK_START_HOUR") {
            if let Ok(n) = v.parse() {
                self.work_start_hour = n;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_WORK_END_HOUR") {
            if let Ok(n) = v.parse() {
                self.work_end_hour = n;
            }
        }
        if let Ok(v) = std::env::var("PR_SENTINEL_CI_BOTS") {
            if !v.is_empty() {
                self.ci_bot_logins = v.split(',').map(|s| s.trim().to_string()).collect();
            }
        }
    }

    /// Path to the global config file
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "pr-sentinel", "pr-sentinel")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Data directory (process logs live here)
    pub fn data_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "pr-sentinel", "pr-sentinel")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// True when `login` should be dropped as CI noise
    pub fn is_ci_bot(&self, login: &str) -> bool {
        if self
            .kept_bot_logins
            .iter()
            .any(|kept| kept.eq_ignore_ascii_case(login))
        {
            return false;
        }
        self.ci_bot_logins
            .iter()
            .any(|bot| bot.eq_ignore_ascii_case(login))
    }

    /// True when a check name matches the noise filter set
    pub fn is_noise_check(&self, name: &str) -> bool {
        self.noise_check_names
            .iter()
            .any(|noise| name.eq_ignore_ascii_case(noise))
    }
}
