//! Subprocess wrapper for the `gh` CLI
//!
//! The single place the monitor spawns the platform helper. Arguments are
//! passed as an argv vector (no shell interpretation), both streams are
//! captured, and a non-zero exit is classified as a transport error
//! carrying the first stderr line.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

const GH_TIMEOUT_SECS: u64 = 60;

/// Handle to the `gh` binary
#[derive(Debug, Clone)]
pub struct GhCli {
    binary: String,
}

impl GhCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `gh` with the given arguments and return trimmed stdout
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GH_PROMPT_DISABLED", "1")
            .env("GH_NO_UPDATE_NOTIFIER", "1")
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = timeout(Duration::from_secs(GH_TIMEOUT_SECS), cmd.output())
            .await
            .with_context(|| format!("gh {} timed out", args.first().unwrap_or(&"")))?
            .with_context(|| format!("failed to spawn {}", self.binary))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let detail = stderr
                .lines()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no error output");
            tracing::debug!(
                args = %args.join(" "),
                code = output.status.code().unwrap_or(-1),
                "gh call failed: {detail}"
            );
            bail!(
                "gh {} exited with {}: {detail}",
                args.first().unwrap_or(&""),
                output.status.code().unwrap_or(-1)
            );
        }

        Ok(stdout.trim().to_string())
    }

    /// Run `gh` and parse stdout as JSON
    pub async fn run_json(&self, args: &[&str]) -> Result<Value> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("gh {} returned unparseable JSON", args.join(" ")))
    }
}
