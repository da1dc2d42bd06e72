//! Typed records reduced from the platform's responses

use serde::{Deserialize, Serialize};

/// Core facts about the monitored pull request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrInfo {
    pub title: String,
    pub url: String,
    pub author: String,
    pub head_sha: String,
    pub head_branch: String,
    /// None while the platform is still computing mergeability
    pub mergeable: Option<bool>,
    pub mergeable_state: String,
    pub merged: bool,
}

impl PrInfo {
    /// True when the platform has settled on "this PR has conflicts"
    pub fn has_merge_conflict(&self) -> bool {
        self.mergeable == Some(false) && self.mergeable_state == "dirty"
    }
}

/// Aggregated check counts after noise filtering and dedup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub queued: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl CheckCounts {
    /// Any checks observed at all
    pub fn observed(&self) -> bool {
        self.total > 0
    }

    /// Nothing left running or waiting to run
    pub fn all_complete(&self) -> bool {
        self.observed() && self.pending == 0 && self.queued == 0
    }

    /// Complete with neither failures nor cancellations
    pub fn all_green(&self) -> bool {
        self.all_complete() && self.failed == 0 && self.cancelled == 0
    }
}

/// Details collected for each failed check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCheck {
    pub name: String,
    pub conclusion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// One round of check fetching: counts plus failure details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckSnapshot {
    pub counts: CheckCounts,
    pub failures: Vec<FailedCheck>,
}

/// Reviews reduced to who approves the current head and who approved a
/// previous one. A stale approval never counts as an approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewSnapshot {
    pub approvals: Vec<String>,
    pub stale_approvals: Vec<String>,
}

/// One unresolved review thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewThread {
    /// Platform thread identifier (used for resolution)
    pub id: String,
    /// Author of the first comment in the thread
    pub author: String,
    /// Body of the first comment
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub comment_count: usize,
    pub last_author: String,
    /// True when the PR author replied last (ball is with the reviewer)
    pub waiting_for_reply: bool,
}

impl ReviewThread {
    /// Short one-line excerpt for prompts and log records
    pub fn excerpt(&self) -> String {
        let line = self.body.lines().next().unwrap_or("");
        if line.chars().count() > 120 {
            let cut: String = line.chars().take(117).collect();
            format!("{cut}...")
        } else {
            line.to_string()
        }
    }
}
