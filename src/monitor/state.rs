//! The mutable record for one monitored PR
//!
//! Single-writer: only the owning session's `next_step`, poll worker, and
//! auto-execute paths touch it. Sub-flow states are meaningful only inside
//! the top-level states that name them and are reset whenever the monitor
//! returns to polling or stops.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::github::{CheckCounts, FailedCheck, ReviewThread};

/// Top-level monitor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPhase {
    Idle,
    Polling,
    TerminalDetected,
    AwaitingUser,
    ExecutingTask,
    Investigating,
    InvestigationResults,
    ApplyingFix,
    Stopped,
}

/// Comment sub-flow, subordinate to the top-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentFlow {
    None,
    SingleCommentPrompt,
    MultiCommentPrompt,
    AddressAllIterating,
    PickComment,
    PickRemaining,
}

/// CI-failure sub-flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiFlow {
    None,
    CiFailurePrompt,
    Investigating,
    InvestigationResults,
}

/// Aggregate signals that interrupt polling, in fixed priority order.
/// A CI failure can never be masked by an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalKind {
    NewComment,
    MergeConflict,
    CiFailure,
    CiCancelled,
    ApprovedCiGreen,
    CiPassedCommentsIgnored,
}

impl TerminalKind {
    /// The tag written into TERMINAL log records
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewComment => "new_comment",
            Self::MergeConflict => "merge_conflict",
            Self::CiFailure => "ci_failure",
            Self::CiCancelled => "ci_cancelled",
            Self::ApprovedCiGreen => "approved_and_ci_green",
            Self::CiPassedCommentsIgnored => "ci_passed_comments_pending",
        }
    }
}

/// Everything the monitor knows about one PR
#[derive(Debug, Clone)]
pub struct MonitorState {
    // Identity
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub author: String,
    pub head_sha: String,
    pub head_branch: String,
    pub session_dir: PathBuf,

    // Primary state
    pub phase: MonitorPhase,
    pub comment_flow: CommentFlow,
    pub ci_flow: CiFlow,
    pub last_terminal: Option<TerminalKind>,

    // Aggregated platform status
    pub checks: CheckCounts,
    pub failed_checks: Vec<FailedCheck>,
    pub approvals: Vec<String>,
    pub stale_approvals: Vec<String>,
    pub merge_conflict: bool,
    /// Needs-action threads, already filtered by the ignore set
    pub unresolved: Vec<ReviewThread>,
    pub waiting_for_reply: Vec<ReviewThread>,
    pub ignored_comment_ids: BTreeSet<String>,
    pub comment_iter_index: usize,
    pub active_waiting_comment: Option<ReviewThread>,
    pub findings: Option<String>,
    pub suggested_fix: Option<String>,
    pub issue_type: Option<String>,

    // Timing and policy
    pub poll_count: u64,
    pub last_poll_at: Option<DateTime<Local>>,
    pub after_hours_until: Option<DateTime<Local>>,
    /// Approval count captured when a merge was refused; ApprovedCiGreen
    /// cannot fire again until the count strictly exceeds it
    pub needs_additional_approval: Option<usize>,
    pub pending_resolve_after_address: bool,
}

impl MonitorState {
    pub fn new(owner: &str, repo: &str, number: u64, session_dir: &Path) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            title: String::new(),
            url: String::new(),
            author: String::new(),
            head_sha: String::new(),
            head_branch: String::new(),
            session_dir: session_dir.to_path_buf(),
            phase: MonitorPhase::Idle,
            comment_flow: CommentFlow::None,
            ci_flow: CiFlow::None,
            last_terminal: None,
            checks: CheckCounts::default(),
            failed_checks: Vec::new(),
            approvals: Vec::new(),
            stale_approvals: Vec::new(),
            merge_conflict: false,
            unresolved: Vec::new(),
            waiting_for_reply: Vec::new(),
            ignored_comment_ids: BTreeSet::new(),
            comment_iter_index: 0,
            active_waiting_comment: None,
            findings: None,
            suggested_fix: None,
            issue_type: None,
            poll_count: 0,
            last_poll_at: None,
            after_hours_until: None,
            needs_additional_approval: None,
            pending_resolve_after_address: false,
        }
    }

    // Derived session-file paths, one set per PR

    pub fn log_path(&self) -> PathBuf {
        self.session_file("log")
    }

    pub fn trigger_path(&self) -> PathBuf {
        self.session_file("trigger")
    }

    pub fn debug_log_path(&self) -> PathBuf {
        self.session_file("debug.log")
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.session_file("ignore-comments")
    }

    pub fn viewer_pid_path(&self) -> PathBuf {
        self.session_file("log.viewer.pid")
    }

    fn session_file(&self, suffix: &str) -> PathBuf {
        self.session_dir
            .join(format!("pr-monitor-{}.{suffix}", self.number))
    }

    /// Return to polling, resetting the sub-flows
    pub fn enter_polling(&mut self) {
        self.phase = MonitorPhase::Polling;
        self.comment_flow = CommentFlow::None;
        self.ci_flow = CiFlow::None;
        self.comment_iter_index = 0;
        self.active_waiting_comment = None;
        self.pending_resolve_after_address = false;
    }

    /// Terminal stop, resetting the sub-flows
    pub fn enter_stopped(&mut self) {
        self.phase = MonitorPhase::Stopped;
        self.comment_flow = CommentFlow::None;
        self.ci_flow = CiFlow::None;
        self.active_waiting_comment = None;
        self.pending_resolve_after_address = false;
    }

    /// The comment the iterating flows currently point at
    pub fn current_comment(&self) -> Option<&ReviewThread> {
        self.unresolved.get(self.comment_iter_index)
    }

    /// Add ids to the ignore set; the set only grows within a session
    pub fn ignore_comment_ids<I: IntoIterator<Item = String>>(&mut self, ids: I) {
        self.ignored_comment_ids.extend(ids);
    }

    /// Drop a thread from the unresolved list once it has been resolved
    pub fn remove_unresolved(&mut self, thread_id: &str) {
        self.unresolved.retain(|t| t.id != thread_id);
        if self.comment_iter_index > self.unresolved.len() {
            self.comment_iter_index = self.unresolved.len();
        }
    }

    /// Load the ignore-list file if present (one id per line)
    pub fn load_ignores(&mut self) {
        let path = self.ignore_path();
        if let Ok(content) = std::fs::read_to_string(&path) {
            for line in content.lines() {
                let id = line.trim();
                if !id.is_empty() {
                    self.ignored_comment_ids.insert(id.to_string());
                }
            }
        }
    }

    /// Persist the ignore set as a whole-file replacement. Write failures
    /// are logged and swallowed; the monitor never fails on housekeeping.
    pub fn persist_ignores(&self) {
        let path = self.ignore_path();
        let mut content = String::new();
        for id in &self.ignored_comment_ids {
            content.push_str(id);
            content.push('\n');
        }
        if let Err(err) = std::fs::write(&path, content) {
            tracing::warn!("failed to persist ignore list {}: {err}", path.display());
        }
    }

    /// Short human description of the phase, for heartbeats and logs
    pub fn phase_description(&self) -> &'static str {
        match self.phase {
            MonitorPhase::Idle => "idle",
            MonitorPhase::Polling => "polling the PR",
            MonitorPhase::TerminalDetected => "processing a terminal condition",
            MonitorPhase::AwaitingUser => "waiting on the user's choice",
            MonitorPhase::ExecutingTask => "executing a task",
            MonitorPhase::Investigating => "investigating a CI failure",
            MonitorPhase::InvestigationResults => "presenting investigation results",
            MonitorPhase::ApplyingFix => "applying a fix",
            MonitorPhase::Stopped => "stopped",
        }
    }
}
