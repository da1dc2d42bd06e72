//! GitHub platform access
//!
//! Everything the monitor knows about GitHub goes through the
//! [`PlatformClient`] trait. The production implementation shells out to
//! the `gh` CLI; tests substitute a scripted mock.

pub mod cli;
pub mod execute;
pub mod fetch;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use cli::GhCli;
pub use fetch::GhPlatformClient;
pub use types::{
    CheckCounts, CheckSnapshot, FailedCheck, PrInfo, ReviewSnapshot, ReviewThread,
};

/// Outcome of a merge attempt that did not succeed.
///
/// Policy failures (branch protection, missing approvals) get a different
/// recovery menu than transport failures, so the distinction is preserved
/// here rather than flattened into an error string.
#[derive(Debug, Clone)]
pub struct MergeFailure {
    pub policy_blocked: bool,
    pub message: String,
}

impl std::fmt::Display for MergeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Read and mutate operations against the hosted platform.
///
/// All fetch operations may fail with a transport error; callers log it and
/// retry on the next poll. The mutating operations report failures as data
/// (see [`MergeFailure`]) because the monitor turns them into menus, not
/// into protocol errors.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Title, head sha/branch, URL, author, mergeability, merged flag
    async fn fetch_pr_info(&self) -> Result<PrInfo>;

    /// Modern check runs and legacy commit statuses, merged and classified
    async fn fetch_check_runs(&self, head_sha: &str) -> Result<CheckSnapshot>;

    /// Last review per user, split into current and stale approvals
    async fn fetch_reviews(&self, head_sha: &str) -> Result<ReviewSnapshot>;

    /// Unresolved review threads, classified needs-action vs waiting-for-reply
    async fn fetch_unresolved_comments(&self, pr_author: &str) -> Result<Vec<ReviewThread>>;

    /// Resolve one review thread; at most one silent retry inside
    async fn resolve_thread(&self, thread_id: &str) -> Result<()>;

    /// Login of the authenticated session
    async fn fetch_current_user(&self) -> Result<String>;

    /// Squash-merge the PR; `admin` bypasses branch policy
    async fn merge_pr(&self, admin: bool) -> std::result::Result<(), MergeFailure>;

    /// Push an empty commit to the head branch; returns the new head sha
    async fn push_empty_commit(&self, head_sha: &str, branch: &str) -> Result<String>;
}
