//! Platform Fetcher
//!
//! Reduces the platform's noisy responses to the typed records in
//! [`super::types`]: merges modern check runs with legacy commit statuses,
//! filters pipeline-internal noise, classifies approvals against the
//! current head, and splits unresolved review threads into needs-action
//! and waiting-for-reply.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{sleep, Duration};

use crate::config::Config;

use super::cli::GhCli;
use super::types::{CheckCounts, CheckSnapshot, FailedCheck, PrInfo, ReviewSnapshot, ReviewThread};
use super::{MergeFailure, PlatformClient};

/// Failed-check output titles are clipped to this many characters
const FAILURE_TITLE_MAX: usize = 140;

const REVIEW_THREADS_QUERY: &str = "\
query($owner: String!, $name: String!, $number: Int!) {
  repository(owner: $owner, name: $name) {
    pullRequest(number: $number) {
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          path
          comments(first: 50) {
            nodes { author { login } body }
          }
        }
      }
    }
  }
}";

const RESOLVE_THREAD_MUTATION: &str = "\
mutation($id: ID!) {
  resolveReviewThread(input: { threadId: $id }) {
    thread { id }
  }
}";

/// Production [`PlatformClient`] backed by the `gh` CLI
pub struct GhPlatformClient {
    pub(super) gh: GhCli,
    pub(super) owner: String,
    pub(super) repo: String,
    pub(super) number: u64,
    pub(super) config: Arc<Config>,
}

impl GhPlatformClient {
    pub fn new(owner: &str, repo: &str, number: u64, config: Arc<Config>) -> Self {
        Self {
            gh: GhCli::new(&config.gh_binary),
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            config,
        }
    }

    pub(super) fn repo_path(&self, rest: &str) -> String {
        format!("repos/{}/{}/{}", self.owner, self.repo, rest)
    }
}

#[async_trait]
impl PlatformClient for GhPlatformClient {
    async fn fetch_pr_info(&self) -> Result<PrInfo> {
        let path = self.repo_path(&format!("pulls/{}", self.number));
        let body = self.gh.run_json(&["api", &path]).await?;
        parse_pr_info(&body)
    }

    async fn fetch_check_runs(&self, head_sha: &str) -> Result<CheckSnapshot> {
        let runs_path = self.repo_path(&format!("commits/{head_sha}/check-runs?per_page=100"));
        let runs = self.gh.run_json(&["api", &runs_path]).await?;

        let statuses_path = self.repo_path(&format!("commits/{head_sha}/statuses?per_page=100"));
        let statuses = self.gh.run_json(&["api", &statuses_path]).await?;

        Ok(merge_check_payloads(&runs, &statuses, &self.config))
    }

    async fn fetch_reviews(&self, head_sha: &str) -> Result<ReviewSnapshot> {
        let path = self.repo_path(&format!("pulls/{}/reviews?per_page=100", self.number));
        let body = self.gh.run_json(&["api", &path]).await?;
        Ok(classify_reviews(&body, head_sha, &self.config))
    }

    async fn fetch_unresolved_comments(&self, pr_author: &str) -> Result<Vec<ReviewThread>> {
        let number_arg = format!("number={}", self.number);
        let owner_arg = format!("owner={}", self.owner);
        let name_arg = format!("name={}", self.repo);
        let query_arg = format!("query={REVIEW_THREADS_QUERY}");
        let body = self
            .gh
            .run_json(&[
                "api",
                "graphql",
                "-f",
                &query_arg,
                "-f",
                &owner_arg,
                "-f",
                &name_arg,
                "-F",
                &number_arg,
            ])
            .await?;
        Ok(classify_review_threads(&body, pr_author, &self.config))
    }

    async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        let query_arg = format!("query={RESOLVE_THREAD_MUTATION}");
        let id_arg = format!("id={thread_id}");
        let args: [&str; 6] = ["api", "graphql", "-f", &query_arg, "-f", &id_arg];

        match self.gh.run(&args).await {
            Ok(_) => Ok(()),
            Err(first) => {
                // One silent retry; review threads occasionally 502 right
                // after a reply lands.
                tracing::debug!("resolve_thread retrying after: {first:#}");
                sleep(Duration::from_secs(1)).await;
                self.gh
                    .run(&args)
                    .await
                    .map(|_| ())
                    .context("resolve_thread failed after retry")
            }
        }
    }

    async fn fetch_current_user(&self) -> Result<String> {
        let body = self.gh.run_json(&["api", "user"]).await?;
        body.get("login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("user payload missing login")
    }

    async fn merge_pr(&self, admin: bool) -> std::result::Result<(), MergeFailure> {
        super::execute::merge_pr(self, admin).await
    }

    async fn push_empty_commit(&self, head_sha: &str, branch: &str) -> Result<String> {
        super::execute::push_empty_commit(self, head_sha, branch).await
    }
}

pub(super) fn parse_pr_info(body: &Value) -> Result<PrInfo> {
    Ok(PrInfo {
        title: str_field(body, "title"),
        url: str_field(body, "html_url"),
        author: body
            .pointer("/user/login")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        head_sha: body
            .pointer("/head/sha")
            .and_then(Value::as_str)
            .context("pull payload missing head.sha")?
            .to_string(),
        head_branch: body
            .pointer("/head/ref")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        mergeable: body.get("mergeable").and_then(Value::as_bool),
        mergeable_state: str_field(body, "mergeable_state"),
        merged: body.get("merged").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn str_field(body: &Value, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckClass {
    Passed,
    Failed,
    Pending,
    Queued,
    Cancelled,
}

/// Classify one modern check run by status and conclusion
fn classify_check_run(status: &str, conclusion: Option<&str>) -> CheckClass {
    match status {
        "queued" => CheckClass::Queued,
        "in_progress" => CheckClass::Pending,
        _ => match conclusion.unwrap_or("") {
            "success" | "skipped" | "neutral" => CheckClass::Passed,
            "cancelled" => CheckClass::Cancelled,
            // failure, timed_out, action_required, stale, anything new
            _ => CheckClass::Failed,
        },
    }
}

/// Classify one legacy commit status
fn classify_legacy_status(state: &str) -> Option<CheckClass> {
    match state {
        "pending" => Some(CheckClass::Pending),
        "success" => Some(CheckClass::Passed),
        "failure" | "error" => Some(CheckClass::Failed),
        _ => None,
    }
}

/// Merge modern check runs and legacy statuses into one snapshot.
///
/// Noise names are dropped, then entries are deduplicated by
/// case-insensitive name with the first occurrence winning, which mirrors
/// what the platform UI displays.
pub fn merge_check_payloads(runs: &Value, statuses: &Value, config: &Config) -> CheckSnapshot {
    let mut snapshot = CheckSnapshot::default();
    let mut seen: HashSet<String> = HashSet::new();

    let empty = Vec::new();
    let run_nodes = runs
        .get("check_runs")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    for run in run_nodes {
        let name = run.get("name").and_then(Value::as_str).unwrap_or("");
        if name.is_empty() || config.is_noise_check(name) {
            continue;
        }
        if !seen.insert(name.to_ascii_lowercase()) {
            continue;
        }

        let status = run.get("status").and_then(Value::as_str).unwrap_or("");
        let conclusion = run.get("conclusion").and_then(Value::as_str);
        let class = classify_check_run(status, conclusion);
        tally(&mut snapshot.counts, class);

        if class == CheckClass::Failed {
            snapshot.failures.push(FailedCheck {
                name: name.to_string(),
                conclusion: conclusion.unwrap_or("failure").to_string(),
                title: run
                    .pointer("/output/title")
                    .and_then(Value::as_str)
                    .map(|t| truncate_chars(t, FAILURE_TITLE_MAX)),
                details_url: run
                    .get("details_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                external_id: run
                    .get("external_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            });
        }
    }

    // Legacy statuses arrive newest first; the name dedup keeps the latest
    // state per context and skips contexts already covered by a check run.
    let status_nodes = statuses.as_array().unwrap_or(&empty);
    for status in status_nodes {
        let context = status.get("context").and_then(Value::as_str).unwrap_or("");
        if context.is_empty() || config.is_noise_check(context) {
            continue;
        }
        if !seen.insert(context.to_ascii_lowercase()) {
            continue;
        }

        let state = status.get("state").and_then(Value::as_str).unwrap_or("");
        let Some(class) = classify_legacy_status(state) else {
            continue;
        };
        tally(&mut snapshot.counts, class);

        if class == CheckClass::Failed {
            snapshot.failures.push(FailedCheck {
                name: context.to_string(),
                conclusion: state.to_string(),
                title: status
                    .get("description")
                    .and_then(Value::as_str)
                    .map(|t| truncate_chars(t, FAILURE_TITLE_MAX)),
                details_url: status
                    .get("target_url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                external_id: None,
            });
        }
    }

    snapshot
}

fn tally(counts: &mut CheckCounts, class: CheckClass) {
    counts.total += 1;
    match class {
        CheckClass::Passed => counts.passed += 1,
        CheckClass::Failed => counts.failed += 1,
        CheckClass::Pending => counts.pending += 1,
        CheckClass::Queued => counts.queued += 1,
        CheckClass::Cancelled => counts.cancelled += 1,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Keep the chronologically last review per user, drop CI bots, and split
/// APPROVED reviews into current-head approvals and stale approvals.
pub fn classify_reviews(body: &Value, head_sha: &str, config: &Config) -> ReviewSnapshot {
    let empty = Vec::new();
    let reviews = body.as_array().unwrap_or(&empty);

    // Reviews arrive in submission order; later entries replace earlier
    // ones for the same login.
    let mut last_per_user: Vec<(&str, &Value)> = Vec::new();
    for review in reviews {
        let Some(login) = review.pointer("/user/login").and_then(Value::as_str) else {
            continue;
        };
        if config.is_ci_bot(login) {
            continue;
        }
        if let Some(slot) = last_per_user.iter_mut().find(|(user, _)| *user == login) {
            slot.1 = review;
        } else {
            last_per_user.push((login, review));
        }
    }

    let mut snapshot = ReviewSnapshot::default();
    for (login, review) in last_per_user {
        let state = review.get("state").and_then(Value::as_str).unwrap_or("");
        if state != "APPROVED" {
            continue;
        }
        let commit = review
            .get("commit_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        if commit == head_sha {
            snapshot.approvals.push(login.to_string());
        } else {
            snapshot.stale_approvals.push(login.to_string());
        }
    }
    snapshot
}

/// Drop resolved and bot-opened threads, then classify the rest.
///
/// A thread is waiting-for-reply when it has at least two comments and the
/// last commenter is the PR author; otherwise it needs the author's action.
pub fn classify_review_threads(body: &Value, pr_author: &str, config: &Config) -> Vec<ReviewThread> {
    let empty = Vec::new();
    let nodes = body
        .pointer("/data/repository/pullRequest/reviewThreads/nodes")
        .and_then(Value::as_array)
        .unwrap_or(&empty);

    let mut threads = Vec::new();
    for node in nodes {
        if node
            .get("isResolved")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }
        let Some(comments) = node.pointer("/comments/nodes").and_then(Value::as_array) else {
            continue;
        };
        if comments.is_empty() {
            continue;
        }

        let author = comments[0]
            .pointer("/author/login")
            .and_then(Value::as_str)
            .unwrap_or("");
        if author.is_empty() || config.is_ci_bot(author) {
            continue;
        }

        let last_author = comments
            .last()
            .and_then(|c| c.pointer("/author/login"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let id = node.get("id").and_then(Value::as_str).unwrap_or("");
        if id.is_empty() {
            continue;
        }

        threads.push(ReviewThread {
            id: id.to_string(),
            author: author.to_string(),
            body: comments[0]
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            path: node
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string),
            comment_count: comments.len(),
            last_author: last_author.to_string(),
            waiting_for_reply: comments.len() >= 2 && last_author == pr_author,
        });
    }
    threads
}
