//! Scripted platform client for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use pr_sentinel::config::Config;
use pr_sentinel::github::{
    CheckCounts, CheckSnapshot, MergeFailure, PlatformClient, PrInfo, ReviewSnapshot, ReviewThread,
};

/// A platform client whose every answer is set by the test.
///
/// `merge_after_polls` lets a test end an otherwise endless poll loop:
/// once `fetch_pr_info` has been called that many times, the PR reports
/// itself merged.
#[derive(Default)]
pub struct MockPlatform {
    pub info: Mutex<PrInfo>,
    pub checks: Mutex<CheckSnapshot>,
    pub reviews: Mutex<ReviewSnapshot>,
    pub threads: Mutex<Vec<ReviewThread>>,
    pub resolved: Mutex<Vec<String>>,
    pub pushed_builds: Mutex<Vec<String>>,
    pub merge_failure: Mutex<Option<MergeFailure>>,
    pub merge_calls: Mutex<Vec<bool>>,
    pub info_calls: AtomicUsize,
    pub merge_after_polls: AtomicUsize,
    /// Approvals to switch to after `approvals_after_polls` info fetches
    pub later_approvals: Mutex<Option<(usize, Vec<String>)>>,
}

impl MockPlatform {
    pub fn new(pr_number: u64) -> Self {
        let mock = Self::default();
        {
            let mut info = mock.info.lock().unwrap();
            info.title = "Add widget".to_string();
            info.url = format!("https://github.com/octo/widgets/pull/{pr_number}");
            info.author = "author".to_string();
            info.head_sha = "head0".to_string();
            info.head_branch = "feature/widget".to_string();
            info.mergeable = Some(true);
            info.mergeable_state = "clean".to_string();
        }
        mock.merge_after_polls.store(usize::MAX, Ordering::SeqCst);
        mock
    }

    pub fn set_checks(&self, passed: usize, failed: usize, pending: usize, queued: usize, cancelled: usize) {
        let mut checks = self.checks.lock().unwrap();
        checks.counts = CheckCounts {
            passed,
            failed,
            pending,
            queued,
            cancelled,
            total: passed + failed + pending + queued + cancelled,
        };
    }

    pub fn set_approvals(&self, logins: &[&str]) {
        self.reviews.lock().unwrap().approvals = logins.iter().map(|s| s.to_string()).collect();
    }

    pub fn add_thread(&self, id: &str, author: &str, waiting: bool) {
        self.threads.lock().unwrap().push(ReviewThread {
            id: id.to_string(),
            author: author.to_string(),
            body: format!("please fix {id}"),
            path: Some("src/lib.rs".to_string()),
            comment_count: if waiting { 2 } else { 1 },
            last_author: if waiting { "author" } else { author }.to_string(),
            waiting_for_reply: waiting,
        });
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn fetch_pr_info(&self) -> Result<PrInfo> {
        let calls = self.info_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut info = self.info.lock().unwrap().clone();
        if calls > self.merge_after_polls.load(Ordering::SeqCst) {
            info.merged = true;
        }
        if let Some((after, approvals)) = self.later_approvals.lock().unwrap().clone() {
            if calls > after {
                self.reviews.lock().unwrap().approvals = approvals;
            }
        }
        Ok(info)
    }

    async fn fetch_check_runs(&self, _head_sha: &str) -> Result<CheckSnapshot> {
        Ok(self.checks.lock().unwrap().clone())
    }

    async fn fetch_reviews(&self, _head_sha: &str) -> Result<ReviewSnapshot> {
        Ok(self.reviews.lock().unwrap().clone())
    }

    async fn fetch_unresolved_comments(&self, _pr_author: &str) -> Result<Vec<ReviewThread>> {
        Ok(self.threads.lock().unwrap().clone())
    }

    async fn resolve_thread(&self, thread_id: &str) -> Result<()> {
        self.resolved.lock().unwrap().push(thread_id.to_string());
        self.threads.lock().unwrap().retain(|t| t.id != thread_id);
        Ok(())
    }

    async fn fetch_current_user(&self) -> Result<String> {
        Ok("author".to_string())
    }

    async fn merge_pr(&self, admin: bool) -> std::result::Result<(), MergeFailure> {
        self.merge_calls.lock().unwrap().push(admin);
        match self.merge_failure.lock().unwrap().clone() {
            Some(failure) if !admin => Err(failure),
            _ => Ok(()),
        }
    }

    async fn push_empty_commit(&self, head_sha: &str, _branch: &str) -> Result<String> {
        let new_sha = format!("{head_sha}+1");
        self.pushed_builds.lock().unwrap().push(new_sha.clone());
        Ok(new_sha)
    }
}

/// Config tuned for tests: no real sleeps between poll iterations
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.poll.pending_secs = 0;
    config.poll.no_checks_secs = 0;
    config.poll.complete_secs = 0;
    config.poll.after_hours_min_secs = 0;
    // Tests run at arbitrary hours; disable the after-hours window
    config.enforce_work_hours = false;
    config.viewer_binary = "/nonexistent/pr-sentinel-dash".to_string();
    config
}
