//! Session Supervisor
//!
//! One `MonitorSession` per PR: it owns the state record, the cancellable
//! poll worker, the trigger-file watcher, and the heartbeat guard. The
//! state is mutated only with the session's state lock held (`next_step`
//! and the poll worker it runs); the watcher touches only the
//! pending-trigger slot.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Timelike};
use notify::{RecursiveMode, Watcher};
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::config::Config;
use crate::github::{CheckCounts, PlatformClient};

use super::directive::Directive;
use super::engine;
use super::log::{LogRecord, StatusLog, StatusSnapshot};
use super::state::{MonitorPhase, MonitorState};

/// Content of the trigger file, written by the dashboard
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Open the action menu for a waiting-for-reply thread
    Action(String),
    /// Extend the after-hours window by two hours
    Extend,
    /// Bare content: wake up and re-poll
    Wake,
}

/// Parse one trigger-file payload
pub fn parse_trigger(content: &str) -> Option<Trigger> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(id) = trimmed.strip_prefix("ACTION|") {
        let id = id.trim();
        if id.is_empty() {
            return Some(Trigger::Wake);
        }
        return Some(Trigger::Action(id.to_string()));
    }
    if trimmed.starts_with("EXTEND|") {
        return Some(Trigger::Extend);
    }
    Some(Trigger::Wake)
}

/// How one poll worker run ended
#[derive(Debug)]
pub enum PollOutcome {
    /// Something to tell the LLM
    Directive(Directive),
    /// A newer worker replaced this one; return silently
    TakenOver,
}

/// Per-PR session: state, poll worker, watcher, heartbeat
pub struct MonitorSession {
    pub id: String,
    pub number: u64,
    pub state: Mutex<MonitorState>,
    pub log: StatusLog,
    client: Arc<dyn PlatformClient>,
    config: Arc<Config>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    poll_generation: AtomicU64,
    trigger_pending: parking_lot::Mutex<Option<Trigger>>,
    trigger_notify: Notify,
    debug_path: PathBuf,
    // Kept alive for the session's lifetime; dropping it stops the events
    _watcher: parking_lot::Mutex<Option<notify::RecommendedWatcher>>,
}

impl MonitorSession {
    pub fn new(
        id: String,
        state: MonitorState,
        client: Arc<dyn PlatformClient>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let log = StatusLog::new(state.log_path());
        let debug_path = state.debug_log_path();
        let trigger_path = state.trigger_path();
        let session = Arc::new(Self {
            id,
            number: state.number,
            state: Mutex::new(state),
            log,
            client,
            config,
            cancel_tx,
            cancel_rx,
            poll_generation: AtomicU64::new(0),
            trigger_pending: parking_lot::Mutex::new(None),
            trigger_notify: Notify::new(),
            debug_path,
            _watcher: parking_lot::Mutex::new(None),
        });
        session.start_trigger_watcher(trigger_path);
        session
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Trip the session's cancellation signal (stop / shutdown)
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        self.trigger_notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Claim the poll worker slot: any sleeping predecessor observes the
    /// new generation on its next wake and retires silently.
    pub fn claim_poll_worker(&self) -> u64 {
        let generation = self.poll_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.trigger_notify.notify_waiters();
        generation
    }

    /// Take a trigger published by the watcher, if any
    pub fn take_pending_trigger(&self) -> Option<Trigger> {
        self.trigger_pending.lock().take()
    }

    /// Peek whether an ACTION trigger is waiting (next_step short-circuit)
    pub fn pending_action(&self) -> Option<String> {
        let mut slot = self.trigger_pending.lock();
        match &*slot {
            Some(Trigger::Action(id)) => {
                let id = id.clone();
                *slot = None;
                Some(id)
            }
            _ => None,
        }
    }

    fn publish_trigger(&self, trigger: Trigger) {
        *self.trigger_pending.lock() = Some(trigger);
        self.trigger_notify.notify_waiters();
    }

    /// Append a line to the per-PR debug log; failures are swallowed
    pub fn debug_log(&self, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.debug_path)
            .and_then(|mut f| writeln!(f, "[{stamp}] {message}"));
        if result.is_err() {
            debug!("debug log write failed for {}", self.id);
        }
    }

    /// The blocking poll loop. Runs with the state lock held by the
    /// calling `next_step`; returns when a terminal fires, a trigger
    /// demands attention, cancellation trips, or a newer worker takes
    /// over.
    pub async fn run_poll_loop(
        &self,
        state: &mut MonitorState,
        my_generation: u64,
    ) -> PollOutcome {
        let mut paused_logged = false;

        loop {
            if self.is_cancelled() {
                return PollOutcome::Directive(Directive::stop("Monitoring stopped."));
            }
            if self.poll_generation.load(Ordering::SeqCst) != my_generation {
                return PollOutcome::TakenOver;
            }

            // A trigger captured during sleep is observed strictly before
            // the next natural poll tick.
            if let Some(trigger) = self.take_pending_trigger() {
                match trigger {
                    Trigger::Extend => {
                        let now = Local::now();
                        let base = state.after_hours_until.filter(|t| *t > now).unwrap_or(now);
                        state.after_hours_until = Some(base + ChronoDuration::hours(2));
                        self.log.append(&LogRecord::Resuming(
                            "After-hours window extended by two hours.".to_string(),
                        ));
                        paused_logged = false;
                        continue;
                    }
                    Trigger::Action(thread_id) => {
                        if let Some(thread) = state
                            .waiting_for_reply
                            .iter()
                            .find(|t| t.id == thread_id)
                            .cloned()
                        {
                            let directive = engine::build_waiting_menu(state, thread);
                            return PollOutcome::Directive(directive);
                        }
                        debug!("ACTION trigger for unknown thread {thread_id}; ignoring");
                        continue;
                    }
                    Trigger::Wake => continue,
                }
            }

            match self.poll_once(state).await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(err) => {
                    self.debug_log(&format!("poll fetch failed: {err:#}"));
                    self.log
                        .append(&LogRecord::Error(format!("fetch failed: {err:#}")));
                }
            }

            let plan = plan_next_sleep(
                Local::now(),
                &state.checks,
                state.after_hours_until,
                &self.config,
            );
            if plan.after_hours {
                if !paused_logged {
                    self.log.append(&LogRecord::Paused(format!(
                        "After hours; sleeping {}s until the next working window.",
                        plan.sleep.as_secs()
                    )));
                    paused_logged = true;
                }
            } else {
                paused_logged = false;
            }

            let mut cancel_rx = self.cancel_rx.clone();
            tokio::select! {
                _ = sleep(plan.sleep) => {}
                _ = self.trigger_notify.notified() => {}
                _ = cancel_rx.changed() => {}
            }
        }
    }

    /// One read-and-classify cycle. `Ok(Some(..))` ends the loop,
    /// `Ok(None)` continues it, `Err` is a transient fetch failure.
    async fn poll_once(&self, state: &mut MonitorState) -> anyhow::Result<Option<PollOutcome>> {
        let info = self.client.fetch_pr_info().await?;
        if info.merged {
            state.enter_stopped();
            self.log
                .append(&LogRecord::Stopped("PR was merged.".to_string()));
            return Ok(Some(PollOutcome::Directive(Directive::merged(format!(
                "PR #{} was merged.",
                state.number
            )))));
        }

        state.title = info.title.clone();
        state.url = info.url.clone();
        state.head_sha = info.head_sha.clone();
        state.head_branch = info.head_branch.clone();
        if !info.author.is_empty() {
            state.author = info.author.clone();
        }
        state.merge_conflict = info.has_merge_conflict();

        let checks = self.client.fetch_check_runs(&state.head_sha).await?;
        state.checks = checks.counts;
        state.failed_checks = checks.failures;

        let reviews = self.client.fetch_reviews(&state.head_sha).await?;
        state.approvals = reviews.approvals;
        state.stale_approvals = reviews.stale_approvals;

        // Filter by the ignore set before splitting needs-action from
        // waiting-for-reply.
        let mut threads = self.client.fetch_unresolved_comments(&state.author).await?;
        threads.retain(|t| !state.ignored_comment_ids.contains(&t.id));
        let (waiting, needs_action): (Vec<_>, Vec<_>) =
            threads.into_iter().partition(|t| t.waiting_for_reply);
        state.unresolved = needs_action;
        state.waiting_for_reply = waiting;

        state.poll_count += 1;
        state.last_poll_at = Some(Local::now());

        let plan = plan_next_sleep(
            Local::now(),
            &state.checks,
            state.after_hours_until,
            &self.config,
        );
        self.log.append(&LogRecord::Status(StatusSnapshot::capture(
            state,
            plan.sleep.as_secs(),
            plan.after_hours,
        )));

        if let Some(kind) = engine::detect_terminal(state) {
            state.phase = MonitorPhase::TerminalDetected;
            let directive = engine::build_terminal(state, kind);
            self.log.append(&LogRecord::Terminal {
                kind,
                description: directive.question.clone().unwrap_or_default(),
            });
            return Ok(Some(PollOutcome::Directive(directive)));
        }

        Ok(None)
    }

    /// Watch the trigger file's directory; on create/modify, wait the
    /// settle delay, read the file, delete it, and publish the content.
    fn start_trigger_watcher(self: &Arc<Self>, trigger_path: PathBuf) {
        let Some(watch_dir) = trigger_path.parent().map(PathBuf::from) else {
            warn!("{}: trigger path has no parent; watcher disabled", self.id);
            return;
        };

        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let watched = trigger_path.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let Ok(event) = result else { return };
            let relevant = matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) && event.paths.iter().any(|p| p == &watched);
            if relevant {
                let _ = event_tx.send(());
            }
        });

        let mut watcher = match watcher {
            Ok(w) => w,
            Err(err) => {
                warn!("{}: trigger watcher failed to start: {err}", self.id);
                return;
            }
        };
        if let Err(err) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
            warn!("{}: cannot watch {}: {err}", self.id, watch_dir.display());
            return;
        }
        *self._watcher.lock() = Some(watcher);

        let session = Arc::clone(self);
        let settle = Duration::from_millis(self.config.trigger_settle_ms);
        tokio::spawn(async move {
            let mut cancel_rx = session.cancel_rx.clone();
            loop {
                tokio::select! {
                    received = event_rx.recv() => {
                        if received.is_none() {
                            break;
                        }
                        // Let the writer finish before reading
                        sleep(settle).await;
                        match std::fs::read_to_string(&trigger_path) {
                            Ok(content) => {
                                let _ = std::fs::remove_file(&trigger_path);
                                if let Some(trigger) = parse_trigger(&content) {
                                    debug!("{}: trigger {trigger:?}", session.id);
                                    session.publish_trigger(trigger);
                                }
                            }
                            Err(_) => {
                                // Already consumed or not yet visible
                            }
                        }
                    }
                    _ = cancel_rx.changed() => break,
                }
            }
        });
    }

    /// Emit a heartbeat line through `emit` every heartbeat interval until
    /// the guard is dropped.
    pub fn start_heartbeat(
        self: &Arc<Self>,
        emit: impl Fn(String) + Send + Sync + 'static,
    ) -> HeartbeatGuard {
        let session = Arc::clone(self);
        let interval = Duration::from_secs(self.config.heartbeat_secs.max(1));
        let handle = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let phase = session
                    .state
                    .try_lock()
                    .map(|s| s.phase_description())
                    .unwrap_or("working");
                emit(format!("{}: still {phase}", session.id));
            }
        });
        HeartbeatGuard { handle }
    }
}

/// Aborts the heartbeat task when dropped
pub struct HeartbeatGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The adaptive sleep decision for one poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPlan {
    pub sleep: Duration,
    pub after_hours: bool,
}

/// Pick the next sleep. After hours (before the work start hour, at or
/// past the end hour, or any weekend) with no active extension sleeps
/// until the next weekday work start; otherwise the interval follows the
/// check state.
pub fn plan_next_sleep(
    now: DateTime<Local>,
    checks: &CheckCounts,
    extension_until: Option<DateTime<Local>>,
    config: &Config,
) -> PollPlan {
    let weekend = matches!(
        now.weekday(),
        chrono::Weekday::Sat | chrono::Weekday::Sun
    );
    let outside_hours = config.enforce_work_hours
        && (weekend || now.hour() < config.work_start_hour || now.hour() >= config.work_end_hour);
    let extension_active = extension_until.map_or(false, |until| until > now);

    if outside_hours && !extension_active {
        let wake = next_work_start(now, config.work_start_hour);
        let secs = (wake - now).num_seconds().max(0) as u64;
        return PollPlan {
            sleep: Duration::from_secs(secs.max(config.poll.after_hours_min_secs)),
            after_hours: true,
        };
    }

    let secs = if checks.pending > 0 || checks.queued > 0 {
        config.poll.pending_secs
    } else if !checks.observed() {
        config.poll.no_checks_secs
    } else {
        config.poll.complete_secs
    };
    PollPlan {
        sleep: Duration::from_secs(secs),
        after_hours: false,
    }
}

/// The next weekday at the work start hour, strictly after `now` unless
/// today's start hour is still ahead.
fn next_work_start(now: DateTime<Local>, start_hour: u32) -> DateTime<Local> {
    let mut day = now.date_naive();
    let weekday_ok = !matches!(day.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
    if !(weekday_ok && now.hour() < start_hour) {
        loop {
            day = day.succ_opt().unwrap_or(day);
            if !matches!(day.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                break;
            }
        }
    }
    day.and_hms_opt(start_hour, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> Config {
        Config::default()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn trigger_parsing_covers_the_three_forms() {
        assert_eq!(
            parse_trigger("ACTION|PRRT_abc123"),
            Some(Trigger::Action("PRRT_abc123".to_string()))
        );
        assert_eq!(parse_trigger("EXTEND|2026-08-02T21:00:00Z"), Some(Trigger::Extend));
        assert_eq!(parse_trigger("1722621600"), Some(Trigger::Wake));
        assert_eq!(parse_trigger("   \n"), None);
        assert_eq!(parse_trigger("ACTION|"), Some(Trigger::Wake));
    }

    #[test]
    fn pending_checks_poll_every_minute() {
        // Wednesday, mid-morning
        let now = at(2026, 7, 29, 10, 0);
        let checks = CheckCounts {
            passed: 1,
            pending: 2,
            total: 3,
            ..Default::default()
        };
        let plan = plan_next_sleep(now, &checks, None, &cfg());
        assert_eq!(plan.sleep, Duration::from_secs(60));
        assert!(!plan.after_hours);
    }

    #[test]
    fn no_checks_polls_fast() {
        let now = at(2026, 7, 29, 10, 0);
        let plan = plan_next_sleep(now, &CheckCounts::default(), None, &cfg());
        assert_eq!(plan.sleep, Duration::from_secs(30));
    }

    #[test]
    fn complete_checks_poll_slowly() {
        let now = at(2026, 7, 29, 10, 0);
        let checks = CheckCounts {
            passed: 4,
            total: 4,
            ..Default::default()
        };
        let plan = plan_next_sleep(now, &checks, None, &cfg());
        assert_eq!(plan.sleep, Duration::from_secs(120));
    }

    #[test]
    fn evenings_sleep_until_the_next_morning() {
        // Wednesday 19:30 -> Thursday 09:00
        let now = at(2026, 7, 29, 19, 30);
        let plan = plan_next_sleep(now, &CheckCounts::default(), None, &cfg());
        assert!(plan.after_hours);
        let expected = at(2026, 7, 30, 9, 0) - now;
        assert_eq!(plan.sleep, Duration::from_secs(expected.num_seconds() as u64));
    }

    #[test]
    fn weekends_sleep_until_monday() {
        // Saturday noon -> Monday 09:00
        let now = at(2026, 8, 1, 12, 0);
        let plan = plan_next_sleep(now, &CheckCounts::default(), None, &cfg());
        assert!(plan.after_hours);
        let expected = at(2026, 8, 3, 9, 0) - now;
        assert_eq!(plan.sleep, Duration::from_secs(expected.num_seconds() as u64));
    }

    #[test]
    fn early_morning_sleeps_until_same_day_start() {
        // Wednesday 06:00 -> Wednesday 09:00
        let now = at(2026, 7, 29, 6, 0);
        let plan = plan_next_sleep(now, &CheckCounts::default(), None, &cfg());
        assert!(plan.after_hours);
        assert_eq!(plan.sleep, Duration::from_secs(3 * 3600));
    }

    #[test]
    fn extension_overrides_after_hours() {
        let now = at(2026, 7, 29, 21, 0);
        let until = at(2026, 7, 29, 23, 0);
        let checks = CheckCounts {
            passed: 1,
            pending: 1,
            total: 2,
            ..Default::default()
        };
        let plan = plan_next_sleep(now, &checks, Some(until), &cfg());
        assert!(!plan.after_hours);
        assert_eq!(plan.sleep, Duration::from_secs(60));

        // An expired extension no longer applies
        let plan = plan_next_sleep(now, &checks, Some(at(2026, 7, 29, 20, 0)), &cfg());
        assert!(plan.after_hours);
    }

    #[test]
    fn after_hours_sleep_has_a_floor() {
        // 08:59:30 would compute a 30-second sleep; the floor is 60
        let now = Local.with_ymd_and_hms(2026, 7, 29, 8, 59, 30).unwrap();
        let plan = plan_next_sleep(now, &CheckCounts::default(), None, &cfg());
        assert!(plan.after_hours);
        assert_eq!(plan.sleep, Duration::from_secs(60));
    }
}
