//! Tool surface semantics
//!
//! The three operations the LLM drives — start, next_step, stop — as
//! plain async functions. The MCP server registers thin handlers over
//! these; everything protocol-independent lives here.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::github::{GhPlatformClient, PlatformClient};

use super::directive::{Directive, DirectiveAction, MonitorEvent};
use super::engine;
use super::executor;
use super::log::{LogRecord, StatusSnapshot};
use super::registry;
use super::session::{plan_next_sleep, MonitorSession, PollOutcome};
use super::state::{MonitorPhase, MonitorState};

/// Instruction attached to every ask_user directive
const ASK_USER_INSTRUCTIONS: &str = "Present this question and its choices to the user verbatim \
     and wait for their selection. Then call pr_monitor_next_step with event=\"user_chose\" and \
     the selected choice. Do not answer on the user's behalf.";

/// Arguments for `pr_monitor_start`
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    pub session_folder: PathBuf,
}

/// Arguments for `pr_monitor_next_step`
#[derive(Debug, Clone)]
pub struct NextStepRequest {
    pub monitor_id: String,
    pub event: String,
    pub choice: Option<String>,
    pub data: Option<Value>,
}

/// Start monitoring a PR with the production `gh`-backed client
pub async fn start(config: Arc<Config>, request: StartRequest) -> Result<Value> {
    let client: Arc<dyn PlatformClient> = Arc::new(GhPlatformClient::new(
        &request.owner,
        &request.repo,
        request.pr_number,
        Arc::clone(&config),
    ));
    start_with_client(config, request, client).await
}

/// Start monitoring with an explicit platform client (tests inject mocks)
pub async fn start_with_client(
    config: Arc<Config>,
    request: StartRequest,
    client: Arc<dyn PlatformClient>,
) -> Result<Value> {
    let monitor_id = registry::monitor_id(request.pr_number);

    // Resume-friendly: a second start for the same PR returns the
    // existing session's summary instead of a new baseline.
    if let Some(existing) = registry::get(&monitor_id).await {
        let state = existing.state.lock().await;
        return Ok(json!({
            "monitor_id": monitor_id,
            "status": "already_monitoring",
            "pr_number": state.number,
            "title": state.title,
            "url": state.url,
            "phase": state.phase_description(),
            "instructions": "A monitor for this PR is already running. Call \
                 pr_monitor_next_step with event=\"ready\" to continue it.",
        }));
    }

    std::fs::create_dir_all(&request.session_folder).with_context(|| {
        format!(
            "cannot create session folder {}",
            request.session_folder.display()
        )
    })?;

    let mut state = MonitorState::new(
        &request.owner,
        &request.repo,
        request.pr_number,
        &request.session_folder,
    );
    state.load_ignores();

    // Full baseline fetch
    let info = client.fetch_pr_info().await.context("baseline PR fetch failed")?;
    state.title = info.title.clone();
    state.url = info.url.clone();
    state.author = info.author.clone();
    state.head_sha = info.head_sha.clone();
    state.head_branch = info.head_branch.clone();
    state.merge_conflict = info.has_merge_conflict();

    let checks = client
        .fetch_check_runs(&state.head_sha)
        .await
        .context("baseline check fetch failed")?;
    state.checks = checks.counts;
    state.failed_checks = checks.failures;

    let reviews = client
        .fetch_reviews(&state.head_sha)
        .await
        .context("baseline review fetch failed")?;
    state.approvals = reviews.approvals;
    state.stale_approvals = reviews.stale_approvals;

    let mut threads = client
        .fetch_unresolved_comments(&state.author)
        .await
        .context("baseline comment fetch failed")?;
    threads.retain(|t| !state.ignored_comment_ids.contains(&t.id));
    let (waiting, needs_action): (Vec<_>, Vec<_>) =
        threads.into_iter().partition(|t| t.waiting_for_reply);
    state.unresolved = needs_action;
    state.waiting_for_reply = waiting;

    // Who the helper is authenticated as; informational only
    let login = client
        .fetch_current_user()
        .await
        .unwrap_or_else(|_| state.author.clone());

    let summary = json!({
        "monitor_id": monitor_id,
        "status": "monitoring",
        "pr_number": state.number,
        "title": state.title,
        "url": state.url,
        "author": state.author,
        "login": login,
        "head_sha": state.head_sha,
        "merged": info.merged,
        "checks": state.checks,
        "approvals": state.approvals.len(),
        "unresolved": state.unresolved.len(),
        "waiting_for_reply": state.waiting_for_reply.len(),
        "instructions": "Call pr_monitor_next_step with event=\"ready\" to begin the watch.",
    });

    let session = MonitorSession::new(monitor_id.clone(), state, client, Arc::clone(&config));
    {
        let state = session.state.lock().await;
        session.log.write_header(&state);
        let plan = plan_next_sleep(Local::now(), &state.checks, state.after_hours_until, &config);
        session.log.append(&LogRecord::Status(StatusSnapshot::capture(
            &state,
            plan.sleep.as_secs(),
            plan.after_hours,
        )));
        launch_viewer(&config, &state);
    }
    registry::insert(Arc::clone(&session)).await;
    info!("{monitor_id}: monitoring {}/{}#{}", request.owner, request.repo, request.pr_number);

    Ok(summary)
}

/// The one blocking call. Composition order: heartbeat, pending-ACTION
/// short-circuit, data merge, engine dispatch, auto-execute loop, poll
/// worker, persistence, instruction attachment.
pub async fn next_step(
    request: NextStepRequest,
    heartbeat_emit: Option<Box<dyn Fn(String) + Send + Sync>>,
) -> Value {
    let Some(session) = registry::get(&request.monitor_id).await else {
        return to_value(Directive::stop(format!(
            "No monitor named \"{}\" is running.",
            request.monitor_id
        )));
    };

    // Preempt any sleeping poll worker before waiting on the state lock,
    // or an Esc-interrupted call could hold it forever.
    let generation = session.claim_poll_worker();
    let _heartbeat = heartbeat_emit.map(|emit| session.start_heartbeat(emit));
    let mut state = session.state.lock().await;

    // A viewer ACTION that landed while no tool call was in flight is
    // honored before the event dispatch.
    if state.active_waiting_comment.is_none() {
        if let Some(thread_id) = session.pending_action() {
            if let Some(thread) = state
                .waiting_for_reply
                .iter()
                .find(|t| t.id == thread_id)
                .cloned()
            {
                let directive = engine::build_waiting_menu(&mut state, thread);
                return to_value(directive.with_instructions(ASK_USER_INSTRUCTIONS));
            }
            debug!(
                "{}: pending ACTION for unknown thread {thread_id}; dropped",
                session.id
            );
        }
    }

    merge_investigation_data(&mut state, request.data.as_ref());

    let mut directive = match MonitorEvent::parse(&request.event) {
        Some(event) => engine::process_event(&mut state, event, request.choice.as_deref()),
        None => engine::recovery_menu(&mut state, &request.event),
    };

    while directive.action == DirectiveAction::AutoExecute {
        let task_name = directive.task.clone().unwrap_or_default();
        directive = executor::run_auto_task(&session, &mut state, &task_name).await;
    }

    if directive.action == DirectiveAction::Polling {
        session.log.append(&LogRecord::Resuming(
            directive
                .message
                .clone()
                .unwrap_or_else(|| "Polling resumed.".to_string()),
        ));
        match session.run_poll_loop(&mut state, generation).await {
            PollOutcome::Directive(next) => directive = next,
            PollOutcome::TakenOver => {
                return to_value(Directive::stop(
                    "A newer call took over this monitor.".to_string(),
                ));
            }
        }
    }

    state.persist_ignores();

    match directive.action {
        DirectiveAction::AskUser => {
            directive = directive.with_instructions(ASK_USER_INSTRUCTIONS);
        }
        DirectiveAction::Stop if state.phase == MonitorPhase::Stopped => {
            session.log.append(&LogRecord::Stopped(
                directive
                    .message
                    .clone()
                    .unwrap_or_else(|| "Monitoring stopped.".to_string()),
            ));
            drop(state);
            dispose(&session).await;
        }
        DirectiveAction::Merged => {
            drop(state);
            dispose(&session).await;
        }
        _ => {}
    }

    to_value(directive)
}

/// Cancel the poll worker, dispose the session, acknowledge
pub async fn stop(monitor_id: &str) -> Value {
    let Some(session) = registry::remove(monitor_id).await else {
        return to_value(Directive::stop(format!(
            "No monitor named \"{monitor_id}\" is running."
        )));
    };
    session.cancel();

    // Waits for an in-flight worker to observe the cancellation
    let mut state = session.state.lock().await;
    state.enter_stopped();
    state.persist_ignores();
    session
        .log
        .append(&LogRecord::Stopped("Monitoring stopped.".to_string()));
    info!("{monitor_id}: stopped");

    to_value(Directive::stop(format!(
        "Stopped monitoring PR #{}.",
        session.number
    )))
}

async fn dispose(session: &Arc<MonitorSession>) {
    session.cancel();
    registry::remove(&session.id).await;
}

/// Merge optional investigation data into the state. Parse failures are
/// silently ignored; the state is simply not updated.
fn merge_investigation_data(state: &mut MonitorState, data: Option<&Value>) {
    let Some(data) = data else { return };
    let object = match data {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.as_object().cloned()),
        _ => None,
    };
    let Some(object) = object else { return };

    if let Some(findings) = object.get("findings").and_then(Value::as_str) {
        state.findings = Some(findings.to_string());
    }
    if let Some(fix) = object.get("suggested_fix").and_then(Value::as_str) {
        state.suggested_fix = Some(fix.to_string());
    }
    if let Some(issue_type) = object.get("issue_type").and_then(Value::as_str) {
        state.issue_type = Some(issue_type.to_string());
    }
}

/// Best-effort launch of the external dashboard; every failure is logged
/// and ignored.
fn launch_viewer(config: &Config, state: &MonitorState) {
    let result = std::process::Command::new(&config.viewer_binary)
        .arg("--log")
        .arg(state.log_path())
        .arg("--trigger")
        .arg(state.trigger_path())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    match result {
        Ok(child) => {
            if let Err(err) = std::fs::write(state.viewer_pid_path(), child.id().to_string()) {
                debug!("viewer pid file write failed: {err}");
            }
        }
        Err(err) => {
            debug!("dashboard launch skipped: {err}");
        }
    }
}

fn to_value(directive: Directive) -> Value {
    serde_json::to_value(&directive).unwrap_or_else(|_| json!({ "action": "stop" }))
}
