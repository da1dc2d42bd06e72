//! Auto-execute dispatch
//!
//! Deterministic tasks the agent performs itself instead of delegating to
//! the LLM. Each task either re-enters the engine (success) or produces a
//! task-specific recovery menu (failure). Nothing here raises: executor
//! failures are menus, not errors.

use tracing::{info, warn};

use super::directive::{task, Directive};
use super::engine;
use super::log::LogRecord;
use super::session::MonitorSession;
use super::state::{MonitorPhase, MonitorState};

/// Run one auto-execute task against the platform and return the next
/// directive. The caller holds the state lock.
pub async fn run_auto_task(
    session: &MonitorSession,
    state: &mut MonitorState,
    task_name: &str,
) -> Directive {
    match task_name {
        task::RESOLVE_THREAD => resolve_thread(session, state).await,
        task::MERGE_PR => merge(session, state, false).await,
        task::MERGE_PR_ADMIN => merge(session, state, true).await,
        task::RUN_NEW_BUILD => run_new_build(session, state).await,
        other => {
            warn!("{}: unknown auto task \"{other}\"", session.id);
            engine::recovery_menu(state, other)
        }
    }
}

async fn resolve_thread(session: &MonitorSession, state: &mut MonitorState) -> Directive {
    let Some(thread_id) = state.active_waiting_comment.as_ref().map(|t| t.id.clone()) else {
        // Nothing to resolve; treat as a completed no-op
        return engine::process_event(state, super::directive::MonitorEvent::TaskComplete, None);
    };

    match session.client().resolve_thread(&thread_id).await {
        Ok(()) => {
            info!("{}: resolved thread {thread_id}", session.id);
            engine::process_event(state, super::directive::MonitorEvent::TaskComplete, None)
        }
        Err(err) => {
            session.debug_log(&format!("resolve_thread {thread_id} failed: {err:#}"));
            state.pending_resolve_after_address = false;
            state.phase = MonitorPhase::AwaitingUser;
            Directive::ask_user(
                format!("I couldn't resolve the review thread: {err:#}"),
                vec![
                    "Resume monitoring".to_string(),
                    "I'll handle it myself".to_string(),
                ],
            )
        }
    }
}

async fn merge(session: &MonitorSession, state: &mut MonitorState, admin: bool) -> Directive {
    match session.client().merge_pr(admin).await {
        Ok(()) => {
            info!("{}: merged (admin={admin})", session.id);
            state.enter_stopped();
            session
                .log
                .append(&LogRecord::Stopped("PR merged.".to_string()));
            Directive::merged(format!("PR #{} merged.", state.number))
        }
        Err(failure) if failure.policy_blocked && !admin => {
            // Capture the approval count at the moment the merge was
            // refused; ApprovedCiGreen stays quiet until it grows.
            if state.needs_additional_approval.is_none() {
                state.needs_additional_approval = Some(state.approvals.len());
            }
            state.phase = MonitorPhase::AwaitingUser;
            Directive::ask_user(
                format!("Merge was refused by branch policy: {}", failure.message),
                vec![
                    "Merge with admin override".to_string(),
                    "Wait for another approval".to_string(),
                    "Resume monitoring".to_string(),
                    "I'll handle it myself".to_string(),
                ],
            )
        }
        Err(failure) => {
            session.debug_log(&format!("merge failed (admin={admin}): {}", failure.message));
            state.phase = MonitorPhase::AwaitingUser;
            Directive::ask_user(
                format!("Merge failed: {}", failure.message),
                vec![
                    "Resume monitoring".to_string(),
                    "I'll handle it myself".to_string(),
                ],
            )
        }
    }
}

async fn run_new_build(session: &MonitorSession, state: &mut MonitorState) -> Directive {
    let head = state.head_sha.clone();
    let branch = state.head_branch.clone();
    match session.client().push_empty_commit(&head, &branch).await {
        Ok(new_sha) => {
            info!("{}: pushed empty commit {new_sha}", session.id);
            state.head_sha = new_sha;
            state.enter_polling();
            Directive::polling("Pushed an empty commit; watching the new build.")
        }
        Err(err) => {
            session.debug_log(&format!("run_new_build failed: {err:#}"));
            state.phase = MonitorPhase::AwaitingUser;
            Directive::ask_user(
                format!("I couldn't trigger a new build: {err:#}"),
                vec![
                    "Resume monitoring".to_string(),
                    "I'll handle it myself".to_string(),
                ],
            )
        }
    }
}
