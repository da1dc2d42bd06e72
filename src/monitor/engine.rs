//! Transition Engine
//!
//! Pure and total: `(state, event, choice, data) -> (state', directive)`.
//! Terminal detection, the fixed menus, the comment / CI / waiting-reply
//! sub-flow routers, and every recovery transition live here. No I/O —
//! the session supervisor and tool surface do the fetching, logging, and
//! persistence around these calls.
//!
//! Two rules hold on every path:
//! - the next top-level phase is written before returning;
//! - an unknown (state, event) pair yields a resume-or-stop menu, never
//!   an error.

use serde_json::{json, Value};

use crate::github::ReviewThread;

use super::directive::{choice, task, Directive, MonitorEvent};
use super::state::{CiFlow, CommentFlow, MonitorPhase, MonitorState, TerminalKind};

/// Apply the fixed priority rule to fresh aggregated data.
///
/// Priority: NewComment > MergeConflict > CiFailure > CiCancelled >
/// ApprovedCiGreen > CiPassedCommentsIgnored. ApprovedCiGreen requires all
/// checks complete and honors the additional-approval gate; a stale
/// approval never counts.
pub fn detect_terminal(state: &MonitorState) -> Option<TerminalKind> {
    if !state.unresolved.is_empty() {
        return Some(TerminalKind::NewComment);
    }
    if state.merge_conflict {
        return Some(TerminalKind::MergeConflict);
    }
    if state.checks.failed > 0 {
        return Some(TerminalKind::CiFailure);
    }
    if state.checks.cancelled > 0 && state.checks.all_complete() {
        return Some(TerminalKind::CiCancelled);
    }

    let gate_open = state
        .needs_additional_approval
        .map_or(true, |captured| state.approvals.len() > captured);

    if state.checks.all_green() && !state.approvals.is_empty() && gate_open {
        return Some(TerminalKind::ApprovedCiGreen);
    }
    if state.checks.all_green()
        && !state.ignored_comment_ids.is_empty()
        && state.needs_additional_approval.is_none()
    {
        return Some(TerminalKind::CiPassedCommentsIgnored);
    }
    None
}

/// Record the terminal, move to AwaitingUser, and build the fixed prompt
/// and menu for the kind.
pub fn build_terminal(state: &mut MonitorState, kind: TerminalKind) -> Directive {
    state.last_terminal = Some(kind);
    state.phase = MonitorPhase::AwaitingUser;

    match kind {
        TerminalKind::NewComment => {
            if state.unresolved.len() == 1 {
                state.comment_flow = CommentFlow::SingleCommentPrompt;
                state.comment_iter_index = 0;
                single_comment_menu(state)
            } else {
                state.comment_flow = CommentFlow::MultiCommentPrompt;
                multi_comment_menu(state)
            }
        }
        TerminalKind::MergeConflict => Directive::ask_user(
            format!(
                "PR #{} has a merge conflict with the base branch.",
                state.number
            ),
            vec![
                "Resolve the conflict (rebase)".to_string(),
                "I'll handle it myself".to_string(),
                "Resume monitoring".to_string(),
            ],
        )
        .with_context(json!({ "url": state.url })),
        TerminalKind::CiFailure => {
            state.ci_flow = CiFlow::CiFailurePrompt;
            ci_failure_menu(state)
        }
        TerminalKind::CiCancelled => Directive::ask_user(
            format!(
                "CI was cancelled: {} of {} checks ended as cancelled.",
                state.checks.cancelled, state.checks.total
            ),
            vec![
                "Run a new build".to_string(),
                "Re-run the checks".to_string(),
                "I'll handle it myself".to_string(),
            ],
        )
        .with_context(json!({ "checks": state.checks })),
        TerminalKind::ApprovedCiGreen => Directive::ask_user(
            format!(
                "PR #{} is approved and all {} checks are green.",
                state.number, state.checks.total
            ),
            vec![
                "Merge the PR".to_string(),
                "Resume monitoring".to_string(),
                "I'll handle it myself".to_string(),
                "Stop monitoring".to_string(),
            ],
        )
        .with_context(json!({
            "approvals": state.approvals,
            "checks": state.checks,
            "url": state.url,
        })),
        TerminalKind::CiPassedCommentsIgnored => Directive::ask_user(
            format!(
                "All {} checks passed; {} ignored comment(s) remain unresolved.",
                state.checks.total,
                state.ignored_comment_ids.len()
            ),
            vec![
                "Merge the PR".to_string(),
                "Resume monitoring".to_string(),
                "Stop monitoring".to_string(),
            ],
        )
        .with_context(json!({
            "ignored": state.ignored_comment_ids,
            "checks": state.checks,
        })),
    }
}

/// Present the action menu for a waiting-for-reply thread (viewer ACTION
/// trigger). The thread becomes the active waiting comment.
pub fn build_waiting_menu(state: &mut MonitorState, thread: ReviewThread) -> Directive {
    state.phase = MonitorPhase::AwaitingUser;
    let context = comment_context(&thread);
    let question = format!(
        "You replied last on {}'s thread{}: \"{}\". What should happen to it?",
        thread.author,
        thread
            .path
            .as_deref()
            .map(|p| format!(" on {p}"))
            .unwrap_or_default(),
        thread.excerpt()
    );
    state.active_waiting_comment = Some(thread);
    Directive::ask_user(
        question,
        vec![
            "Resolve the thread".to_string(),
            "Post a follow-up reply".to_string(),
            "Suggest the change again".to_string(),
            "Go back".to_string(),
        ],
    )
    .with_context(context)
}

/// The dispatch table. `choice` is the raw user choice for UserChose
/// events; investigation data has already been merged into the state.
pub fn process_event(
    state: &mut MonitorState,
    event: MonitorEvent,
    choice_input: Option<&str>,
) -> Directive {
    match event {
        MonitorEvent::Ready => match state.phase {
            MonitorPhase::Idle | MonitorPhase::Polling => {
                state.enter_polling();
                Directive::polling(format!("Monitoring PR #{}.", state.number))
            }
            _ => unknown_pair(state, event),
        },
        MonitorEvent::UserChose => on_user_chose(state, choice_input),
        MonitorEvent::CommentAddressed => on_comment_addressed(state),
        MonitorEvent::InvestigationComplete => on_investigation_complete(state),
        MonitorEvent::PushCompleted => match state.phase {
            MonitorPhase::ApplyingFix | MonitorPhase::ExecutingTask => {
                state.enter_polling();
                Directive::polling("Push received; watching the new build.")
            }
            _ => unknown_pair(state, event),
        },
        MonitorEvent::TaskComplete => on_task_complete(state),
    }
}

fn on_user_chose(state: &mut MonitorState, choice_input: Option<&str>) -> Directive {
    if !matches!(
        state.phase,
        MonitorPhase::AwaitingUser | MonitorPhase::InvestigationResults
    ) {
        return unknown_pair(state, MonitorEvent::UserChose);
    }
    let Some(raw) = choice_input else {
        return unknown_pair(state, MonitorEvent::UserChose);
    };
    let token = choice::normalize(raw);

    // Route order: active sub-flow, then active waiting-comment, then the
    // terminal-level choice table.
    if state.comment_flow != CommentFlow::None {
        return on_comment_choice(state, &token);
    }
    if state.active_waiting_comment.is_some() {
        return on_waiting_choice(state, &token);
    }
    if state.ci_flow != CiFlow::None {
        return on_ci_choice(state, &token);
    }
    on_terminal_choice(state, &token)
}

fn on_comment_choice(state: &mut MonitorState, token: &str) -> Directive {
    match state.comment_flow {
        CommentFlow::SingleCommentPrompt => match token {
            choice::ADDRESS => execute_address_current(state),
            choice::EXPLAIN => {
                let context = current_comment_context(state);
                state.phase = MonitorPhase::ExecutingTask;
                Directive::execute(task::EXPLAIN_COMMENT)
                    .with_context(context)
                    .with_instructions(after_task(MonitorEvent::TaskComplete))
            }
            choice::IGNORE => {
                let ids: Vec<String> = state.unresolved.iter().map(|t| t.id.clone()).collect();
                state.ignore_comment_ids(ids);
                state.unresolved.clear();
                state.enter_polling();
                Directive::polling("Comment ignored; resuming the watch.")
            }
            _ => resume_polling(state),
        },
        CommentFlow::MultiCommentPrompt => match token {
            choice::ADDRESS_ALL => {
                state.comment_flow = CommentFlow::AddressAllIterating;
                state.comment_iter_index = 0;
                iteration_prompt(state)
            }
            choice::ADDRESS_SPECIFIC => {
                state.comment_flow = CommentFlow::PickComment;
                pick_comment_menu(state)
            }
            choice::IGNORE => {
                let count = state.unresolved.len();
                let ids: Vec<String> = state.unresolved.iter().map(|t| t.id.clone()).collect();
                state.ignore_comment_ids(ids);
                state.unresolved.clear();
                state.enter_polling();
                Directive::polling(format!("{count} comments ignored; resuming the watch."))
            }
            _ => resume_polling(state),
        },
        CommentFlow::AddressAllIterating => match token {
            choice::CONTINUE => execute_address_current(state),
            choice::SKIP => {
                state.comment_iter_index += 1;
                if state.current_comment().is_some() {
                    iteration_prompt(state)
                } else {
                    state.enter_polling();
                    Directive::polling("All comments handled; resuming the watch.")
                }
            }
            _ => resume_polling(state),
        },
        CommentFlow::PickComment => {
            if token == choice::GO_BACK {
                state.comment_flow = CommentFlow::MultiCommentPrompt;
                return multi_comment_menu(state);
            }
            match choice::leading_number(token) {
                Some(n) if n >= 1 && n <= state.unresolved.len() => {
                    state.comment_iter_index = n - 1;
                    execute_address_current(state)
                }
                _ => pick_comment_menu(state),
            }
        }
        CommentFlow::PickRemaining => match token {
            choice::CONTINUE => {
                state.comment_flow = CommentFlow::PickComment;
                pick_comment_menu(state)
            }
            choice::ADDRESS_ALL => {
                state.comment_flow = CommentFlow::AddressAllIterating;
                state.comment_iter_index = 0;
                iteration_prompt(state)
            }
            _ => resume_polling(state),
        },
        CommentFlow::None => resume_polling(state),
    }
}

fn on_waiting_choice(state: &mut MonitorState, token: &str) -> Directive {
    match token {
        choice::RESOLVE => {
            state.phase = MonitorPhase::ExecutingTask;
            Directive::auto_execute(task::RESOLVE_THREAD)
        }
        choice::FOLLOW_UP => {
            let context = waiting_comment_context(state);
            state.phase = MonitorPhase::ExecutingTask;
            Directive::execute(task::FOLLOW_UP_COMMENT)
                .with_context(context)
                .with_instructions(after_task(MonitorEvent::TaskComplete))
        }
        choice::RE_SUGGEST => {
            let context = waiting_comment_context(state);
            state.phase = MonitorPhase::ExecutingTask;
            Directive::execute(task::RE_SUGGEST_CHANGE)
                .with_context(context)
                .with_instructions(after_task(MonitorEvent::TaskComplete))
        }
        _ => {
            state.active_waiting_comment = None;
            resume_polling(state)
        }
    }
}

fn on_ci_choice(state: &mut MonitorState, token: &str) -> Directive {
    match state.ci_flow {
        CiFlow::CiFailurePrompt => match token {
            choice::INVESTIGATE => {
                let context = failures_context(state);
                state.phase = MonitorPhase::Investigating;
                state.ci_flow = CiFlow::Investigating;
                Directive::execute(task::INVESTIGATE_CI_FAILURE)
                    .with_context(context)
                    .with_instructions(
                        "Investigate the failed checks, then call pr_monitor_next_step with \
                         event=\"investigation_complete\" and data carrying findings, \
                         suggested_fix (if any), and issue_type.",
                    )
            }
            choice::SHOW_LOGS => {
                let context = failures_context(state);
                state.phase = MonitorPhase::ExecutingTask;
                Directive::execute(task::SHOW_LOGS)
                    .with_context(context)
                    .with_instructions(after_task(MonitorEvent::TaskComplete))
            }
            choice::RERUN | choice::RERUN_FAILED => {
                let context = failures_context(state);
                state.phase = MonitorPhase::ExecutingTask;
                Directive::execute(task::RERUN_VIA_BROWSER)
                    .with_context(context)
                    .with_instructions(after_task(MonitorEvent::TaskComplete))
            }
            choice::RUN_NEW => {
                state.phase = MonitorPhase::ExecutingTask;
                Directive::auto_execute(task::RUN_NEW_BUILD)
            }
            _ => resume_polling(state),
        },
        CiFlow::InvestigationResults => match token {
            choice::APPLY_FIX if state.suggested_fix.is_some() => {
                state.phase = MonitorPhase::ApplyingFix;
                Directive::execute(task::APPLY_FIX)
                    .with_context(json!({
                        "suggested_fix": state.suggested_fix,
                        "findings": state.findings,
                    }))
                    .with_instructions(
                        "Apply the suggested fix, push it, then call pr_monitor_next_step \
                         with event=\"push_completed\".",
                    )
            }
            choice::RUN_NEW => {
                state.phase = MonitorPhase::ExecutingTask;
                Directive::auto_execute(task::RUN_NEW_BUILD)
            }
            choice::RERUN => {
                let context = failures_context(state);
                state.phase = MonitorPhase::ExecutingTask;
                Directive::execute(task::RERUN_VIA_BROWSER)
                    .with_context(context)
                    .with_instructions(after_task(MonitorEvent::TaskComplete))
            }
            _ => resume_polling(state),
        },
        _ => resume_polling(state),
    }
}

fn on_terminal_choice(state: &mut MonitorState, token: &str) -> Directive {
    match token {
        choice::MERGE => {
            state.phase = MonitorPhase::ExecutingTask;
            Directive::auto_execute(task::MERGE_PR)
        }
        choice::MERGE_ADMIN => {
            state.phase = MonitorPhase::ExecutingTask;
            Directive::auto_execute(task::MERGE_PR_ADMIN)
        }
        choice::WAIT_FOR_APPROVER => {
            if state.needs_additional_approval.is_none() {
                state.needs_additional_approval = Some(state.approvals.len());
            }
            state.enter_polling();
            Directive::polling("Waiting for an additional approval.")
        }
        choice::RUN_NEW => {
            state.phase = MonitorPhase::ExecutingTask;
            Directive::auto_execute(task::RUN_NEW_BUILD)
        }
        choice::RERUN | choice::RERUN_FAILED => {
            let context = failures_context(state);
            state.phase = MonitorPhase::ExecutingTask;
            Directive::execute(task::RERUN_VIA_BROWSER)
                .with_context(context)
                .with_instructions(after_task(MonitorEvent::TaskComplete))
        }
        choice::DONE => {
            state.enter_stopped();
            Directive::stop("Monitoring stopped at your request.")
        }
        // resume, handle_myself, and every unmatched label (including the
        // conflict-rebase choice) fall back to polling
        _ => resume_polling(state),
    }
}

fn on_comment_addressed(state: &mut MonitorState) -> Directive {
    if let Some(comment) = state.current_comment().cloned() {
        state.pending_resolve_after_address = true;
        state.active_waiting_comment = Some(comment);
        state.phase = MonitorPhase::ExecutingTask;
        Directive::auto_execute(task::RESOLVE_THREAD)
    } else {
        resume_polling(state)
    }
}

fn on_investigation_complete(state: &mut MonitorState) -> Directive {
    if !matches!(
        state.phase,
        MonitorPhase::Investigating | MonitorPhase::ExecutingTask
    ) {
        return unknown_pair(state, MonitorEvent::InvestigationComplete);
    }

    state.phase = MonitorPhase::InvestigationResults;
    state.ci_flow = CiFlow::InvestigationResults;

    let question = match &state.findings {
        Some(findings) => format!("Investigation finished: {findings}"),
        None => "Investigation finished.".to_string(),
    };
    let context = json!({
        "findings": state.findings,
        "suggested_fix": state.suggested_fix,
        "issue_type": state.issue_type,
    });

    // A duplicate artifact can only be cleared by a fresh build.
    if state.issue_type.as_deref() == Some("duplicate_artifact") {
        return Directive::ask_user(
            question,
            vec![
                "Run a new build".to_string(),
                "I'll handle it myself".to_string(),
            ],
        )
        .with_context(context);
    }

    let mut choices = Vec::new();
    if state.suggested_fix.is_some() {
        choices.push("Apply the suggested fix".to_string());
    }
    choices.push("Re-run the checks".to_string());
    choices.push("Ignore and keep monitoring".to_string());
    choices.push("I'll handle it myself".to_string());
    Directive::ask_user(question, choices).with_context(context)
}

fn on_task_complete(state: &mut MonitorState) -> Directive {
    match state.phase {
        MonitorPhase::ExecutingTask => {
            if state.pending_resolve_after_address {
                state.pending_resolve_after_address = false;
                let addressed = state.active_waiting_comment.take();
                if let Some(comment) = addressed {
                    state.remove_unresolved(&comment.id);
                }
                return advance_comment_flow(state);
            }
            if state.active_waiting_comment.take().is_some() {
                return resume_polling(state);
            }
            // A side task (explain, show logs, re-run) finished: put the
            // user back where they were.
            if state.comment_flow != CommentFlow::None && state.current_comment().is_some() {
                state.phase = MonitorPhase::AwaitingUser;
                return match state.comment_flow {
                    CommentFlow::SingleCommentPrompt => single_comment_menu(state),
                    CommentFlow::AddressAllIterating => iteration_prompt(state),
                    CommentFlow::PickComment => pick_comment_menu(state),
                    _ => multi_comment_menu(state),
                };
            }
            if state.ci_flow == CiFlow::CiFailurePrompt {
                state.phase = MonitorPhase::AwaitingUser;
                return ci_failure_menu(state);
            }
            resume_polling(state)
        }
        // Recovery: the LLM skipped a tool call and reported completion
        // from a prompt state. Never an error.
        MonitorPhase::AwaitingUser | MonitorPhase::InvestigationResults => {
            if state.active_waiting_comment.take().is_some() {
                return resume_polling(state);
            }
            if state.comment_flow != CommentFlow::None && state.current_comment().is_some() {
                return match state.comment_flow {
                    CommentFlow::SingleCommentPrompt => single_comment_menu(state),
                    CommentFlow::AddressAllIterating => iteration_prompt(state),
                    CommentFlow::PickComment => pick_comment_menu(state),
                    _ => multi_comment_menu(state),
                };
            }
            resume_polling(state)
        }
        MonitorPhase::Investigating | MonitorPhase::ApplyingFix => resume_polling(state),
        _ => unknown_pair(state, MonitorEvent::TaskComplete),
    }
}

/// Advance the comment flow after a successful address-and-resolve
fn advance_comment_flow(state: &mut MonitorState) -> Directive {
    match state.comment_flow {
        CommentFlow::AddressAllIterating => {
            // The addressed comment was removed, so the index already
            // points at the next one.
            if state.current_comment().is_some() {
                state.phase = MonitorPhase::AwaitingUser;
                iteration_prompt(state)
            } else {
                state.enter_polling();
                Directive::polling("All comments addressed; resuming the watch.")
            }
        }
        CommentFlow::PickComment | CommentFlow::PickRemaining => {
            if state.unresolved.is_empty() {
                state.enter_polling();
                Directive::polling("Comment addressed; resuming the watch.")
            } else {
                state.comment_flow = CommentFlow::PickRemaining;
                state.phase = MonitorPhase::AwaitingUser;
                Directive::ask_user(
                    format!(
                        "Comment addressed and resolved. {} comment(s) remain.",
                        state.unresolved.len()
                    ),
                    vec![
                        "Address another comment".to_string(),
                        "Address the rest".to_string(),
                        "Resume monitoring".to_string(),
                    ],
                )
            }
        }
        _ => {
            state.enter_polling();
            Directive::polling("Comment addressed; resuming the watch.")
        }
    }
}

/// Unknown (state, event): offer resume-or-stop, never raise
fn unknown_pair(state: &mut MonitorState, event: MonitorEvent) -> Directive {
    recovery_menu(state, event.as_str())
}

/// The resume-or-stop recovery menu, also used for inputs the engine
/// cannot even name (unknown event strings, executor surprises)
pub fn recovery_menu(state: &mut MonitorState, received: &str) -> Directive {
    let question = format!(
        "The monitor was {} but received \"{received}\". How should we proceed?",
        state.phase_description()
    );
    state.phase = MonitorPhase::AwaitingUser;
    state.comment_flow = CommentFlow::None;
    state.ci_flow = CiFlow::None;
    Directive::ask_user(
        question,
        vec![
            "Resume monitoring".to_string(),
            "Stop monitoring".to_string(),
        ],
    )
}

fn resume_polling(state: &mut MonitorState) -> Directive {
    state.enter_polling();
    Directive::polling("Resuming the watch.")
}

fn execute_address_current(state: &mut MonitorState) -> Directive {
    let context = current_comment_context(state);
    state.phase = MonitorPhase::ExecutingTask;
    Directive::execute(task::ADDRESS_COMMENT)
        .with_context(context)
        .with_instructions(after_task(MonitorEvent::CommentAddressed))
}

fn after_task(event: MonitorEvent) -> String {
    format!(
        "When the task is done, call pr_monitor_next_step with event=\"{}\".",
        event.as_str()
    )
}

fn single_comment_menu(state: &MonitorState) -> Directive {
    let comment = &state.unresolved[0];
    let question = format!(
        "New comment from {}{}: \"{}\"",
        comment.author,
        comment
            .path
            .as_deref()
            .map(|p| format!(" on {p}"))
            .unwrap_or_default(),
        comment.excerpt()
    );
    Directive::ask_user(
        question,
        vec![
            "Address this comment".to_string(),
            "Explain this comment to me".to_string(),
            "Ignore this comment".to_string(),
            "I'll handle it myself".to_string(),
        ],
    )
    .with_context(comment_context(comment))
}

fn multi_comment_menu(state: &MonitorState) -> Directive {
    let mut listing = String::new();
    for (idx, comment) in state.unresolved.iter().enumerate() {
        listing.push_str(&format!(
            "\n{}. {}: \"{}\"",
            idx + 1,
            comment.author,
            comment.excerpt()
        ));
    }
    Directive::ask_user(
        format!(
            "{} comments need your attention:{listing}",
            state.unresolved.len()
        ),
        vec![
            "Address all comments".to_string(),
            "Address a specific comment".to_string(),
            "Ignore all comments".to_string(),
            "I'll handle it myself".to_string(),
        ],
    )
    .with_context(json!({
        "comments": state.unresolved.iter().map(comment_context).collect::<Vec<_>>(),
    }))
}

fn iteration_prompt(state: &MonitorState) -> Directive {
    let position = state.comment_iter_index + 1;
    let total = state.unresolved.len();
    let comment = &state.unresolved[state.comment_iter_index];
    Directive::ask_user(
        format!(
            "Comment {position} of {total} from {}: \"{}\"",
            comment.author,
            comment.excerpt()
        ),
        vec![
            "Go ahead with this comment".to_string(),
            "Skip this comment".to_string(),
            "Stop addressing comments".to_string(),
        ],
    )
    .with_context(comment_context(comment))
}

fn pick_comment_menu(state: &MonitorState) -> Directive {
    let mut choices: Vec<String> = state
        .unresolved
        .iter()
        .enumerate()
        .map(|(idx, comment)| format!("{}. {}: \"{}\"", idx + 1, comment.author, comment.excerpt()))
        .collect();
    choices.push("Go back".to_string());
    Directive::ask_user("Which comment should be addressed?", choices)
}

fn ci_failure_menu(state: &MonitorState) -> Directive {
    let names: Vec<&str> = state
        .failed_checks
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    Directive::ask_user(
        format!(
            "{} of {} checks failed: {}.",
            state.checks.failed,
            state.checks.total,
            names.join(", ")
        ),
        vec![
            "Investigate the failure".to_string(),
            "Show me the logs".to_string(),
            "Re-run failed checks only".to_string(),
            "I'll handle it myself".to_string(),
        ],
    )
    .with_context(failures_context(state))
}

fn comment_context(comment: &ReviewThread) -> Value {
    json!({
        "thread_id": comment.id,
        "author": comment.author,
        "body": comment.body,
        "path": comment.path,
        "comment_count": comment.comment_count,
    })
}

fn current_comment_context(state: &MonitorState) -> Value {
    state
        .current_comment()
        .map(comment_context)
        .unwrap_or(Value::Null)
}

fn waiting_comment_context(state: &MonitorState) -> Value {
    state
        .active_waiting_comment
        .as_ref()
        .map(comment_context)
        .unwrap_or(Value::Null)
}

fn failures_context(state: &MonitorState) -> Value {
    json!({
        "failed_checks": state.failed_checks,
        "checks": state.checks,
        "head_sha": state.head_sha,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::CheckCounts;
    use crate::monitor::directive::DirectiveAction;
    use std::path::Path;

    fn state() -> MonitorState {
        let mut s = MonitorState::new("octo", "widgets", 7, Path::new("/tmp/session"));
        s.author = "author".to_string();
        s
    }

    fn thread(id: &str, author: &str) -> ReviewThread {
        ReviewThread {
            id: id.to_string(),
            author: author.to_string(),
            body: format!("please fix {id}"),
            path: Some("src/lib.rs".to_string()),
            comment_count: 1,
            last_author: author.to_string(),
            waiting_for_reply: false,
        }
    }

    fn green_checks() -> CheckCounts {
        CheckCounts {
            passed: 5,
            total: 5,
            ..Default::default()
        }
    }

    mod detect {
        use super::*;

        #[test]
        fn comment_beats_everything() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice")];
            s.merge_conflict = true;
            s.checks = CheckCounts {
                passed: 3,
                failed: 2,
                total: 5,
                ..Default::default()
            };
            s.approvals = vec!["bob".to_string()];
            assert_eq!(detect_terminal(&s), Some(TerminalKind::NewComment));
        }

        #[test]
        fn conflict_beats_ci_failure() {
            let mut s = state();
            s.merge_conflict = true;
            s.checks.failed = 2;
            s.checks.total = 5;
            assert_eq!(detect_terminal(&s), Some(TerminalKind::MergeConflict));
        }

        #[test]
        fn failure_beats_approval() {
            let mut s = state();
            s.checks = CheckCounts {
                passed: 3,
                failed: 2,
                total: 5,
                ..Default::default()
            };
            s.approvals = vec!["bob".to_string()];
            assert_eq!(detect_terminal(&s), Some(TerminalKind::CiFailure));
        }

        #[test]
        fn cancelled_waits_for_completion() {
            let mut s = state();
            s.checks = CheckCounts {
                passed: 2,
                cancelled: 1,
                pending: 2,
                total: 5,
                ..Default::default()
            };
            assert_eq!(detect_terminal(&s), None);

            s.checks.pending = 0;
            s.checks.passed = 4;
            assert_eq!(detect_terminal(&s), Some(TerminalKind::CiCancelled));
        }

        #[test]
        fn approval_with_green_checks_fires() {
            let mut s = state();
            s.checks = green_checks();
            s.approvals = vec!["bob".to_string()];
            assert_eq!(detect_terminal(&s), Some(TerminalKind::ApprovedCiGreen));
        }

        #[test]
        fn stale_approvals_never_fire_green() {
            let mut s = state();
            s.checks = green_checks();
            s.stale_approvals = vec!["bob".to_string()];
            assert_eq!(detect_terminal(&s), None);
        }

        #[test]
        fn pending_checks_hold_back_green() {
            let mut s = state();
            s.checks = CheckCounts {
                passed: 4,
                pending: 1,
                total: 5,
                ..Default::default()
            };
            s.approvals = vec!["bob".to_string()];
            assert_eq!(detect_terminal(&s), None);
        }

        #[test]
        fn approval_gate_requires_strictly_more() {
            let mut s = state();
            s.checks = green_checks();
            s.approvals = vec!["bob".to_string()];
            s.needs_additional_approval = Some(1);
            assert_eq!(detect_terminal(&s), None);

            s.approvals.push("carol".to_string());
            assert_eq!(detect_terminal(&s), Some(TerminalKind::ApprovedCiGreen));
        }

        #[test]
        fn ignored_comments_with_green_checks_fire_their_own_terminal() {
            let mut s = state();
            s.checks = green_checks();
            s.ignored_comment_ids.insert("T1".to_string());
            assert_eq!(
                detect_terminal(&s),
                Some(TerminalKind::CiPassedCommentsIgnored)
            );

            // The approval gate suppresses it
            s.needs_additional_approval = Some(1);
            assert_eq!(detect_terminal(&s), None);
        }

        #[test]
        fn failed_checks_suppress_both_green_terminals() {
            let mut s = state();
            s.checks = CheckCounts {
                passed: 4,
                failed: 1,
                total: 5,
                ..Default::default()
            };
            s.approvals = vec!["bob".to_string()];
            s.ignored_comment_ids.insert("T1".to_string());
            assert_eq!(detect_terminal(&s), Some(TerminalKind::CiFailure));
        }

        #[test]
        fn no_signals_means_none() {
            let s = state();
            assert_eq!(detect_terminal(&s), None);
        }
    }

    mod terminals {
        use super::*;

        #[test]
        fn single_comment_enters_single_prompt() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice")];
            let d = build_terminal(&mut s, TerminalKind::NewComment);
            assert_eq!(s.phase, MonitorPhase::AwaitingUser);
            assert_eq!(s.comment_flow, CommentFlow::SingleCommentPrompt);
            assert_eq!(s.comment_iter_index, 0);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.choices.contains(&"Address this comment".to_string()));
        }

        #[test]
        fn two_comments_enter_multi_prompt() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice"), thread("T2", "bob")];
            let d = build_terminal(&mut s, TerminalKind::NewComment);
            assert_eq!(s.comment_flow, CommentFlow::MultiCommentPrompt);
            assert!(d.choices.contains(&"Address all comments".to_string()));
        }

        #[test]
        fn ci_failure_enters_ci_prompt() {
            let mut s = state();
            s.checks.failed = 1;
            s.checks.total = 4;
            let d = build_terminal(&mut s, TerminalKind::CiFailure);
            assert_eq!(s.ci_flow, CiFlow::CiFailurePrompt);
            assert!(d.choices.contains(&"Investigate the failure".to_string()));
        }

        #[test]
        fn approved_green_offers_merge() {
            let mut s = state();
            s.checks = green_checks();
            s.approvals = vec!["bob".to_string()];
            let d = build_terminal(&mut s, TerminalKind::ApprovedCiGreen);
            assert_eq!(s.last_terminal, Some(TerminalKind::ApprovedCiGreen));
            assert!(d.choices.contains(&"Merge the PR".to_string()));
        }
    }

    mod events {
        use super::*;

        #[test]
        fn ready_starts_polling() {
            let mut s = state();
            let d = process_event(&mut s, MonitorEvent::Ready, None);
            assert_eq!(s.phase, MonitorPhase::Polling);
            assert_eq!(d.action, DirectiveAction::Polling);
        }

        #[test]
        fn merge_choice_auto_executes() {
            let mut s = state();
            s.checks = green_checks();
            s.approvals = vec!["bob".to_string()];
            build_terminal(&mut s, TerminalKind::ApprovedCiGreen);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("Merge the PR"));
            assert_eq!(d.action, DirectiveAction::AutoExecute);
            assert_eq!(d.task.as_deref(), Some(task::MERGE_PR));
            assert_eq!(s.phase, MonitorPhase::ExecutingTask);
        }

        #[test]
        fn wait_for_approver_captures_count_and_polls() {
            let mut s = state();
            s.approvals = vec!["bob".to_string()];
            s.phase = MonitorPhase::AwaitingUser;
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("wait_for_approver"));
            assert_eq!(d.action, DirectiveAction::Polling);
            assert_eq!(s.needs_additional_approval, Some(1));
            assert_eq!(s.phase, MonitorPhase::Polling);
        }

        #[test]
        fn rebase_choice_falls_back_to_polling() {
            let mut s = state();
            build_terminal(&mut s, TerminalKind::MergeConflict);
            let d = process_event(
                &mut s,
                MonitorEvent::UserChose,
                Some("Resolve the conflict (rebase)"),
            );
            assert_eq!(d.action, DirectiveAction::Polling);
            assert_eq!(s.phase, MonitorPhase::Polling);
        }

        #[test]
        fn stop_choice_stops() {
            let mut s = state();
            s.phase = MonitorPhase::AwaitingUser;
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("Stop monitoring"));
            assert_eq!(d.action, DirectiveAction::Stop);
            assert_eq!(s.phase, MonitorPhase::Stopped);
        }

        #[test]
        fn unknown_pair_offers_resume_or_stop() {
            let mut s = state();
            s.phase = MonitorPhase::Polling;
            let d = process_event(&mut s, MonitorEvent::PushCompleted, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert_eq!(s.phase, MonitorPhase::AwaitingUser);
            assert!(d.choices.contains(&"Resume monitoring".to_string()));
            assert!(d.choices.contains(&"Stop monitoring".to_string()));

            // and both ways out work
            let mut resumed = s.clone();
            let d2 = process_event(&mut resumed, MonitorEvent::UserChose, Some("resume"));
            assert_eq!(d2.action, DirectiveAction::Polling);

            let d3 = process_event(&mut s, MonitorEvent::UserChose, Some("done"));
            assert_eq!(d3.action, DirectiveAction::Stop);
        }
    }

    mod comment_flows {
        use super::*;

        fn multi_state() -> MonitorState {
            let mut s = state();
            s.unresolved = vec![
                thread("T1", "alice"),
                thread("T2", "bob"),
                thread("T3", "carol"),
            ];
            build_terminal(&mut s, TerminalKind::NewComment);
            s
        }

        #[test]
        fn address_single_comment_then_resolve_then_poll() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice")];
            build_terminal(&mut s, TerminalKind::NewComment);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("address"));
            assert_eq!(d.action, DirectiveAction::Execute);
            assert_eq!(d.task.as_deref(), Some(task::ADDRESS_COMMENT));
            assert_eq!(d.context.as_ref().unwrap()["thread_id"], "T1");

            let d = process_event(&mut s, MonitorEvent::CommentAddressed, None);
            assert_eq!(d.action, DirectiveAction::AutoExecute);
            assert_eq!(d.task.as_deref(), Some(task::RESOLVE_THREAD));
            assert!(s.pending_resolve_after_address);
            assert_eq!(
                s.active_waiting_comment.as_ref().map(|c| c.id.as_str()),
                Some("T1")
            );

            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::Polling);
            assert_eq!(s.phase, MonitorPhase::Polling);
            assert!(s.active_waiting_comment.is_none());
            assert!(s.unresolved.is_empty());
        }

        #[test]
        fn address_all_prompts_before_each_advance_including_the_first() {
            let mut s = multi_state();
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("address_all"));
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.question.as_ref().unwrap().contains("Comment 1 of 3"));
            assert_eq!(s.comment_flow, CommentFlow::AddressAllIterating);

            // go ahead on the first
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("continue"));
            assert_eq!(d.task.as_deref(), Some(task::ADDRESS_COMMENT));

            // addressed -> resolve -> prompt for the next
            process_event(&mut s, MonitorEvent::CommentAddressed, None);
            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.question.as_ref().unwrap().contains("Comment 1 of 2"));
            assert_eq!(s.unresolved.len(), 2);
        }

        #[test]
        fn skip_advances_without_addressing() {
            let mut s = multi_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("address_all"));
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("skip"));
            assert!(d.question.as_ref().unwrap().contains("Comment 2 of 3"));
            assert_eq!(s.unresolved.len(), 3);

            process_event(&mut s, MonitorEvent::UserChose, Some("skip"));
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("skip"));
            assert_eq!(d.action, DirectiveAction::Polling);
            assert_eq!(s.phase, MonitorPhase::Polling);
        }

        #[test]
        fn stop_addressing_returns_to_polling() {
            let mut s = multi_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("address_all"));
            let d = process_event(
                &mut s,
                MonitorEvent::UserChose,
                Some("Stop addressing comments"),
            );
            assert_eq!(d.action, DirectiveAction::Polling);
        }

        #[test]
        fn pick_comment_by_number() {
            let mut s = multi_state();
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("address_specific"));
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert_eq!(s.comment_flow, CommentFlow::PickComment);
            assert!(d.choices.iter().any(|c| c.starts_with("2. bob")));

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("2. bob: ..."));
            assert_eq!(d.task.as_deref(), Some(task::ADDRESS_COMMENT));
            assert_eq!(d.context.as_ref().unwrap()["thread_id"], "T2");

            // after resolve, remaining comments yield the next/rest menu
            process_event(&mut s, MonitorEvent::CommentAddressed, None);
            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.choices.contains(&"Address another comment".to_string()));
            assert!(d.choices.contains(&"Address the rest".to_string()));
            assert_eq!(s.comment_flow, CommentFlow::PickRemaining);
        }

        #[test]
        fn invalid_pick_re_presents_the_list() {
            let mut s = multi_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("address_specific"));
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("9. nothing"));
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert_eq!(s.comment_flow, CommentFlow::PickComment);
        }

        #[test]
        fn ignoring_all_comments_grows_the_ignore_set() {
            let mut s = multi_state();
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("Ignore all comments"));
            assert_eq!(d.action, DirectiveAction::Polling);
            assert!(s.ignored_comment_ids.contains("T1"));
            assert!(s.ignored_comment_ids.contains("T2"));
            assert!(s.ignored_comment_ids.contains("T3"));
            assert!(s.unresolved.is_empty());
        }

        #[test]
        fn explain_returns_to_the_single_prompt_after_completion() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice")];
            build_terminal(&mut s, TerminalKind::NewComment);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("explain"));
            assert_eq!(d.task.as_deref(), Some(task::EXPLAIN_COMMENT));

            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.choices.contains(&"Address this comment".to_string()));
        }
    }

    mod ci_flows {
        use super::*;

        fn failed_state() -> MonitorState {
            let mut s = state();
            s.checks = CheckCounts {
                passed: 3,
                failed: 2,
                total: 5,
                ..Default::default()
            };
            s.failed_checks = vec![crate::github::FailedCheck {
                name: "ci/build".to_string(),
                conclusion: "failure".to_string(),
                title: None,
                details_url: None,
                external_id: None,
            }];
            build_terminal(&mut s, TerminalKind::CiFailure);
            s
        }

        #[test]
        fn investigate_path_reaches_results_menu() {
            let mut s = failed_state();
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("investigate"));
            assert_eq!(d.action, DirectiveAction::Execute);
            assert_eq!(d.task.as_deref(), Some(task::INVESTIGATE_CI_FAILURE));
            assert_eq!(s.phase, MonitorPhase::Investigating);
            assert_eq!(s.ci_flow, CiFlow::Investigating);

            s.findings = Some("flaky network test".to_string());
            s.suggested_fix = Some("bump the timeout".to_string());
            let d = process_event(&mut s, MonitorEvent::InvestigationComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert_eq!(s.phase, MonitorPhase::InvestigationResults);
            assert!(d.choices.contains(&"Apply the suggested fix".to_string()));
            assert!(d.choices.contains(&"Re-run the checks".to_string()));
        }

        #[test]
        fn duplicate_artifact_offers_exactly_two_choices() {
            let mut s = failed_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("investigate"));
            s.issue_type = Some("duplicate_artifact".to_string());
            s.suggested_fix = Some("irrelevant".to_string());
            let d = process_event(&mut s, MonitorEvent::InvestigationComplete, None);
            assert_eq!(
                d.choices,
                vec![
                    "Run a new build".to_string(),
                    "I'll handle it myself".to_string()
                ]
            );
        }

        #[test]
        fn apply_fix_then_push_completed_returns_to_polling() {
            let mut s = failed_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("investigate"));
            s.suggested_fix = Some("bump the timeout".to_string());
            process_event(&mut s, MonitorEvent::InvestigationComplete, None);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("apply_fix"));
            assert_eq!(d.action, DirectiveAction::Execute);
            assert_eq!(d.task.as_deref(), Some(task::APPLY_FIX));
            assert_eq!(s.phase, MonitorPhase::ApplyingFix);

            let d = process_event(&mut s, MonitorEvent::PushCompleted, None);
            assert_eq!(d.action, DirectiveAction::Polling);
            assert_eq!(s.phase, MonitorPhase::Polling);
            assert_eq!(s.ci_flow, CiFlow::None);
        }

        #[test]
        fn run_new_build_is_auto_executed() {
            let mut s = failed_state();
            process_event(&mut s, MonitorEvent::UserChose, Some("investigate"));
            s.issue_type = Some("duplicate_artifact".to_string());
            process_event(&mut s, MonitorEvent::InvestigationComplete, None);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("Run a new build"));
            assert_eq!(d.action, DirectiveAction::AutoExecute);
            assert_eq!(d.task.as_deref(), Some(task::RUN_NEW_BUILD));
        }

        #[test]
        fn show_logs_returns_to_ci_menu_after_completion() {
            let mut s = failed_state();
            let d = process_event(&mut s, MonitorEvent::UserChose, Some("show_logs"));
            assert_eq!(d.task.as_deref(), Some(task::SHOW_LOGS));
            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.choices.contains(&"Investigate the failure".to_string()));
        }
    }

    mod waiting_flow {
        use super::*;

        #[test]
        fn waiting_menu_and_resolve_path() {
            let mut s = state();
            s.phase = MonitorPhase::Polling;
            let mut t = thread("W1", "alice");
            t.waiting_for_reply = true;
            t.comment_count = 2;
            t.last_author = "author".to_string();

            let d = build_waiting_menu(&mut s, t);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert_eq!(
                d.choices,
                vec![
                    "Resolve the thread".to_string(),
                    "Post a follow-up reply".to_string(),
                    "Suggest the change again".to_string(),
                    "Go back".to_string()
                ]
            );
            assert_eq!(s.phase, MonitorPhase::AwaitingUser);
            assert!(s.active_waiting_comment.is_some());

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("resolve"));
            assert_eq!(d.action, DirectiveAction::AutoExecute);
            assert_eq!(d.task.as_deref(), Some(task::RESOLVE_THREAD));

            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::Polling);
            assert!(s.active_waiting_comment.is_none());
        }

        #[test]
        fn go_back_clears_the_active_thread() {
            let mut s = state();
            let mut t = thread("W1", "alice");
            t.waiting_for_reply = true;
            build_waiting_menu(&mut s, t);

            let d = process_event(&mut s, MonitorEvent::UserChose, Some("Go back"));
            assert_eq!(d.action, DirectiveAction::Polling);
            assert!(s.active_waiting_comment.is_none());
        }
    }

    mod recovery {
        use super::*;

        #[test]
        fn task_complete_from_awaiting_user_clears_active_waiting() {
            let mut s = state();
            let mut t = thread("W1", "alice");
            t.waiting_for_reply = true;
            build_waiting_menu(&mut s, t);

            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::Polling);
            assert!(s.active_waiting_comment.is_none());
            assert_eq!(s.phase, MonitorPhase::Polling);
        }

        #[test]
        fn task_complete_from_awaiting_user_resumes_comment_flow() {
            let mut s = state();
            s.unresolved = vec![thread("T1", "alice"), thread("T2", "bob")];
            build_terminal(&mut s, TerminalKind::NewComment);
            process_event(&mut s, MonitorEvent::UserChose, Some("address_all"));

            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::AskUser);
            assert!(d.question.as_ref().unwrap().contains("Comment 1 of 2"));
        }

        #[test]
        fn task_complete_with_no_context_just_polls() {
            let mut s = state();
            s.phase = MonitorPhase::AwaitingUser;
            let d = process_event(&mut s, MonitorEvent::TaskComplete, None);
            assert_eq!(d.action, DirectiveAction::Polling);
        }

        #[test]
        fn every_directive_comes_with_a_written_phase() {
            // A crude sweep: fire every event at a handful of phases and
            // assert the phase is always one of the defined ones and
            // ask_user directives always leave a prompt-capable phase.
            let events = [
                MonitorEvent::Ready,
                MonitorEvent::UserChose,
                MonitorEvent::CommentAddressed,
                MonitorEvent::InvestigationComplete,
                MonitorEvent::PushCompleted,
                MonitorEvent::TaskComplete,
            ];
            let phases = [
                MonitorPhase::Idle,
                MonitorPhase::Polling,
                MonitorPhase::AwaitingUser,
                MonitorPhase::ExecutingTask,
                MonitorPhase::Investigating,
                MonitorPhase::ApplyingFix,
            ];
            for phase in phases {
                for event in events {
                    let mut s = state();
                    s.phase = phase;
                    let d = process_event(&mut s, event, Some("resume"));
                    if d.action == DirectiveAction::AskUser {
                        assert!(
                            matches!(
                                s.phase,
                                MonitorPhase::AwaitingUser | MonitorPhase::InvestigationResults
                            ),
                            "ask_user left phase {:?} after {:?} in {:?}",
                            s.phase,
                            event,
                            phase
                        );
                        assert!(!d.choices.is_empty());
                    }
                }
            }
        }
    }
}
