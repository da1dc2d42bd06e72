//! The directive envelope and the fixed vocabularies
//!
//! A directive is the only thing the agent ever returns to the LLM: ask
//! the human a fixed question, execute a described task, keep polling, or
//! stop. The engine produces them; the tool surface serializes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the LLM should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveAction {
    /// Present a question and choice menu to the human, verbatim
    AskUser,
    /// Perform a described task (the LLM does the work)
    Execute,
    /// The agent performs the task itself; the LLM just loops
    AutoExecute,
    /// The agent is polling; the call blocks until something happens
    Polling,
    /// Monitoring has ended
    Stop,
    /// The PR merged; monitoring has ended
    Merged,
}

/// The structured instruction returned by every tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    pub action: DirectiveAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Directive {
    fn bare(action: DirectiveAction) -> Self {
        Self {
            action,
            question: None,
            choices: Vec::new(),
            task: None,
            instructions: None,
            message: None,
            context: None,
        }
    }

    pub fn ask_user(question: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            question: Some(question.into()),
            choices,
            ..Self::bare(DirectiveAction::AskUser)
        }
    }

    pub fn execute(task: &str) -> Self {
        Self {
            task: Some(task.to_string()),
            ..Self::bare(DirectiveAction::Execute)
        }
    }

    pub fn auto_execute(task: &str) -> Self {
        Self {
            task: Some(task.to_string()),
            ..Self::bare(DirectiveAction::AutoExecute)
        }
    }

    pub fn polling(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(DirectiveAction::Polling)
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(DirectiveAction::Stop)
        }
    }

    pub fn merged(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(DirectiveAction::Merged)
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Events the LLM feeds into `next_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Ready,
    UserChose,
    CommentAddressed,
    InvestigationComplete,
    PushCompleted,
    TaskComplete,
}

impl MonitorEvent {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ready" => Some(Self::Ready),
            "user_chose" => Some(Self::UserChose),
            "comment_addressed" => Some(Self::CommentAddressed),
            "investigation_complete" => Some(Self::InvestigationComplete),
            "push_completed" => Some(Self::PushCompleted),
            "task_complete" => Some(Self::TaskComplete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::UserChose => "user_chose",
            Self::CommentAddressed => "comment_addressed",
            Self::InvestigationComplete => "investigation_complete",
            Self::PushCompleted => "push_completed",
            Self::TaskComplete => "task_complete",
        }
    }
}

/// Task tokens for `execute` / `auto_execute` directives
pub mod task {
    pub const ADDRESS_COMMENT: &str = "address_comment";
    pub const EXPLAIN_COMMENT: &str = "explain_comment";
    pub const FOLLOW_UP_COMMENT: &str = "follow_up_comment";
    pub const RE_SUGGEST_CHANGE: &str = "re_suggest_change";
    pub const INVESTIGATE_CI_FAILURE: &str = "investigate_ci_failure";
    pub const APPLY_FIX: &str = "apply_fix";
    pub const SHOW_LOGS: &str = "show_logs";
    pub const RERUN_VIA_BROWSER: &str = "rerun_via_browser";
    pub const RESOLVE_THREAD: &str = "resolve_thread";
    pub const MERGE_PR: &str = "merge_pr";
    pub const MERGE_PR_ADMIN: &str = "merge_pr_admin";
    pub const RUN_NEW_BUILD: &str = "run_new_build";
}

/// Choice tokens and their menu labels.
///
/// Menus carry human-readable labels; the LLM may echo back either the
/// token or the label. `normalize` maps both onto the token space before
/// the engine dispatches. Numbered picks stay as-is (the engine parses
/// the leading integer).
pub mod choice {
    pub const ADDRESS_ALL: &str = "address_all";
    pub const ADDRESS_SPECIFIC: &str = "address_specific";
    pub const ADDRESS: &str = "address";
    pub const EXPLAIN: &str = "explain";
    pub const HANDLE_MYSELF: &str = "handle_myself";
    pub const SKIP: &str = "skip";
    pub const DONE: &str = "done";
    pub const CONTINUE: &str = "continue";
    pub const RESUME: &str = "resume";
    pub const INVESTIGATE: &str = "investigate";
    pub const SHOW_LOGS: &str = "show_logs";
    pub const RERUN: &str = "rerun";
    pub const RERUN_FAILED: &str = "rerun_failed";
    pub const APPLY_FIX: &str = "apply_fix";
    pub const IGNORE: &str = "ignore";
    pub const RUN_NEW: &str = "run_new";
    pub const MERGE: &str = "merge";
    pub const MERGE_ADMIN: &str = "merge_admin";
    pub const WAIT_FOR_APPROVER: &str = "wait_for_approver";
    pub const RESOLVE: &str = "resolve";
    pub const FOLLOW_UP: &str = "follow_up";
    pub const RE_SUGGEST: &str = "re_suggest";
    pub const GO_BACK: &str = "go_back";

    /// (label, token) pairs; labels are what the menus display
    const LABELS: &[(&str, &str)] = &[
        ("Address all comments", ADDRESS_ALL),
        ("Address a specific comment", ADDRESS_SPECIFIC),
        ("Address this comment", ADDRESS),
        ("Explain this comment to me", EXPLAIN),
        ("I'll handle it myself", HANDLE_MYSELF),
        ("Skip this comment", SKIP),
        ("Stop addressing comments", DONE),
        ("Stop monitoring", DONE),
        ("Go ahead with this comment", CONTINUE),
        ("Address another comment", CONTINUE),
        ("Address the rest", ADDRESS_ALL),
        ("Resume monitoring", RESUME),
        ("Keep monitoring", RESUME),
        ("Investigate the failure", INVESTIGATE),
        ("Show me the logs", SHOW_LOGS),
        ("Re-run the checks", RERUN),
        ("Re-run failed checks only", RERUN_FAILED),
        ("Apply the suggested fix", APPLY_FIX),
        ("Ignore this comment", IGNORE),
        ("Ignore all comments", IGNORE),
        ("Ignore and keep monitoring", IGNORE),
        ("Run a new build", RUN_NEW),
        ("Merge the PR", MERGE),
        ("Merge with admin override", MERGE_ADMIN),
        ("Wait for another approval", WAIT_FOR_APPROVER),
        ("Resolve the thread", RESOLVE),
        ("Post a follow-up reply", FOLLOW_UP),
        ("Suggest the change again", RE_SUGGEST),
        ("Go back", GO_BACK),
    ];

    /// Map a raw `choice` input (token, label, or numbered pick) to a token
    pub fn normalize(input: &str) -> String {
        let trimmed = input.trim();
        for (label, token) in LABELS {
            if trimmed.eq_ignore_ascii_case(label) {
                return (*token).to_string();
            }
        }
        trimmed.to_string()
    }

    /// Leading integer of a numbered pick ("3. fix typo" -> 3)
    pub fn leading_number(input: &str) -> Option<usize> {
        let digits: String = input
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_round_trips_through_json() {
        let directive = Directive::ask_user(
            "Merge now?",
            vec!["Merge the PR".to_string(), "Resume monitoring".to_string()],
        )
        .with_context(serde_json::json!({"pr": 7}))
        .with_instructions("Present verbatim.");

        let json = serde_json::to_string(&directive).unwrap();
        let back: Directive = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, DirectiveAction::AskUser);
        assert_eq!(back.question.as_deref(), Some("Merge now?"));
        assert_eq!(back.choices.len(), 2);
        assert_eq!(back.context.unwrap()["pr"], 7);
    }

    #[test]
    fn bare_directives_omit_empty_fields() {
        let json = serde_json::to_value(Directive::polling("watching")).unwrap();
        assert_eq!(json["action"], "polling");
        assert!(json.get("question").is_none());
        assert!(json.get("choices").is_none());
        assert!(json.get("task").is_none());
    }

    #[test]
    fn events_parse_their_names() {
        for event in [
            MonitorEvent::Ready,
            MonitorEvent::UserChose,
            MonitorEvent::CommentAddressed,
            MonitorEvent::InvestigationComplete,
            MonitorEvent::PushCompleted,
            MonitorEvent::TaskComplete,
        ] {
            assert_eq!(MonitorEvent::parse(event.as_str()), Some(event));
        }
        assert_eq!(MonitorEvent::parse("reboot"), None);
    }

    #[test]
    fn choices_normalize_labels_and_pass_tokens() {
        assert_eq!(choice::normalize("Merge the PR"), choice::MERGE);
        assert_eq!(choice::normalize("merge"), choice::MERGE);
        assert_eq!(choice::normalize("I'll handle it myself"), choice::HANDLE_MYSELF);
        assert_eq!(choice::normalize("3. fix the typo"), "3. fix the typo");
    }

    #[test]
    fn numbered_picks_parse_leading_integer() {
        assert_eq!(choice::leading_number("3. fix the typo"), Some(3));
        assert_eq!(choice::leading_number("12"), Some(12));
        assert_eq!(choice::leading_number("fix it"), None);
    }
}
