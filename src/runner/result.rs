//! Run results and runner errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guard::GuardStopKind;

/// Why a run ended. `Completed` is the only successful value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    ContextBudgetExhausted,
    ToolBudgetExhausted,
    ToolPolicyBlocked,
    ModelStepBudgetExhausted,
    StepLimitSegmentContinue,
    ContinuationLimitReached,
    IntentGuardBlocked,
    IntentGuardRequiredToolsUnavailable,
    IntentGuardRequiredSuccessUnmet,
    Aborted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::ContextBudgetExhausted => "context_budget_exhausted",
            StopReason::ToolBudgetExhausted => "tool_budget_exhausted",
            StopReason::ToolPolicyBlocked => "tool_policy_blocked",
            StopReason::ModelStepBudgetExhausted => "model_step_budget_exhausted",
            StopReason::StepLimitSegmentContinue => "step_limit_segment_continue",
            StopReason::ContinuationLimitReached => "continuation_limit_reached",
            StopReason::IntentGuardBlocked => "intent_guard_blocked",
            StopReason::IntentGuardRequiredToolsUnavailable => {
                "intent_guard_required_tools_unavailable"
            }
            StopReason::IntentGuardRequiredSuccessUnmet => "intent_guard_required_success_unmet",
            StopReason::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GuardStopKind> for StopReason {
    fn from(kind: GuardStopKind) -> Self {
        match kind {
            GuardStopKind::Blocked => StopReason::IntentGuardBlocked,
            GuardStopKind::RequiredToolsUnavailable => StopReason::IntentGuardRequiredToolsUnavailable,
            GuardStopKind::RequiredSuccessUnmet => StopReason::IntentGuardRequiredSuccessUnmet,
        }
    }
}

/// The single authoritative outcome of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Final assistant text; on non-completion it ends with a stop notice.
    pub text: String,
    /// Finish reason of the last segment that reached the model.
    pub finish_reason: Option<String>,
    /// Steps taken by the last segment.
    pub step_count: u32,
    pub total_model_steps: u32,
    pub total_tool_calls: u32,
    pub segment_count: u32,
    pub completed: bool,
    pub stop_reason: StopReason,
    /// Free-text explanation for guard and policy stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_detail: Option<String>,
}

/// Execution ceilings echoed in the stop notice.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NoticeLimits {
    pub max_model_steps: u32,
    pub max_tool_calls: u32,
}

/// `[stopped: reason] model steps x/y, tool calls a/b, segments n`
pub(crate) fn stop_notice(
    reason: StopReason,
    detail: Option<&str>,
    total_model_steps: u32,
    total_tool_calls: u32,
    segment_count: u32,
    limits: NoticeLimits,
) -> String {
    let mut notice = format!(
        "[stopped: {}] model steps {}/{}, tool calls {}/{}, segments {}",
        reason,
        total_model_steps,
        limits.max_model_steps,
        total_tool_calls,
        limits.max_tool_calls,
        segment_count
    );
    if let Some(detail) = detail {
        notice.push_str(" - ");
        notice.push_str(detail);
    }
    notice
}

/// Non-completion re-surfaced as an error by [`super::TaskRunner::run_task`].
#[derive(Debug, Clone, Error)]
#[error(
    "task stopped: {stop_reason} (model steps {total_model_steps}, tool calls {total_tool_calls}, segments {segment_count})"
)]
pub struct TaskStopError {
    pub stop_reason: StopReason,
    pub total_model_steps: u32,
    pub total_tool_calls: u32,
    pub segment_count: u32,
    pub detail: Option<String>,
    /// Text accumulated before the stop (including the stop notice).
    pub text: String,
}

impl From<RunResult> for TaskStopError {
    fn from(result: RunResult) -> Self {
        Self {
            stop_reason: result.stop_reason,
            total_model_steps: result.total_model_steps,
            total_tool_calls: result.total_tool_calls,
            segment_count: result.segment_count,
            detail: result.stop_detail,
            text: result.text,
        }
    }
}

/// Genuine faults; budget and policy outcomes never use this type.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("a run is already in progress on this runner")]
    RunInProgress,

    #[error("model provider error: {0:#}")]
    Provider(anyhow::Error),
}

/// Error type of [`super::TaskRunner::run_task`].
#[derive(Debug, Error)]
pub enum RunTaskError {
    #[error(transparent)]
    Stopped(#[from] TaskStopError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings_match_serde() {
        for reason in [
            StopReason::Completed,
            StopReason::ContextBudgetExhausted,
            StopReason::ToolBudgetExhausted,
            StopReason::ToolPolicyBlocked,
            StopReason::ModelStepBudgetExhausted,
            StopReason::StepLimitSegmentContinue,
            StopReason::ContinuationLimitReached,
            StopReason::IntentGuardBlocked,
            StopReason::IntentGuardRequiredToolsUnavailable,
            StopReason::IntentGuardRequiredSuccessUnmet,
            StopReason::Aborted,
        ] {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::Value::String(reason.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_stop_notice_names_reason_and_counts() {
        let notice = stop_notice(
            StopReason::ToolBudgetExhausted,
            None,
            4,
            3,
            1,
            NoticeLimits {
                max_model_steps: 64,
                max_tool_calls: 3,
            },
        );
        assert_eq!(
            notice,
            "[stopped: tool_budget_exhausted] model steps 4/64, tool calls 3/3, segments 1"
        );
    }

    #[test]
    fn test_stop_error_display() {
        let err = TaskStopError {
            stop_reason: StopReason::ContinuationLimitReached,
            total_model_steps: 15,
            total_tool_calls: 0,
            segment_count: 3,
            detail: None,
            text: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "task stopped: continuation_limit_reached (model steps 15, tool calls 0, segments 3)"
        );
    }
}
