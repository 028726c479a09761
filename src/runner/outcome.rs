//! Segment-outcome classification.
//!
//! [`classify_segment`] is a pure function: the same observation and config
//! always produce the same decision. The runner applies the intent guard's
//! completion check on top of a `Complete` decision.

use std::sync::OnceLock;

use regex::Regex;

use super::StopReason;
use crate::config::ExecutionConfig;

/// What the runner saw at the end of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentObservation<'a> {
    pub finish_reason: Option<&'a str>,
    pub segment_step_count: u32,
    /// Step cap the segment ran under.
    pub segment_step_cap: u32,
    /// Including this segment.
    pub total_model_steps: u32,
    /// Continuations already started before this decision.
    pub continuation_runs: u32,
    /// Structured "hit step limit" signal from the executor, when it has one.
    pub provider_hit_step_limit: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDecision {
    /// The model stopped on its own.
    Complete,
    /// Start another segment.
    Continue,
    Stop(StopReason),
}

fn limit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(length|max[_\- ]?(steps|tokens)|step[_\- ]?limit|limit)")
            .expect("limit pattern is valid")
    })
}

/// Heuristic: does a free-text finish reason look like a length/step cutoff?
///
/// Provider wording varies; only consulted when the executor gave no
/// structured signal and the segment used its whole step cap.
pub fn finish_reason_indicates_limit(finish_reason: &str) -> bool {
    limit_pattern().is_match(finish_reason)
}

/// Whether the segment ran into its per-run step ceiling.
pub fn hit_step_ceiling(obs: &SegmentObservation<'_>, config: &ExecutionConfig) -> bool {
    if obs.segment_step_count >= config.max_model_steps_per_run {
        return true;
    }
    match obs.provider_hit_step_limit {
        Some(hit) => hit,
        // An output-token cutoff below the cap is not a step ceiling
        None => {
            obs.segment_step_count >= obs.segment_step_cap
                && obs.finish_reason.map(finish_reason_indicates_limit).unwrap_or(false)
        }
    }
}

pub fn classify_segment(obs: &SegmentObservation<'_>, config: &ExecutionConfig) -> SegmentDecision {
    if obs.total_model_steps >= config.max_model_steps_per_task {
        return SegmentDecision::Stop(StopReason::ModelStepBudgetExhausted);
    }
    if !hit_step_ceiling(obs, config) {
        return SegmentDecision::Complete;
    }
    if !config.auto_continue_on_step_limit {
        return SegmentDecision::Stop(StopReason::StepLimitSegmentContinue);
    }
    if obs.continuation_runs < config.max_continuation_runs {
        SegmentDecision::Continue
    } else {
        SegmentDecision::Stop(StopReason::ContinuationLimitReached)
    }
}
