//! Continuation prompt for segments after the first.

/// Remaining runway shown to the model when a segment is continued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationState {
    pub segment_index: u32,
    pub remaining_tool_calls: u32,
    pub remaining_model_steps: u32,
    pub continuations_used: u32,
    pub continuation_limit: u32,
}

pub fn continuation_prompt(state: &ContinuationState) -> String {
    format!(
        "Continue the task from where you stopped; the previous segment reached its step limit.\n\
         Segment: {}\n\
         Remaining budget: {} tool calls, {} model steps\n\
         Continuations used: {}/{}\n\
         Do not repeat work that is already done. When the task is complete, reply with the final answer and no tool calls.",
        state.segment_index,
        state.remaining_tool_calls,
        state.remaining_model_steps,
        state.continuations_used,
        state.continuation_limit
    )
}
