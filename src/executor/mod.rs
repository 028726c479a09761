//! Model executor - one bounded model invocation (a segment).
//!
//! A segment is a loop of model steps. Each step is one streamed completion;
//! if the model requests tools, they run through the [`ToolGate`] and their
//! results are fed back for the next step.
//!
//! # Message ordering per step
//! `assistant.text`, then `tool.call`s, then `tool.result`s, then exactly one
//! `step.finish`. A step's messages are all emitted before the next step
//! starts. Steps are numbered from 1.
//!
//! # Postconditions
//! - `step_count <= max_steps`
//! - Budget and policy denials are returned as [`SegmentResult::Stopped`],
//!   never as `Err`. `Err` is reserved for provider faults.

mod tag;

pub use tag::{extract_tag, TagExtractor};

use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::budget::BudgetConsumption;
use crate::llm::{ChatMessage, ChatOptions, ChatStreamEvent, LlmClient, ToolCall};
use crate::messages::{emit, MessageSink, OutputMessage};
use crate::tools::{ToolGate, ToolOutcome, ToolOutput};

/// Tag stripped from assistant text and returned as reasoning.
pub const DEFAULT_REASONING_TAG: &str = "think";

/// Inputs for one segment.
#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub segment_index: u32,
    pub model: String,
    /// Full model input (system prompt, history, new user turn).
    pub messages: Vec<ChatMessage>,
    pub max_steps: u32,
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

/// A tool call that ran to completion.
#[derive(Debug, Clone)]
pub struct SettledCall {
    pub call_id: String,
    pub tool_name: String,
    pub output: ToolOutput,
}

/// What one segment produced.
#[derive(Debug, Clone, Default)]
pub struct SegmentOutput {
    /// Visible text of the last step that had any.
    pub text: String,
    /// Content stripped out of reasoning tags, across all steps.
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub step_count: u32,
    /// `Some(true)` when the step cap was reached with tool work still pending,
    /// `Some(false)` when the model stopped on its own.
    pub hit_step_limit: Option<bool>,
    /// Assistant and tool turns to append to the session.
    pub messages: Vec<ChatMessage>,
    pub settled: Vec<SettledCall>,
}

/// A budget or policy denial raised by a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentSignal {
    ToolBudgetExceeded {
        tool_name: String,
        consumption: BudgetConsumption,
    },
    ToolPolicyBlocked {
        tool_name: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub enum SegmentResult {
    Finished(SegmentOutput),
    /// A tool call was denied; `partial` holds everything up to and including
    /// the step that raised it.
    Stopped {
        signal: SegmentSignal,
        partial: SegmentOutput,
    },
    /// The run was aborted; nothing from this segment should be applied.
    Cancelled,
}

/// Visible text and reasoning of one step.
struct StepText {
    visible: String,
    reasoning: String,
}

/// Runs segments against an [`LlmClient`].
pub struct ModelExecutor {
    llm: Arc<dyn LlmClient>,
    sink: Arc<dyn MessageSink>,
    reasoning_tag: String,
}

impl ModelExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            llm,
            sink,
            reasoning_tag: DEFAULT_REASONING_TAG.to_string(),
        }
    }

    pub fn with_reasoning_tag(mut self, tag: impl Into<String>) -> Self {
        self.reasoning_tag = tag.into();
        self
    }

    pub async fn run_segment(
        &self,
        request: SegmentRequest,
        gate: &ToolGate,
        cancel: &CancellationToken,
    ) -> anyhow::Result<SegmentResult> {
        let segment = request.segment_index;
        let tools = gate.registry().get_tool_schemas();
        let tools = (!tools.is_empty()).then_some(tools);
        let options = ChatOptions {
            temperature: request.temperature,
            top_p: None,
            max_tokens: request.max_output_tokens,
        };

        let mut conversation = request.messages;
        let mut output = SegmentOutput::default();
        let mut reasoning = String::new();

        for provider_step in 0..request.max_steps {
            let step = provider_step + 1;
            tracing::debug!("Segment {} step {}/{}", segment, step, request.max_steps);

            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SegmentResult::Cancelled),
                stream = self.llm.chat_completion_stream(
                    &request.model,
                    &conversation,
                    tools.as_deref(),
                    options.clone(),
                ) => stream?,
            };

            let (step_text, response) = {
                let mut stream = stream;
                let mut extractor = TagExtractor::new(&self.reasoning_tag);
                let mut visible = String::new();
                let mut saw_delta = false;
                let mut done = None;

                loop {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(SegmentResult::Cancelled),
                        event = stream.next() => event,
                    };
                    match event {
                        Some(Ok(ChatStreamEvent::TextDelta(delta))) => {
                            saw_delta = true;
                            visible.push_str(&extractor.push(&delta));
                        }
                        Some(Ok(ChatStreamEvent::Done(response))) => {
                            done = Some(response);
                            break;
                        }
                        Some(Err(e)) => return Err(e),
                        None => break,
                    }
                }

                let response = done.ok_or_else(|| {
                    anyhow::anyhow!("model stream ended without a final response")
                })?;
                if !saw_delta {
                    if let Some(content) = response.content.as_deref() {
                        visible.push_str(&extractor.push(content));
                    }
                }
                visible.push_str(&extractor.finish());
                (
                    StepText {
                        visible,
                        reasoning: extractor.take_extracted(),
                    },
                    response,
                )
            };

            output.step_count = step;
            output.finish_reason = response.finish_reason.clone();
            if !step_text.reasoning.is_empty() {
                if !reasoning.is_empty() {
                    reasoning.push('\n');
                }
                reasoning.push_str(&step_text.reasoning);
            }

            let visible = step_text.visible.trim().to_string();
            if !visible.is_empty() {
                emit(
                    self.sink.as_ref(),
                    OutputMessage::AssistantText {
                        segment,
                        step,
                        text: visible.clone(),
                    },
                );
                output.text = visible.clone();
            }

            let calls: Vec<ToolCall> = response.requested_tool_calls().to_vec();
            let assistant = ChatMessage::assistant(
                (!visible.is_empty()).then(|| visible.clone()),
                Some(calls.clone()),
            );
            conversation.push(assistant.clone());
            output.messages.push(assistant);

            if calls.is_empty() {
                output.hit_step_limit = Some(false);
                self.finish_step(segment, step, &response.finish_reason, 0, response.usage.clone());
                break;
            }

            for call in &calls {
                emit(
                    self.sink.as_ref(),
                    OutputMessage::ToolCall {
                        segment,
                        step,
                        call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        arguments: call.parsed_arguments(),
                    },
                );
            }

            let invocations = join_all(
                calls
                    .iter()
                    .map(|call| gate.invoke(&call.function.name, call.parsed_arguments())),
            );
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SegmentResult::Cancelled),
                outcomes = invocations => outcomes,
            };

            let mut signal = None;
            for (call, outcome) in calls.iter().zip(outcomes) {
                let (ok, content, error) = match outcome {
                    ToolOutcome::Settled(tool_output) => {
                        let content = tool_output.model_content();
                        let ok = tool_output.ok;
                        let error = tool_output.error.clone();
                        output.settled.push(SettledCall {
                            call_id: call.id.clone(),
                            tool_name: call.function.name.clone(),
                            output: tool_output,
                        });
                        (ok, content, error)
                    }
                    ToolOutcome::BudgetExceeded(consumption) => {
                        let text = format!(
                            "Tool call budget exhausted ({}/{} calls used); {} was not run.",
                            consumption.used, consumption.limit, call.function.name
                        );
                        signal.get_or_insert(SegmentSignal::ToolBudgetExceeded {
                            tool_name: call.function.name.clone(),
                            consumption,
                        });
                        (false, text.clone(), Some(text))
                    }
                    ToolOutcome::PolicyBlocked { reason } => {
                        let text = format!("Blocked by intent policy: {}", reason);
                        signal.get_or_insert(SegmentSignal::ToolPolicyBlocked {
                            tool_name: call.function.name.clone(),
                            reason,
                        });
                        (false, text.clone(), Some(text))
                    }
                };

                emit(
                    self.sink.as_ref(),
                    OutputMessage::ToolResult {
                        segment,
                        step,
                        call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        ok,
                        output: content.clone(),
                        error,
                    },
                );
                let result = ChatMessage::tool_result(call.id.clone(), content);
                conversation.push(result.clone());
                output.messages.push(result);
            }

            self.finish_step(
                segment,
                step,
                &response.finish_reason,
                calls.len(),
                response.usage.clone(),
            );

            if let Some(signal) = signal {
                output.reasoning = (!reasoning.is_empty()).then_some(reasoning);
                return Ok(SegmentResult::Stopped {
                    signal,
                    partial: output,
                });
            }

            if step == request.max_steps {
                tracing::debug!(
                    "Segment {} reached its step cap with tool results pending",
                    segment
                );
                output.hit_step_limit = Some(true);
            }
        }

        output.reasoning = (!reasoning.is_empty()).then_some(reasoning);
        Ok(SegmentResult::Finished(output))
    }

    fn finish_step(
        &self,
        segment: u32,
        step: u32,
        finish_reason: &Option<String>,
        tool_calls: usize,
        usage: Option<crate::llm::TokenUsage>,
    ) {
        emit(
            self.sink.as_ref(),
            OutputMessage::StepFinish {
                segment,
                step,
                finish_reason: finish_reason.clone(),
                tool_calls,
                usage,
            },
        );
    }
}
