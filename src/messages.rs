//! In-process output message stream.
//!
//! Messages are delivered synchronously to a caller-supplied [`MessageSink`]
//! while a run progresses. Sink failures are logged and never affect the run.

use serde::Serialize;
use serde_json::Value;

use crate::llm::TokenUsage;
use crate::runner::RunResult;

/// One observable event of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutputMessage {
    #[serde(rename = "assistant.text", rename_all = "camelCase")]
    AssistantText { segment: u32, step: u32, text: String },

    #[serde(rename = "tool.call", rename_all = "camelCase")]
    ToolCall {
        segment: u32,
        step: u32,
        call_id: String,
        tool_name: String,
        arguments: Value,
    },

    #[serde(rename = "tool.result", rename_all = "camelCase")]
    ToolResult {
        segment: u32,
        step: u32,
        call_id: String,
        tool_name: String,
        ok: bool,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Steps are 1-based.
    #[serde(rename = "step.finish", rename_all = "camelCase")]
    StepFinish {
        segment: u32,
        step: u32,
        finish_reason: Option<String>,
        tool_calls: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },

    #[serde(rename = "task.finish", rename_all = "camelCase")]
    TaskFinish { result: RunResult },

    #[serde(rename = "task.error", rename_all = "camelCase")]
    TaskError { message: String },
}

impl OutputMessage {
    /// Wire discriminator, e.g. `tool.call`.
    pub fn kind(&self) -> &'static str {
        match self {
            OutputMessage::AssistantText { .. } => "assistant.text",
            OutputMessage::ToolCall { .. } => "tool.call",
            OutputMessage::ToolResult { .. } => "tool.result",
            OutputMessage::StepFinish { .. } => "step.finish",
            OutputMessage::TaskFinish { .. } => "task.finish",
            OutputMessage::TaskError { .. } => "task.error",
        }
    }
}

/// Receiver of output messages.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: &OutputMessage) -> anyhow::Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn send(&self, _message: &OutputMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

impl MessageSink for tokio::sync::mpsc::UnboundedSender<OutputMessage> {
    fn send(&self, message: &OutputMessage) -> anyhow::Result<()> {
        tokio::sync::mpsc::UnboundedSender::send(self, message.clone())
            .map_err(|_| anyhow::anyhow!("output channel closed"))
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> MessageSink for FnSink<F>
where
    F: Fn(&OutputMessage) -> anyhow::Result<()> + Send + Sync,
{
    fn send(&self, message: &OutputMessage) -> anyhow::Result<()> {
        (self.0)(message)
    }
}

/// Deliver `message`, logging and swallowing sink failures.
pub fn emit(sink: &dyn MessageSink, message: OutputMessage) {
    if let Err(e) = sink.send(&message) {
        tracing::warn!("Output sink rejected {} message: {:#}", message.kind(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_with_dotted_tag() {
        let msg = OutputMessage::ToolCall {
            segment: 1,
            step: 2,
            call_id: "c1".into(),
            tool_name: "read_file".into(),
            arguments: json!({"path": "a"}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "tool.call");
        assert_eq!(value["toolName"], "read_file");
        assert_eq!(value["callId"], "c1");
        assert_eq!(msg.kind(), "tool.call");
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let sink = FnSink(|_: &OutputMessage| -> anyhow::Result<()> { anyhow::bail!("sink down") });
        emit(&sink, OutputMessage::TaskError { message: "x".into() });
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        emit(&tx, OutputMessage::TaskError { message: "boom".into() });
        assert!(matches!(rx.try_recv(), Ok(OutputMessage::TaskError { message }) if message == "boom"));

        drop(rx);
        // Closed channel only logs
        emit(&tx, OutputMessage::TaskError { message: "late".into() });
    }
}
