//! Scripted model and tool fakes shared by the scenario tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use runway::llm::{ChatMessage, ChatResponse, LlmClient, ToolCall, ToolDefinition};
use runway::messages::{MessageSink, OutputMessage};
use runway::tools::{Tool, ToolContext, ToolRegistry, ToolRegistryFactory};

/// What the scripted model does on each call.
#[derive(Clone)]
pub enum Reply {
    Text(String),
    /// Text cut off by the provider's output-token limit.
    Truncated(String),
    ToolCalls(Vec<(String, Value)>),
    Fail(String),
}

/// Model that replays a script, then repeats a fallback reply forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicU32,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Always requests one `read_file` call.
    pub fn always_tools() -> Arc<Self> {
        Self::new(vec![], read_file_call())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Model inputs, one entry per call.
    pub fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn read_file_call() -> Reply {
    Reply::ToolCalls(vec![("read_file".to_string(), json!({"path": "notes.md"}))])
}

pub fn text(t: &str) -> Reply {
    Reply::Text(t.to_string())
}

#[async_trait]
impl LlmClient for ScriptedModel {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Text(t) => Ok(ChatResponse {
                content: Some(t),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }),
            Reply::Truncated(t) => Ok(ChatResponse {
                content: Some(t),
                finish_reason: Some("length".to_string()),
                ..Default::default()
            }),
            Reply::ToolCalls(calls) => Ok(ChatResponse {
                content: None,
                tool_calls: Some(
                    calls
                        .into_iter()
                        .enumerate()
                        .map(|(i, (name, args))| {
                            ToolCall::function(format!("call_{}_{}", n, i), name, args.to_string())
                        })
                        .collect(),
                ),
                finish_reason: Some("tool_calls".to_string()),
                ..Default::default()
            }),
            Reply::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

/// Model whose first call blocks until the run is cancelled.
pub struct HangingModel {
    pub entered: Arc<Notify>,
}

#[async_trait]
impl LlmClient for HangingModel {
    async fn chat_completion(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.entered.notify_one();
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Tool that returns a fixed JSON value and counts invocations.
pub struct FakeTool {
    name: String,
    reply: Value,
    pub invocations: Arc<AtomicU32>,
}

impl FakeTool {
    pub fn new(name: &str, reply: Value) -> Self {
        Self {
            name: name.to_string(),
            reply,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Tool for FakeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Factory producing `read_file`, `run_command` and `browser_open`, sharing one
/// invocation counter.
pub fn standard_tools() -> (ToolRegistryFactory, Arc<AtomicU32>) {
    let counter = Arc::new(AtomicU32::new(0));
    let shared = Arc::clone(&counter);
    let factory: ToolRegistryFactory = Arc::new(move |_: &ToolContext| {
        let mut registry = ToolRegistry::empty();
        for (name, reply) in [
            ("read_file", json!({"content": "# notes"})),
            ("run_command", json!({"stdout": "ok", "exitCode": 0})),
            ("browser_open", json!({"title": "Example"})),
        ] {
            let mut tool = FakeTool::new(name, reply);
            tool.invocations = Arc::clone(&shared);
            registry.register(Arc::new(tool));
        }
        registry
    });
    (factory, counter)
}

/// Factory with a single tool.
pub fn single_tool(tool: FakeTool) -> ToolRegistryFactory {
    let tool: Arc<dyn Tool> = Arc::new(tool);
    Arc::new(move |_: &ToolContext| {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::clone(&tool));
        registry
    })
}

/// Sink collecting every message.
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<OutputMessage>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages.lock().unwrap().iter().map(|m| m.kind()).collect()
    }

    pub fn messages(&self) -> Vec<OutputMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for Recorder {
    fn send(&self, message: &OutputMessage) -> anyhow::Result<()> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
