//! Conversation session - message history plus a structured context snapshot.
//!
//! The session is owned by the caller and outlives individual runs. The task
//! runner only touches it through the narrow [`Session`] methods; it never
//! replaces it wholesale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::BudgetDiagnostics;
use crate::llm::ChatMessage;

/// Metadata about the task currently driven through the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub question: String,
    /// Conversation round; advanced by continuation turns.
    pub round: u32,
    pub started_at: DateTime<Utc>,
}

/// Lifetime class of a memory item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemKind {
    /// Kept across trimming (only capped per tier).
    #[default]
    Durable,
    /// Scratch state that is safe to drop under context pressure.
    Ephemeral,
    /// Captured terminal/command output; dropped first under pressure.
    Terminal,
}

/// One entry in a memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub text: String,
    #[serde(default)]
    pub kind: MemoryItemKind,
}

impl MemoryItem {
    pub fn durable(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: MemoryItemKind::Durable,
        }
    }

    pub fn with_kind(text: impl Into<String>, kind: MemoryItemKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    /// Whether trimming should drop this item outright.
    pub fn is_disposable(&self) -> bool {
        matches!(self.kind, MemoryItemKind::Ephemeral | MemoryItemKind::Terminal)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub status: TodoStatus,
}

/// Progress list maintained by the agent (read from an external store).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoSnapshot {
    #[serde(default)]
    pub items: Vec<TodoItem>,
}

impl TodoSnapshot {
    /// Accept either `{"items": [...]}` or a bare item array.
    pub fn from_json(value: &Value) -> Option<Self> {
        if value.get("items").is_some() {
            return serde_json::from_value(value.clone()).ok();
        }
        serde_json::from_value::<Vec<TodoItem>>(value.clone())
            .ok()
            .map(|items| Self { items })
    }

    pub fn open_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status != TodoStatus::Done)
            .count()
    }
}

/// Structured state attached to the session and projected into model input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<ActiveTask>,
    /// Tier name -> items, oldest first.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub memory: BTreeMap<String, Vec<MemoryItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<TodoSnapshot>,
    /// Last context plan diagnostics. Never projected to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetDiagnostics>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Partial update to a [`ContextSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPatch {
    /// Items appended to the named tiers.
    #[serde(default)]
    pub memory: BTreeMap<String, Vec<MemoryItem>>,
    /// Replaces the todo snapshot when present.
    #[serde(default)]
    pub todo: Option<TodoSnapshot>,
    /// Shallow merge into `extra`; a `null` value removes the key.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.todo.is_none() && self.extra.is_empty()
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_todo(mut self, todo: TodoSnapshot) -> Self {
        self.todo = Some(todo);
        self
    }
}

impl ContextSnapshot {
    /// Apply `patch` in place.
    pub fn apply(&mut self, patch: ContextPatch) {
        for (tier, items) in patch.memory {
            self.memory.entry(tier).or_default().extend(items);
        }
        if let Some(todo) = patch.todo {
            self.todo = Some(todo);
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
    }
}

/// Options for a continuation turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuationTurn {
    pub advance_round: bool,
}

/// Caller-owned conversation state, mutated by the runner through these
/// methods only.
pub trait Session: Send {
    /// Start a new task: append the user's question and reset task metadata.
    fn prepare_user_turn(&mut self, text: &str);

    /// Append a runner-generated continuation prompt.
    fn prepare_continuation_turn(&mut self, text: &str, turn: ContinuationTurn);

    /// Append assistant/tool turns produced by a segment.
    fn append_messages(&mut self, messages: Vec<ChatMessage>);

    /// Ordered message history.
    fn messages(&self) -> &[ChatMessage];

    fn context(&self) -> &ContextSnapshot;

    fn merge_context_patch(&mut self, patch: ContextPatch);

    fn update_budget_diagnostics(&mut self, snapshot: BudgetDiagnostics);
}

/// Plain in-memory session.
#[derive(Debug, Clone, Default)]
pub struct InMemorySession {
    messages: Vec<ChatMessage>,
    context: ContextSnapshot,
}

impl InMemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session with existing history and context.
    pub fn with_state(messages: Vec<ChatMessage>, context: ContextSnapshot) -> Self {
        Self { messages, context }
    }
}

impl Session for InMemorySession {
    fn prepare_user_turn(&mut self, text: &str) {
        self.messages.push(ChatMessage::user(text));
        self.context.active_task = Some(ActiveTask {
            question: text.to_string(),
            round: 1,
            started_at: Utc::now(),
        });
    }

    fn prepare_continuation_turn(&mut self, text: &str, turn: ContinuationTurn) {
        self.messages.push(ChatMessage::user(text));
        if turn.advance_round {
            if let Some(task) = self.context.active_task.as_mut() {
                task.round += 1;
            }
        }
    }

    fn append_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages.extend(messages);
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn context(&self) -> &ContextSnapshot {
        &self.context
    }

    fn merge_context_patch(&mut self, patch: ContextPatch) {
        self.context.apply(patch);
    }

    fn update_budget_diagnostics(&mut self, snapshot: BudgetDiagnostics) {
        self.context.budget = Some(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_appends_memory_and_merges_extra() {
        let mut snapshot = ContextSnapshot::default();
        snapshot
            .memory
            .insert("working".into(), vec![MemoryItem::durable("a")]);
        snapshot.extra.insert("stale".into(), json!(1));

        let mut patch = ContextPatch::default()
            .with_extra("stale", Value::Null)
            .with_extra("mode", json!("review"));
        patch
            .memory
            .insert("working".into(), vec![MemoryItem::durable("b")]);
        snapshot.apply(patch);

        let texts: Vec<_> = snapshot.memory["working"].iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(!snapshot.extra.contains_key("stale"));
        assert_eq!(snapshot.extra["mode"], json!("review"));
    }

    #[test]
    fn test_continuation_advances_round() {
        let mut session = InMemorySession::new();
        session.prepare_user_turn("fix the build");
        session.prepare_continuation_turn("keep going", ContinuationTurn { advance_round: true });
        session.prepare_continuation_turn("keep going", ContinuationTurn::default());

        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.context().active_task.as_ref().unwrap().round, 2);
    }

    #[test]
    fn test_patch_deserializes_from_tool_json() {
        let patch: ContextPatch = serde_json::from_value(json!({
            "memory": {"episodic": [{"text": "ran tests", "kind": "terminal"}]},
            "todo": {"items": [{"title": "write docs", "status": "in_progress"}]}
        }))
        .unwrap();
        assert_eq!(patch.memory["episodic"][0].kind, MemoryItemKind::Terminal);
        assert_eq!(patch.todo.unwrap().open_count(), 1);
    }
}
