//! Abort, single-run enforcement, hooks and session enrichment.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use common::{read_file_call, single_tool, text, FakeTool, HangingModel, ScriptedModel};
use runway::config::ExecutionConfig;
use runway::messages::{FnSink, OutputMessage};
use runway::runner::{FileTodoStore, MemoryHooks, TaskMeta};
use runway::session::{MemoryItem, TodoStatus};
use runway::{InMemorySession, RunnerError, Session, StopReason, TaskRunner};

#[tokio::test]
async fn abort_discards_in_flight_segment() {
    let entered = Arc::new(Notify::new());
    let model = Arc::new(HangingModel {
        entered: Arc::clone(&entered),
    });
    let runner = Arc::new(TaskRunner::new(model, ExecutionConfig::default()));

    let background = Arc::clone(&runner);
    let handle = tokio::spawn(async move {
        let mut session = InMemorySession::new();
        let result = background.run_task_detailed(&mut session, "long task").await;
        (result, session)
    });

    entered.notified().await;
    assert!(runner.is_running());

    // A second run on the same runner is refused while the first is active
    let mut other = InMemorySession::new();
    assert!(matches!(
        runner.run_task_detailed(&mut other, "second").await,
        Err(RunnerError::RunInProgress)
    ));
    assert!(other.messages().is_empty());

    assert!(runner.abort_current_run(Some("user pressed stop")));
    let (result, session) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should end after abort")
        .unwrap();
    let result = result.unwrap();

    assert!(!result.completed);
    assert_eq!(result.stop_reason, StopReason::Aborted);
    assert_eq!(result.segment_count, 0);
    assert!(session.messages().is_empty());
    assert!(session.context().budget.is_none());
    assert!(!runner.is_running());
    assert!(!runner.abort_current_run(None));
}

#[tokio::test]
async fn tool_patches_and_todo_store_enrich_context() {
    let dir = tempfile::tempdir().unwrap();
    let todo_path = dir.path().join("todo.json");
    tokio::fs::write(
        &todo_path,
        r#"{"items": [{"title": "read notes", "status": "done"}, {"title": "summarise"}]}"#,
    )
    .await
    .unwrap();

    let tool = FakeTool::new(
        "read_file",
        json!({
            "content": "# notes",
            "contextPatch": {
                "memory": {"working": [{"text": "notes.md has 3 sections"}]},
                "extra": {"lastFile": "notes.md"}
            }
        }),
    );
    let model = ScriptedModel::new(vec![read_file_call()], text("Summary ready."));
    let runner = TaskRunner::new(model, ExecutionConfig::default())
        .with_tools(single_tool(tool))
        .with_todo_store(Arc::new(FileTodoStore::new(&todo_path)));

    let mut session = InMemorySession::new();
    let result = runner.run_task_detailed(&mut session, "summarise notes.md").await.unwrap();
    assert!(result.completed);

    let context = session.context();
    assert_eq!(context.memory["working"], vec![MemoryItem::durable("notes.md has 3 sections")]);
    assert_eq!(context.extra["lastFile"], json!("notes.md"));
    let todo = context.todo.as_ref().unwrap();
    assert_eq!(todo.items[0].status, TodoStatus::Done);
    assert_eq!(todo.open_count(), 1);
    assert!(context.budget.is_some());
}

#[tokio::test]
async fn context_is_projected_into_next_task() {
    let tool = FakeTool::new(
        "read_file",
        json!({"contextPatch": {"extra": {"branch": "feature/x"}}}),
    );
    let model = ScriptedModel::new(vec![read_file_call(), text("first")], text("second"));
    let runner = TaskRunner::new(model.clone(), ExecutionConfig::default()).with_tools(single_tool(tool));

    let mut session = InMemorySession::new();
    runner.run_task_detailed(&mut session, "check the branch").await.unwrap();
    runner.run_task_detailed(&mut session, "and again").await.unwrap();

    let last_input = model.seen().pop().unwrap();
    let system = last_input[0].text_content().unwrap();
    assert!(system.contains("## Session Context"));
    assert!(system.contains("feature/x"));
    // Diagnostics stay out of the model's view
    assert!(!system.contains("estimatedInputTokens"));
}

struct CountingHooks {
    before: AtomicU32,
    after: AtomicU32,
    fail: bool,
}

#[async_trait]
impl MemoryHooks for CountingHooks {
    async fn before_task(&self, session: &mut dyn Session, _question: &str) -> anyhow::Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("memory backend offline");
        }
        let mut patch = runway::session::ContextPatch::default();
        patch
            .memory
            .insert("facts".into(), vec![MemoryItem::durable("user prefers short answers")]);
        session.merge_context_patch(patch);
        Ok(())
    }

    async fn after_task(&self, _session: &mut dyn Session, meta: &TaskMeta) -> anyhow::Result<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        assert!(meta.result.completed);
        if self.fail {
            anyhow::bail!("memory backend offline");
        }
        Ok(())
    }
}

#[tokio::test]
async fn memory_hooks_run_and_failures_are_ignored() {
    for fail in [false, true] {
        let hooks = Arc::new(CountingHooks {
            before: AtomicU32::new(0),
            after: AtomicU32::new(0),
            fail,
        });
        let model = ScriptedModel::new(vec![], text("ok"));
        let runner = TaskRunner::new(model, ExecutionConfig::default()).with_memory_hooks(hooks.clone());

        let mut session = InMemorySession::new();
        let result = runner.run_task_detailed(&mut session, "hello").await.unwrap();

        assert!(result.completed);
        assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
        assert_eq!(session.context().memory.contains_key("facts"), !fail);
    }
}

#[tokio::test]
async fn failing_sink_does_not_affect_outcome() {
    let model = ScriptedModel::new(vec![read_file_call()], text("done"));
    let sink = FnSink(|_: &OutputMessage| -> anyhow::Result<()> { anyhow::bail!("observer crashed") });
    let runner = TaskRunner::new(model, ExecutionConfig::default())
        .with_tools(single_tool(FakeTool::new("read_file", json!("file body"))))
        .with_sink(Arc::new(sink));

    let mut session = InMemorySession::new();
    let result = runner.run_task_detailed(&mut session, "read it").await.unwrap();
    assert!(result.completed);
    assert_eq!(result.total_tool_calls, 1);
}

#[tokio::test]
async fn failed_tool_result_goes_back_to_model() {
    let tool = FakeTool::new("read_file", json!({"isError": true, "content": [{"type": "text", "text": "ENOENT"}]}));
    let model = ScriptedModel::new(vec![read_file_call()], text("The file is missing."));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let runner = TaskRunner::new(model.clone(), ExecutionConfig::default())
        .with_tools(single_tool(tool))
        .with_sink(Arc::new(tx));

    let mut session = InMemorySession::new();
    let result = runner.run_task_detailed(&mut session, "read notes.md").await.unwrap();
    assert!(result.completed);

    let mut saw_failed_result = false;
    while let Ok(message) = rx.try_recv() {
        if let OutputMessage::ToolResult { ok, error, .. } = message {
            assert!(!ok);
            assert_eq!(error.as_deref(), Some("ENOENT"));
            saw_failed_result = true;
        }
    }
    assert!(saw_failed_result);

    // Second model call saw the tool message
    let second = &model.seen()[1];
    assert!(second.iter().any(|m| m.tool_call_id.is_some()));
}
