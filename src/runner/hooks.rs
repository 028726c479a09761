//! Optional best-effort collaborators: persistent memory hooks and the todo store.
//!
//! Failures from either are logged by the runner and never change a task's outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::RunResult;
use crate::session::{Session, TodoSnapshot};

/// Summary handed to [`MemoryHooks::after_task`].
#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub task_id: uuid::Uuid,
    pub question: String,
    pub result: RunResult,
}

/// Persistent memory integration around a task.
#[async_trait]
pub trait MemoryHooks: Send + Sync {
    /// Called before preflight; may seed the session context (e.g. recalled facts).
    async fn before_task(&self, session: &mut dyn Session, question: &str) -> anyhow::Result<()>;

    /// Called once the result is final.
    async fn after_task(&self, session: &mut dyn Session, meta: &TaskMeta) -> anyhow::Result<()>;
}

/// Read-only source of the agent's progress list.
#[async_trait]
pub trait TodoStore: Send + Sync {
    /// Current snapshot, or `None` when there is nothing yet.
    async fn snapshot(&self) -> anyhow::Result<Option<TodoSnapshot>>;
}

/// Todo store backed by a JSON file written by an external tool.
///
/// Accepts either `{"items": [...]}` or a bare array of items. A missing file
/// is an empty store, not an error.
#[derive(Debug, Clone)]
pub struct FileTodoStore {
    path: PathBuf,
}

impl FileTodoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TodoStore for FileTodoStore {
    async fn snapshot(&self) -> anyhow::Result<Option<TodoSnapshot>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        TodoSnapshot::from_json(&value)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("{} is not a todo list", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TodoStatus;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTodoStore::new(dir.path().join("todo.json"));
        assert!(store.snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.json");

        tokio::fs::write(&path, r#"{"items": [{"title": "a", "status": "done"}]}"#)
            .await
            .unwrap();
        let store = FileTodoStore::new(&path);
        let snapshot = store.snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.items[0].status, TodoStatus::Done);

        tokio::fs::write(&path, r#"[{"title": "b"}, {"title": "c", "status": "in_progress"}]"#)
            .await
            .unwrap();
        let snapshot = store.snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.open_count(), 2);
    }

    #[tokio::test]
    async fn test_garbage_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(FileTodoStore::new(&path).snapshot().await.is_err());
    }
}
