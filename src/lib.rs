//! # runway
//!
//! Budgeted, segmented task execution for tool-using language-model agents.
//!
//! A [`TaskRunner`] drives one user request through one or more bounded model
//! invocations ("segments") while enforcing a tool-call budget, model-step
//! ceilings, a context-window budget and an intent policy, and returns a
//! single classified [`RunResult`].
//!
//! ## Architecture
//!
//! ```text
//!   TaskRunner ──(per segment)──▶ ContextBudgetOrchestrator
//!       │
//!       ▼
//!   ModelExecutor ──(per tool call)──▶ ToolGate ──▶ IntentGuard + ToolBudget
//!       │
//!       ▼
//!   LlmClient (OpenRouter)
//! ```
//!
//! ## Modules
//! - `runner`: segmentation state machine and run results
//! - `context`: context budget planning, token estimation, degradation
//! - `executor`: one segment of model steps and tool calls
//! - `guard`: intent classification and per-call gating
//! - `budget`: tool-call budget
//! - `tools`: tool trait, registry and result envelope
//! - `session`: caller-owned conversation state
//! - `messages`: output message stream
//! - `llm`: chat-completion client abstraction
//! - `config`: execution limits and process configuration

pub mod budget;
pub mod config;
pub mod context;
pub mod executor;
pub mod guard;
pub mod llm;
pub mod messages;
pub mod runner;
pub mod session;
pub mod tools;

pub use config::{Config, ExecutionConfig, ExecutionOverrides};
pub use messages::{MessageSink, OutputMessage};
pub use runner::{RunResult, RunTaskError, RunnerError, StopReason, TaskRunner, TaskStopError};
pub use session::{InMemorySession, Session};
