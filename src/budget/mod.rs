//! Budget module - per-task resource ceilings.
//!
//! # Key Concepts
//! - ToolBudget: atomic tool-call counter with a fixed limit, fresh per task
//!
//! Model-step and continuation ceilings are plain counters owned by the task
//! runner; context/token budgeting lives in [`crate::context`].

mod tool_budget;

pub use tool_budget::{BudgetConsumption, ToolBudget};
