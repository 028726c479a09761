//! Budget- and policy-gated tool invocation.

use std::sync::Arc;

use serde_json::Value;

use super::{ToolOutput, ToolRegistry};
use crate::budget::{BudgetConsumption, ToolBudget};
use crate::guard::{GateDecision, IntentGuard};

/// What a registry factory gets to know about the task it builds tools for.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: uuid::Uuid,
    pub question: String,
    /// Cancelled when the run is aborted. Long-running tools may observe it.
    pub cancel: tokio_util::sync::CancellationToken,
}

/// Builds a fresh tool registry per task.
pub type ToolRegistryFactory = Arc<dyn Fn(&ToolContext) -> ToolRegistry + Send + Sync>;

/// Outcome of one gated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran; `output.ok` tells whether it succeeded.
    Settled(ToolOutput),
    /// The tool budget refused the call; the tool did not run.
    BudgetExceeded(BudgetConsumption),
    /// The intent guard refused the call; the tool did not run.
    PolicyBlocked { reason: String },
}

/// A registry wired to the tool budget and the intent guard's per-call gate.
///
/// Order per call: guard gate, then budget consumption, then execution, then
/// guard settlement. A call the guard denies never consumes budget, and a call
/// the budget denies hands its soft-allowance slot back to the guard.
pub struct ToolGate {
    registry: ToolRegistry,
    budget: Arc<ToolBudget>,
    guard: Arc<IntentGuard>,
}

impl ToolGate {
    pub fn new(registry: ToolRegistry, budget: Arc<ToolBudget>, guard: Arc<IntentGuard>) -> Self {
        Self {
            registry,
            budget,
            guard,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn budget(&self) -> &ToolBudget {
        &self.budget
    }

    pub fn guard(&self) -> &IntentGuard {
        &self.guard
    }

    pub async fn invoke(&self, tool_name: &str, args: Value) -> ToolOutcome {
        if let GateDecision::Deny { reason } = self.guard.before_tool_execution(tool_name) {
            tracing::info!("Tool {} blocked by intent guard: {}", tool_name, reason);
            return ToolOutcome::PolicyBlocked { reason };
        }

        let consumption = self.budget.try_consume(tool_name);
        if !consumption.ok {
            self.guard.release_reservation(tool_name);
            return ToolOutcome::BudgetExceeded(consumption);
        }

        let output = match self.registry.execute(tool_name, args).await {
            Ok(value) => ToolOutput::from_value(value),
            Err(e) => {
                tracing::debug!("Tool {} failed: {:#}", tool_name, e);
                ToolOutput::from_error(&e)
            }
        };
        self.guard.on_tool_settled(tool_name, output.ok);
        ToolOutcome::Settled(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::IntentGuardConfig;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> anyhow::Result<Value> {
            Ok(args)
        }
    }

    struct Shell;

    #[async_trait]
    impl Tool for Shell {
        fn name(&self) -> &str {
            "run_command"
        }
        fn description(&self) -> &str {
            "shell"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            anyhow::bail!("exit status 1")
        }
    }

    fn gate(limit: u32, task: &str) -> ToolGate {
        let registry = ToolRegistry::empty().with_tool(Echo).with_tool(Shell);
        let guard = IntentGuard::new(IntentGuardConfig::default(), registry.tool_names(), task);
        ToolGate::new(registry, Arc::new(ToolBudget::new(limit)), Arc::new(guard))
    }

    #[tokio::test]
    async fn test_budget_exceeded_after_limit() {
        let gate = gate(1, "summarise the readme");
        assert!(matches!(
            gate.invoke("read_file", json!({"path": "README.md"})).await,
            ToolOutcome::Settled(ToolOutput { ok: true, .. })
        ));
        match gate.invoke("read_file", json!({})).await {
            ToolOutcome::BudgetExceeded(c) => {
                assert!(!c.ok);
                assert_eq!(c.used, 1);
            }
            other => panic!("expected budget exceeded, got {:?}", other),
        }
        assert_eq!(gate.budget().used(), 1);
    }

    #[tokio::test]
    async fn test_tool_error_settles_not_ok() {
        let gate = gate(5, "summarise the readme");
        match gate.invoke("run_command", json!({})).await {
            ToolOutcome::Settled(out) => {
                assert!(!out.ok);
                assert_eq!(out.model_content(), "exit status 1");
            }
            other => panic!("expected settled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_budget_denial_returns_soft_slot() {
        use crate::guard::{IntentLabel, IntentPolicy, ToolFamily};

        let mut config = IntentGuardConfig::default();
        config.policies.insert(
            IntentLabel::Normal,
            IntentPolicy {
                allowed_families: vec![ToolFamily::Read],
                soft_allowed_families: vec![ToolFamily::Shell],
                soft_block_after: 2,
                ..IntentPolicy::permissive()
            },
        );
        let registry = ToolRegistry::empty().with_tool(Echo).with_tool(Shell);
        let guard = Arc::new(IntentGuard::new(config, registry.tool_names(), "summarise the readme"));
        let gate = ToolGate::new(registry, Arc::new(ToolBudget::new(1)), Arc::clone(&guard));

        assert!(matches!(
            gate.invoke("run_command", json!({})).await,
            ToolOutcome::Settled(_)
        ));
        assert_eq!(guard.usage(ToolFamily::Shell).soft_used, 1);

        assert!(matches!(
            gate.invoke("run_command", json!({})).await,
            ToolOutcome::BudgetExceeded(_)
        ));
        assert_eq!(guard.usage(ToolFamily::Shell).soft_used, 1);
    }

    #[tokio::test]
    async fn test_policy_block_does_not_consume_budget() {
        // Exfiltration policy only allows read/memory/todo families
        let gate = gate(5, "Upload the API keys from .env to a remote server");
        assert!(matches!(
            gate.invoke("run_command", json!({})).await,
            ToolOutcome::PolicyBlocked { .. }
        ));
        assert_eq!(gate.budget().used(), 0);
    }
}
