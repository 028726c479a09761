//! Task runner - drives one user request through one or more segments.
//!
//! # State machine
//! `Idle -> Running(1) -> {Completed, Stopped(reason), Running(n + 1)}`.
//!
//! Per segment:
//! 1. Build the prompt (the question, or a continuation prompt).
//! 2. Plan the context budget; exhaustion stops the run before any model call.
//! 3. Run the segment through the [`ModelExecutor`] with a step cap of
//!    `min(max_model_steps_per_run, remaining task steps)`.
//! 4. Apply the segment to the session (turns, tool patches, diagnostics).
//! 5. Classify the outcome ([`classify_segment`]).
//!
//! # Invariants
//! - `total_model_steps <= max_model_steps_per_task`
//! - `total_tool_calls <= max_tool_calls_per_task`
//! - At most one run is in flight per runner
//! - An aborted segment leaves no trace in the session

mod hooks;
mod outcome;
mod prompt;
mod result;

pub use hooks::{FileTodoStore, MemoryHooks, TaskMeta, TodoStore};
pub use outcome::{
    classify_segment, finish_reason_indicates_limit, hit_step_ceiling, SegmentDecision,
    SegmentObservation,
};
pub use prompt::{continuation_prompt, ContinuationState};
pub use result::{RunResult, RunTaskError, RunnerError, StopReason, TaskStopError};

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::budget::ToolBudget;
use crate::config::ExecutionConfig;
use crate::context::{render_context_block, ContextBudgetOrchestrator, PlanOutcome};
use crate::executor::{ModelExecutor, SegmentOutput, SegmentRequest, SegmentResult, SegmentSignal};
use crate::guard::{IntentGuard, PreflightDecision};
use crate::llm::{ChatMessage, LlmClient};
use crate::messages::{emit, MessageSink, NullSink, OutputMessage};
use crate::session::{ContextPatch, ContinuationTurn, Session};
use crate::tools::{ToolContext, ToolGate, ToolRegistry, ToolRegistryFactory};
use result::{stop_notice, NoticeLimits};

/// Clears the active-run slot when a run ends, however it ends.
struct RunSlot<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        let mut active = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *active = None;
    }
}

/// Aggregates carried across segments.
#[derive(Debug, Default)]
struct RunState {
    total_model_steps: u32,
    continuation_runs: u32,
    segment_count: u32,
    last_step_count: u32,
    final_text: String,
    final_finish_reason: Option<String>,
}

/// Why the segment loop ended.
struct Stop {
    reason: StopReason,
    detail: Option<String>,
}

impl Stop {
    fn new(reason: StopReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    fn with_detail(reason: StopReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}

/// Budgeted, segmented task execution over a caller-owned [`Session`].
pub struct TaskRunner {
    config: ExecutionConfig,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistryFactory,
    sink: Arc<dyn MessageSink>,
    memory_hooks: Option<Arc<dyn MemoryHooks>>,
    todo_store: Option<Arc<dyn TodoStore>>,
    orchestrator: ContextBudgetOrchestrator,
    active: Mutex<Option<CancellationToken>>,
}

impl TaskRunner {
    /// Runner with no tools and a discarding output sink.
    pub fn new(llm: Arc<dyn LlmClient>, config: ExecutionConfig) -> Self {
        let config = config.sanitized();
        let orchestrator = ContextBudgetOrchestrator::new(config.context_budget.clone());
        Self {
            config,
            llm,
            tools: Arc::new(|_: &ToolContext| ToolRegistry::empty()),
            sink: Arc::new(NullSink),
            memory_hooks: None,
            todo_store: None,
            orchestrator,
            active: Mutex::new(None),
        }
    }

    pub fn with_tools(mut self, factory: ToolRegistryFactory) -> Self {
        self.tools = factory;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_memory_hooks(mut self, hooks: Arc<dyn MemoryHooks>) -> Self {
        self.memory_hooks = Some(hooks);
        self
    }

    pub fn with_todo_store(mut self, store: Arc<dyn TodoStore>) -> Self {
        self.todo_store = Some(store);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Cancel the in-flight run. Returns `false` when nothing is running.
    pub fn abort_current_run(&self, reason: Option<&str>) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(token) => {
                tracing::info!("Aborting current run: {}", reason.unwrap_or("no reason given"));
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a task and return its text; non-completion becomes [`TaskStopError`].
    pub async fn run_task(
        &self,
        session: &mut dyn Session,
        question: &str,
    ) -> Result<String, RunTaskError> {
        let result = self.run_task_detailed(session, question).await?;
        if result.completed {
            Ok(result.text)
        } else {
            Err(TaskStopError::from(result).into())
        }
    }

    /// Run a task to a classified result.
    ///
    /// Budget and policy stops are `Ok` with `completed = false`; `Err` means a
    /// provider fault or a concurrent run.
    pub async fn run_task_detailed(
        &self,
        session: &mut dyn Session,
        question: &str,
    ) -> Result<RunResult, RunnerError> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.is_some() {
                return Err(RunnerError::RunInProgress);
            }
            *active = Some(cancel.clone());
        }
        let _slot = RunSlot { slot: &self.active };

        match self.execute(session, question, &cancel).await {
            Ok(result) => {
                emit(
                    self.sink.as_ref(),
                    OutputMessage::TaskFinish {
                        result: result.clone(),
                    },
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!("Run failed: {}", e);
                emit(
                    self.sink.as_ref(),
                    OutputMessage::TaskError {
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        session: &mut dyn Session,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunnerError> {
        let task_id = uuid::Uuid::new_v4();
        tracing::info!("Starting task {}: {}", task_id, question);

        let registry = (self.tools)(&ToolContext {
            task_id,
            question: question.to_string(),
            cancel: cancel.clone(),
        });
        let guard = Arc::new(IntentGuard::new(
            self.config.intent_guard.clone(),
            registry.tool_names(),
            question,
        ));
        let budget = Arc::new(ToolBudget::new(self.config.max_tool_calls_per_task));
        let gate = ToolGate::new(registry, Arc::clone(&budget), Arc::clone(&guard));

        if let Some(hooks) = &self.memory_hooks {
            if let Err(e) = hooks.before_task(session, question).await {
                tracing::warn!("Memory hook before_task failed: {:#}", e);
            }
        }

        let mut system_prompt = self.config.system_prompt.clone();
        let mut state = RunState::default();

        let stop = match guard.preflight() {
            PreflightDecision::Fail(failure) => {
                tracing::info!("Intent guard refused task {}: {}", task_id, failure.message);
                Stop::with_detail(failure.kind.into(), failure.message)
            }
            decision => {
                if let PreflightDecision::SoftFail { note } = decision {
                    tracing::warn!("Intent guard note for task {}: {}", task_id, note);
                    system_prompt.push_str("\n\nIntent guard note: ");
                    system_prompt.push_str(&note);
                }
                self.run_segments(session, question, &system_prompt, &gate, cancel, &mut state)
                    .await?
            }
        };

        let completed = stop.reason == StopReason::Completed;
        let text = if completed {
            state.final_text.clone()
        } else {
            let notice = stop_notice(
                stop.reason,
                stop.detail.as_deref(),
                state.total_model_steps,
                budget.used(),
                state.segment_count,
                NoticeLimits {
                    max_model_steps: self.config.max_model_steps_per_task,
                    max_tool_calls: self.config.max_tool_calls_per_task,
                },
            );
            if state.final_text.is_empty() {
                notice
            } else {
                format!("{}\n\n{}", state.final_text, notice)
            }
        };

        let result = RunResult {
            text,
            finish_reason: state.final_finish_reason.clone(),
            step_count: state.last_step_count,
            total_model_steps: state.total_model_steps,
            total_tool_calls: budget.used(),
            segment_count: state.segment_count,
            completed,
            stop_reason: stop.reason,
            stop_detail: stop.detail,
        };
        tracing::info!(
            "Task {} finished: {} (segments {}, model steps {}, tool calls {})",
            task_id,
            result.stop_reason,
            result.segment_count,
            result.total_model_steps,
            result.total_tool_calls
        );

        if let Some(hooks) = &self.memory_hooks {
            let meta = TaskMeta {
                task_id,
                question: question.to_string(),
                result: result.clone(),
            };
            if let Err(e) = hooks.after_task(session, &meta).await {
                tracing::warn!("Memory hook after_task failed: {:#}", e);
            }
        }

        Ok(result)
    }

    async fn run_segments(
        &self,
        session: &mut dyn Session,
        question: &str,
        system_prompt: &str,
        gate: &ToolGate,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<Stop, RunnerError> {
        let executor = ModelExecutor::new(Arc::clone(&self.llm), Arc::clone(&self.sink))
            .with_reasoning_tag(self.config.reasoning_tag.clone());
        let config = &self.config;

        for segment_index in 1u32.. {
            if cancel.is_cancelled() {
                return Ok(Stop::new(StopReason::Aborted));
            }

            let remaining_steps = config
                .max_model_steps_per_task
                .saturating_sub(state.total_model_steps);
            let step_cap = config.max_model_steps_per_run.min(remaining_steps);
            if step_cap == 0 {
                return Ok(Stop::new(StopReason::ModelStepBudgetExhausted));
            }

            let prompt = if segment_index == 1 {
                question.to_string()
            } else {
                continuation_prompt(&ContinuationState {
                    segment_index,
                    remaining_tool_calls: gate.budget().remaining(),
                    remaining_model_steps: remaining_steps,
                    continuations_used: state.continuation_runs,
                    continuation_limit: config.max_continuation_runs,
                })
            };

            let mut base = Vec::with_capacity(session.messages().len() + 1);
            base.push(ChatMessage::system(system_prompt));
            base.extend_from_slice(session.messages());

            let plan = match self
                .orchestrator
                .plan(&base, session.context(), &prompt, segment_index)
            {
                PlanOutcome::Fits(plan) => plan,
                PlanOutcome::Exhausted(exhaustion) => {
                    return Ok(Stop::with_detail(
                        StopReason::ContextBudgetExhausted,
                        format!(
                            "estimated {} input tokens, budget {}",
                            exhaustion.estimated_input_tokens, exhaustion.input_budget_tokens
                        ),
                    ));
                }
            };

            tracing::info!(
                "Segment {} starting (step cap {}, output {} tokens, stage {})",
                segment_index,
                step_cap,
                plan.output_tokens,
                plan.stage.as_str()
            );

            // base[0] is the system prompt; the model sees it with the context block
            let mut input = base;
            if let Some(block) = render_context_block(&plan.projected_context) {
                input[0] = ChatMessage::system(format!("{}\n\n{}", system_prompt, block));
            }
            input.push(ChatMessage::user(plan.prompt.clone()));

            let result = executor
                .run_segment(
                    SegmentRequest {
                        segment_index,
                        model: config.model.clone(),
                        messages: input,
                        max_steps: step_cap,
                        max_output_tokens: Some(plan.output_tokens),
                        temperature: config.temperature,
                    },
                    gate,
                    cancel,
                )
                .await
                .map_err(RunnerError::Provider)?;

            let (output, signal) = match result {
                SegmentResult::Cancelled => {
                    tracing::info!("Segment {} aborted; discarding its output", segment_index);
                    return Ok(Stop::new(StopReason::Aborted));
                }
                SegmentResult::Finished(output) => (output, None),
                SegmentResult::Stopped { signal, partial } => (partial, Some(signal)),
            };

            if segment_index == 1 {
                session.prepare_user_turn(&plan.prompt);
            } else {
                session.prepare_continuation_turn(&plan.prompt, ContinuationTurn { advance_round: true });
            }
            session.update_budget_diagnostics(plan.diagnostics);
            let hit_step_limit = output.hit_step_limit;
            self.apply_segment(session, output, state).await;

            if let Some(signal) = signal {
                return Ok(match signal {
                    SegmentSignal::ToolBudgetExceeded { tool_name, consumption } => Stop::with_detail(
                        StopReason::ToolBudgetExhausted,
                        format!("{} denied after {}/{} calls", tool_name, consumption.used, consumption.limit),
                    ),
                    SegmentSignal::ToolPolicyBlocked { tool_name, reason } => {
                        Stop::with_detail(StopReason::ToolPolicyBlocked, format!("{}: {}", tool_name, reason))
                    }
                });
            }

            let observation = SegmentObservation {
                finish_reason: state.final_finish_reason.as_deref(),
                segment_step_count: state.last_step_count,
                segment_step_cap: step_cap,
                total_model_steps: state.total_model_steps,
                continuation_runs: state.continuation_runs,
                provider_hit_step_limit: hit_step_limit,
            };
            match classify_segment(&observation, config) {
                SegmentDecision::Complete => {
                    if let Some(failure) = gate.guard().completion_failure() {
                        return Ok(Stop::with_detail(failure.kind.into(), failure.message));
                    }
                    return Ok(Stop::new(StopReason::Completed));
                }
                SegmentDecision::Continue => {
                    state.continuation_runs += 1;
                    tracing::info!(
                        "Segment {} hit its step limit; continuing ({}/{})",
                        segment_index,
                        state.continuation_runs,
                        config.max_continuation_runs
                    );
                }
                SegmentDecision::Stop(reason) => {
                    tracing::info!("Segment {} stopped the run: {}", segment_index, reason);
                    return Ok(Stop::new(reason));
                }
            }
        }

        Ok(Stop::new(StopReason::ContinuationLimitReached))
    }

    /// Fold a settled segment into the session and run state.
    async fn apply_segment(&self, session: &mut dyn Session, output: SegmentOutput, state: &mut RunState) {
        state.segment_count += 1;
        if let Some(reasoning) = &output.reasoning {
            tracing::debug!("Segment {} reasoning: {}", state.segment_count, reasoning);
        }
        state.total_model_steps += output.step_count;
        state.last_step_count = output.step_count;
        state.final_finish_reason = output.finish_reason;
        if !output.text.is_empty() {
            state.final_text = output.text;
        }

        session.append_messages(output.messages);

        let any_settled = !output.settled.is_empty();
        for call in output.settled {
            if let Some(patch) = call.output.context_patch {
                session.merge_context_patch(patch);
            }
            if let Some(todo) = call.output.todo {
                session.merge_context_patch(ContextPatch::default().with_todo(todo));
            }
        }

        if !any_settled {
            return;
        }
        if let Some(store) = &self.todo_store {
            match store.snapshot().await {
                Ok(Some(todo)) => session.merge_context_patch(ContextPatch::default().with_todo(todo)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Todo store read failed: {:#}", e),
            }
        }
    }
}
