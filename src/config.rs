//! Configuration management for runway.
//!
//! Execution limits can be set via environment variables:
//! - `RUNWAY_MAX_STEPS_PER_RUN` - Optional. Model steps per segment. Defaults to `8`.
//! - `RUNWAY_MAX_STEPS_PER_TASK` - Optional. Model steps per task. Defaults to `64`.
//! - `RUNWAY_MAX_TOOL_CALLS` - Optional. Tool calls per task. Defaults to `48`.
//! - `RUNWAY_MAX_CONTINUATIONS` - Optional. Automatic continuation segments. Defaults to `4`.
//! - `RUNWAY_AUTO_CONTINUE` - Optional. Continue after a segment hits its step limit. Defaults to `true`.
//! - `RUNWAY_CONTEXT_WINDOW` - Optional. Model context window in tokens. Defaults to `128000`.
//! - `RUNWAY_MAX_OUTPUT_TOKENS` - Optional. Requested output tokens. Defaults to `8192`.
//!
//! The binary additionally reads:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `OPENROUTER_BASE_URL` - Optional. Chat completions endpoint override.
//! - `DEFAULT_MODEL` - Optional. Defaults to `anthropic/claude-sonnet-4.5`.

use serde::Deserialize;
use thiserror::Error;

use crate::context::ContextBudgetPolicy;
use crate::executor::DEFAULT_REASONING_TAG;
use crate::guard::IntentGuardConfig;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous task executor. Work through the user's task \
step by step, calling tools when they help. Your tool calls and model steps are budgeted; \
when the work is done, reply with a concise final answer and no further tool calls.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Limits and policies for one task runner. Immutable once the runner is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub max_model_steps_per_run: u32,
    pub max_model_steps_per_task: u32,
    pub max_tool_calls_per_task: u32,
    pub max_continuation_runs: u32,
    pub auto_continue_on_step_limit: bool,
    pub model: String,
    pub system_prompt: String,
    pub temperature: Option<f64>,
    /// Tag whose content is stripped from assistant text as reasoning.
    pub reasoning_tag: String,
    pub intent_guard: IntentGuardConfig,
    pub context_budget: ContextBudgetPolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_model_steps_per_run: 8,
            max_model_steps_per_task: 64,
            max_tool_calls_per_task: 48,
            max_continuation_runs: 4,
            auto_continue_on_step_limit: true,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: None,
            reasoning_tag: DEFAULT_REASONING_TAG.to_string(),
            intent_guard: IntentGuardConfig::default(),
            context_budget: ContextBudgetPolicy::default(),
        }
    }
}

/// Caller overrides; unset fields keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutionOverrides {
    pub max_model_steps_per_run: Option<u32>,
    pub max_model_steps_per_task: Option<u32>,
    pub max_tool_calls_per_task: Option<u32>,
    pub max_continuation_runs: Option<u32>,
    pub auto_continue_on_step_limit: Option<bool>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub reasoning_tag: Option<String>,
    pub context_window_tokens: Option<u64>,
    pub requested_output_tokens: Option<u64>,
    pub intent_guard: Option<IntentGuardConfig>,
    pub context_budget: Option<ContextBudgetPolicy>,
}

fn parse_var<T>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))
    })
    .transpose()
}

fn parse_bool(key: &str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    raw.map(|v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("expected a boolean, got {:?}", other),
        )),
    })
    .transpose()
}

impl ExecutionOverrides {
    /// Read `RUNWAY_*` overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup` (environment-shaped key/value source).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            max_model_steps_per_run: parse_var(
                "RUNWAY_MAX_STEPS_PER_RUN",
                get("RUNWAY_MAX_STEPS_PER_RUN"),
            )?,
            max_model_steps_per_task: parse_var(
                "RUNWAY_MAX_STEPS_PER_TASK",
                get("RUNWAY_MAX_STEPS_PER_TASK"),
            )?,
            max_tool_calls_per_task: parse_var("RUNWAY_MAX_TOOL_CALLS", get("RUNWAY_MAX_TOOL_CALLS"))?,
            max_continuation_runs: parse_var(
                "RUNWAY_MAX_CONTINUATIONS",
                get("RUNWAY_MAX_CONTINUATIONS"),
            )?,
            auto_continue_on_step_limit: parse_bool("RUNWAY_AUTO_CONTINUE", get("RUNWAY_AUTO_CONTINUE"))?,
            context_window_tokens: parse_var("RUNWAY_CONTEXT_WINDOW", get("RUNWAY_CONTEXT_WINDOW"))?,
            requested_output_tokens: parse_var(
                "RUNWAY_MAX_OUTPUT_TOKENS",
                get("RUNWAY_MAX_OUTPUT_TOKENS"),
            )?,
            ..Self::default()
        })
    }
}

impl ExecutionConfig {
    /// Defaults merged with `overrides`, then sanitised.
    pub fn with_overrides(overrides: ExecutionOverrides) -> Self {
        let mut config = Self::default();
        if let Some(v) = overrides.max_model_steps_per_run {
            config.max_model_steps_per_run = v;
        }
        if let Some(v) = overrides.max_model_steps_per_task {
            config.max_model_steps_per_task = v;
        }
        if let Some(v) = overrides.max_tool_calls_per_task {
            config.max_tool_calls_per_task = v;
        }
        if let Some(v) = overrides.max_continuation_runs {
            config.max_continuation_runs = v;
        }
        if let Some(v) = overrides.auto_continue_on_step_limit {
            config.auto_continue_on_step_limit = v;
        }
        if let Some(v) = overrides.model {
            config.model = v;
        }
        if let Some(v) = overrides.system_prompt {
            config.system_prompt = v;
        }
        if overrides.temperature.is_some() {
            config.temperature = overrides.temperature;
        }
        if let Some(v) = overrides.reasoning_tag {
            config.reasoning_tag = v;
        }
        if let Some(v) = overrides.intent_guard {
            config.intent_guard = v;
        }
        if let Some(v) = overrides.context_budget {
            config.context_budget = v;
        }
        if let Some(v) = overrides.context_window_tokens {
            config.context_budget.context_window_tokens = v;
        }
        if let Some(v) = overrides.requested_output_tokens {
            config.context_budget.requested_output_tokens = v;
        }
        config.sanitized()
    }

    /// Ceilings are at least 1 and the per-run step cap never exceeds the per-task one.
    pub fn sanitized(mut self) -> Self {
        self.max_model_steps_per_task = self.max_model_steps_per_task.max(1);
        self.max_model_steps_per_run = self
            .max_model_steps_per_run
            .clamp(1, self.max_model_steps_per_task);
        self.max_tool_calls_per_task = self.max_tool_calls_per_task.max(1);
        if self.reasoning_tag.trim().is_empty() {
            self.reasoning_tag = DEFAULT_REASONING_TAG.to_string();
        }
        self
    }
}

/// Process configuration for the `runway` binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    /// Chat completions endpoint override
    pub base_url: Option<String>,

    pub execution: ExecutionConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// and `ConfigError::InvalidValue` for unparsable `RUNWAY_*` values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let base_url = std::env::var("OPENROUTER_BASE_URL").ok();

        let mut overrides = ExecutionOverrides::from_env()?;
        overrides.model = std::env::var("DEFAULT_MODEL").ok();

        Ok(Self {
            api_key,
            base_url,
            execution: ExecutionConfig::with_overrides(overrides),
        })
    }
}
