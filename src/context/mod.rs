//! Context budget orchestration.
//!
//! Before every segment the runner asks [`ContextBudgetOrchestrator::plan`]
//! whether the next request fits the model's context window, and under which
//! output-token cap and [`DegradeStage`].
//!
//! # Search order
//! Output candidates are tried in descending order; for each candidate the
//! degrade stages are tried from least to most severe. The first pair whose
//! estimate fits the input budget wins. Degrading further or lowering the
//! output candidate never increases the estimate, so the search always
//! terminates with either the least-degraded fitting plan or exhaustion.

mod compress;
mod estimate;

pub use compress::{compress_prompt, is_signal_line, trim_memory, CompressionLimits};
pub use estimate::{estimate_messages, estimate_text, tokens_for_chars, DEFAULT_CHARS_PER_TOKEN};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use crate::session::ContextSnapshot;

/// Increasingly aggressive strategies for fitting input into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeStage {
    None,
    MemoryTrim,
    MemoryTrimAndCompress,
}

impl DegradeStage {
    /// All stages, least severe first.
    pub const ALL: [DegradeStage; 3] = [
        DegradeStage::None,
        DegradeStage::MemoryTrim,
        DegradeStage::MemoryTrimAndCompress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DegradeStage::None => "none",
            DegradeStage::MemoryTrim => "memory_trim",
            DegradeStage::MemoryTrimAndCompress => "memory_trim_and_compress",
        }
    }
}

/// Tunables for context budgeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextBudgetPolicy {
    pub context_window_tokens: u64,
    /// Preferred output cap; the first candidate.
    pub requested_output_tokens: u64,
    /// Hard ceiling on reserved output tokens.
    pub max_output_tokens: u64,
    /// Fallback output caps tried after `requested_output_tokens`.
    pub output_step_downs: Vec<u64>,
    pub safety_margin_min_tokens: u64,
    pub safety_margin_ratio: f64,
    pub memory_items_per_tier: usize,
    pub compress_head_lines: usize,
    pub compress_tail_lines: usize,
    pub compress_max_signal_lines: usize,
    /// Floor for the compressed prompt's character budget.
    pub min_prompt_chars: usize,
    pub chars_per_token: f64,
}

impl Default for ContextBudgetPolicy {
    fn default() -> Self {
        Self {
            context_window_tokens: 128_000,
            requested_output_tokens: 8_192,
            max_output_tokens: 16_384,
            output_step_downs: vec![4_096, 2_048, 1_024],
            safety_margin_min_tokens: 1_024,
            safety_margin_ratio: 0.03,
            memory_items_per_tier: 6,
            compress_head_lines: 24,
            compress_tail_lines: 24,
            compress_max_signal_lines: 48,
            min_prompt_chars: 200,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextBudgetPolicy {
    /// `max(safety_margin_min_tokens, round(context_window_tokens * safety_margin_ratio))`
    pub fn safety_margin_tokens(&self) -> u64 {
        let ratio_tokens = (self.context_window_tokens as f64 * self.safety_margin_ratio).round();
        self.safety_margin_min_tokens.max(ratio_tokens.max(0.0) as u64)
    }

    /// Output-token candidates: the requested value, then smaller step-downs, descending.
    pub fn output_candidates(&self) -> Vec<u64> {
        let mut candidates = vec![self.requested_output_tokens];
        let mut step_downs: Vec<u64> = self
            .output_step_downs
            .iter()
            .copied()
            .filter(|&c| c > 0 && c < self.requested_output_tokens)
            .collect();
        step_downs.sort_unstable_by(|a, b| b.cmp(a));
        step_downs.dedup();
        candidates.extend(step_downs);
        candidates
    }

    /// Tokens reserved for output when asking for `output_tokens`.
    pub fn reserve_output_tokens(&self, output_tokens: u64) -> u64 {
        output_tokens.min(self.max_output_tokens)
    }

    /// `context_window - reserve_output - safety_margin`, saturating at zero.
    pub fn input_budget(&self, output_tokens: u64) -> u64 {
        self.context_window_tokens
            .saturating_sub(self.reserve_output_tokens(output_tokens))
            .saturating_sub(self.safety_margin_tokens())
    }

    fn compression_limits(&self) -> CompressionLimits {
        CompressionLimits {
            head_lines: self.compress_head_lines,
            tail_lines: self.compress_tail_lines,
            max_signal_lines: self.compress_max_signal_lines,
        }
    }
}

/// Observability snapshot of a context plan, merged into the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDiagnostics {
    pub segment_index: u32,
    pub estimated_input_tokens: u64,
    pub input_budget_tokens: u64,
    pub context_window_tokens: u64,
    pub output_tokens: u64,
    pub safety_margin_tokens: u64,
    pub degrade_stage: DegradeStage,
    pub prompt_compressed: bool,
    pub updated_at: DateTime<Utc>,
}

/// A fitting plan for one segment.
#[derive(Debug, Clone)]
pub struct ContextPlan {
    pub output_tokens: u64,
    pub stage: DegradeStage,
    /// Context to show the model (diagnostics stripped, possibly trimmed).
    pub projected_context: ContextSnapshot,
    /// Prompt text to send (possibly compressed).
    pub prompt: String,
    pub diagnostics: BudgetDiagnostics,
}

/// Nothing fits, even at the smallest output cap and the harshest stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextExhaustion {
    /// Smallest estimate seen during the search.
    pub estimated_input_tokens: u64,
    /// Largest input budget available (at the smallest output candidate).
    pub input_budget_tokens: u64,
}

#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Fits(ContextPlan),
    Exhausted(ContextExhaustion),
}

/// Render the context block injected into model input, or `None` when the
/// projected context is empty.
pub fn render_context_block(context: &ContextSnapshot) -> Option<String> {
    if context == &ContextSnapshot::default() {
        return None;
    }
    let json = serde_json::to_string(context).ok()?;
    Some(format!("## Session Context\n{}", json))
}

/// Plans input projection and output cap for each segment.
#[derive(Debug, Clone, Default)]
pub struct ContextBudgetOrchestrator {
    policy: ContextBudgetPolicy,
}

/// Precomputed stage variants for one planning call.
struct Variants {
    full: ContextSnapshot,
    trimmed: ContextSnapshot,
    full_tokens: u64,
    trimmed_tokens: u64,
    compressed_prompt: String,
}

impl ContextBudgetOrchestrator {
    pub fn new(policy: ContextBudgetPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ContextBudgetPolicy {
        &self.policy
    }

    fn context_tokens(&self, context: &ContextSnapshot) -> u64 {
        render_context_block(context)
            .map(|block| estimate_text(&block, self.policy.chars_per_token))
            .unwrap_or(0)
    }

    fn variants(&self, base_tokens: u64, context: &ContextSnapshot, prompt: &str) -> Variants {
        let mut full = context.clone();
        full.budget = None;
        let trimmed = trim_memory(&full, self.policy.memory_items_per_tier);
        let full_tokens = self.context_tokens(&full);
        let trimmed_tokens = self.context_tokens(&trimmed);

        // Target the tightest input budget so the compressed variant is the same
        // for every output candidate.
        let tightest = self
            .policy
            .output_candidates()
            .first()
            .map(|&c| self.policy.input_budget(c))
            .unwrap_or(0);
        let target_tokens = tightest
            .saturating_sub(base_tokens)
            .saturating_sub(trimmed_tokens);
        let char_budget = ((target_tokens as f64) * self.policy.chars_per_token).floor() as usize;
        let compressed_prompt = compress_prompt(
            prompt,
            char_budget.max(self.policy.min_prompt_chars),
            self.policy.compression_limits(),
        );

        Variants {
            full,
            trimmed,
            full_tokens,
            trimmed_tokens,
            compressed_prompt,
        }
    }

    /// Estimated input tokens for one `(stage)` choice over the same content.
    ///
    /// Exposed for callers that want to reason about the search; [`Self::plan`]
    /// uses the same arithmetic.
    pub fn estimate_stage(
        &self,
        base_messages: &[ChatMessage],
        context: &ContextSnapshot,
        prompt: &str,
        stage: DegradeStage,
    ) -> u64 {
        let base_tokens = estimate_messages(base_messages, self.policy.chars_per_token);
        let variants = self.variants(base_tokens, context, prompt);
        self.stage_estimate(base_tokens, &variants, prompt, stage)
    }

    fn stage_estimate(&self, base_tokens: u64, v: &Variants, prompt: &str, stage: DegradeStage) -> u64 {
        let cpt = self.policy.chars_per_token;
        match stage {
            DegradeStage::None => base_tokens + v.full_tokens + estimate_text(prompt, cpt),
            DegradeStage::MemoryTrim => base_tokens + v.trimmed_tokens + estimate_text(prompt, cpt),
            DegradeStage::MemoryTrimAndCompress => {
                base_tokens + v.trimmed_tokens + estimate_text(&v.compressed_prompt, cpt)
            }
        }
    }

    /// Plan segment `segment_index` given history, context and the next prompt.
    pub fn plan(
        &self,
        base_messages: &[ChatMessage],
        context: &ContextSnapshot,
        prompt: &str,
        segment_index: u32,
    ) -> PlanOutcome {
        let base_tokens = estimate_messages(base_messages, self.policy.chars_per_token);
        let variants = self.variants(base_tokens, context, prompt);
        let margin = self.policy.safety_margin_tokens();

        let mut smallest = u64::MAX;
        let mut largest_budget = 0;

        for output_tokens in self.policy.output_candidates() {
            let input_budget = self.policy.input_budget(output_tokens);
            largest_budget = largest_budget.max(input_budget);

            for stage in DegradeStage::ALL {
                let estimate = self.stage_estimate(base_tokens, &variants, prompt, stage);
                smallest = smallest.min(estimate);
                if estimate > input_budget {
                    continue;
                }

                let (projected_context, prompt_text) = match stage {
                    DegradeStage::None => (variants.full.clone(), prompt.to_string()),
                    DegradeStage::MemoryTrim => (variants.trimmed.clone(), prompt.to_string()),
                    DegradeStage::MemoryTrimAndCompress => {
                        (variants.trimmed.clone(), variants.compressed_prompt.clone())
                    }
                };
                let prompt_compressed = prompt_text != prompt;

                tracing::debug!(
                    "Context plan segment {}: stage={} output={} estimate={}/{}",
                    segment_index,
                    stage.as_str(),
                    output_tokens,
                    estimate,
                    input_budget
                );

                return PlanOutcome::Fits(ContextPlan {
                    output_tokens,
                    stage,
                    projected_context,
                    prompt: prompt_text,
                    diagnostics: BudgetDiagnostics {
                        segment_index,
                        estimated_input_tokens: estimate,
                        input_budget_tokens: input_budget,
                        context_window_tokens: self.policy.context_window_tokens,
                        output_tokens,
                        safety_margin_tokens: margin,
                        degrade_stage: stage,
                        prompt_compressed,
                        updated_at: Utc::now(),
                    },
                });
            }
        }

        tracing::info!(
            "Context budget exhausted for segment {}: smallest estimate {} > budget {}",
            segment_index,
            smallest,
            largest_budget
        );
        PlanOutcome::Exhausted(ContextExhaustion {
            estimated_input_tokens: smallest,
            input_budget_tokens: largest_budget,
        })
    }
}
