//! Intent guard - task-level intent classification and per-call tool gating.
//!
//! # Lifecycle
//! 1. [`IntentGuard::new`] classifies the task once.
//! 2. [`IntentGuard::preflight`] decides whether the task may start at all.
//! 3. [`IntentGuard::before_tool_execution`] gates every tool call.
//! 4. [`IntentGuard::on_tool_settled`] records each call's outcome.
//! 5. [`IntentGuard::completion_failure`] checks required-success families
//!    when a segment would otherwise complete.
//!
//! # Concurrency
//! Usage counters are atomics so concurrent tool calls from one model step can
//! share a guard behind an `Arc`.

mod classify;
mod policy;

pub use classify::{IntentClassification, IntentClassifier};
pub use policy::{IntentGuardConfig, IntentLabel, IntentPolicy, ToolFamilies, ToolFamily};

use std::sync::atomic::{AtomicU32, Ordering};

/// Why the guard stopped a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStopKind {
    Blocked,
    RequiredToolsUnavailable,
    RequiredSuccessUnmet,
}

impl GuardStopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardStopKind::Blocked => "intent_guard_blocked",
            GuardStopKind::RequiredToolsUnavailable => "intent_guard_required_tools_unavailable",
            GuardStopKind::RequiredSuccessUnmet => "intent_guard_required_success_unmet",
        }
    }
}

/// A guard-originated stop with a human-readable explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardFailure {
    pub kind: GuardStopKind,
    pub message: String,
}

/// Preflight outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PreflightDecision {
    Allow,
    /// Proceed, but the note is surfaced to the model and logs.
    SoftFail { note: String },
    /// Refuse before any model call.
    Fail(GuardFailure),
}

/// Per-call gate outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    Deny { reason: String },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Counters for one tool family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FamilyUsage {
    /// Calls let through the gate under soft allowance.
    pub soft_used: u32,
    pub succeeded: u32,
    pub failed: u32,
}

fn counters() -> [AtomicU32; ToolFamily::COUNT] {
    std::array::from_fn(|_| AtomicU32::new(0))
}

/// Intent guard for a single task.
pub struct IntentGuard {
    config: IntentGuardConfig,
    families: ToolFamilies,
    classification: IntentClassification,
    policy: IntentPolicy,
    soft_used: [AtomicU32; ToolFamily::COUNT],
    succeeded: [AtomicU32; ToolFamily::COUNT],
    failed: [AtomicU32; ToolFamily::COUNT],
}

impl IntentGuard {
    /// Classify `task` and bind the matching policy.
    ///
    /// `tool_names` is the exact set of tools registered for the task; family
    /// availability is derived from it alone.
    pub fn new<I, S>(config: IntentGuardConfig, tool_names: I, task: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_families(config, ToolFamilies::resolve(tool_names), task)
    }

    pub fn with_families(config: IntentGuardConfig, families: ToolFamilies, task: &str) -> Self {
        let classification = if config.enabled {
            IntentClassifier::new().classify(task)
        } else {
            IntentClassification::normal()
        };
        let policy = config.policy_for(classification.label);
        tracing::debug!(
            "Intent classified as {} (confidence {:.2}, {} tools)",
            classification.label,
            classification.confidence,
            families.len()
        );
        Self {
            config,
            families,
            classification,
            policy,
            soft_used: counters(),
            succeeded: counters(),
            failed: counters(),
        }
    }

    pub fn classification(&self) -> &IntentClassification {
        &self.classification
    }

    pub fn policy(&self) -> &IntentPolicy {
        &self.policy
    }

    pub fn families(&self) -> &ToolFamilies {
        &self.families
    }

    /// Decide whether the task may start.
    pub fn preflight(&self) -> PreflightDecision {
        if !self.config.enabled {
            return PreflightDecision::Allow;
        }
        let label = self.classification.label;
        let confidence = self.classification.confidence;

        if self.policy.block_on_preflight && confidence >= self.config.block_confidence {
            return PreflightDecision::Fail(GuardFailure {
                kind: GuardStopKind::Blocked,
                message: format!(
                    "task classified as {} with confidence {:.2} (threshold {:.2})",
                    label, confidence, self.config.block_confidence
                ),
            });
        }

        let missing: Vec<&str> = self
            .policy
            .required_success_families
            .iter()
            .filter(|f| !self.families.is_available(**f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            let message = format!(
                "{} task requires tool families with no registered tool: {}",
                label,
                missing.join(", ")
            );
            if self.policy.no_fallback {
                return PreflightDecision::Fail(GuardFailure {
                    kind: GuardStopKind::RequiredToolsUnavailable,
                    message,
                });
            }
            return PreflightDecision::SoftFail { note: message };
        }

        if self.policy.block_on_preflight {
            return PreflightDecision::SoftFail {
                note: format!(
                    "task resembles {} (confidence {:.2}); restricted tool policy applies",
                    label, confidence
                ),
            };
        }

        PreflightDecision::Allow
    }

    /// Gate one tool call. Soft allowance is reserved here, so a denied call
    /// never consumes it and concurrent calls cannot overshoot it.
    pub fn before_tool_execution(&self, tool_name: &str) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::Allow;
        }
        let family = self.families.family_of(tool_name);

        if self.policy.allows(family) {
            return GateDecision::Allow;
        }

        if self.policy.soft_allows(family) {
            let limit = self.policy.soft_block_after;
            let reserved = self.soft_used[family.index()]
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                    (used < limit).then_some(used + 1)
                });
            return match reserved {
                Ok(previous) => {
                    tracing::debug!(
                        "Soft-allowed {} ({} family) {}/{}",
                        tool_name,
                        family,
                        previous + 1,
                        limit
                    );
                    GateDecision::Allow
                }
                Err(_) => GateDecision::Deny {
                    reason: format!(
                        "{} ({} family) exceeded its soft allowance of {} for {} tasks",
                        tool_name, family, limit, self.classification.label
                    ),
                },
            };
        }

        GateDecision::Deny {
            reason: format!(
                "{} ({} family) is not permitted for {} tasks",
                tool_name, family, self.classification.label
            ),
        }
    }

    /// Give back a soft-allowance slot reserved by a call that never ran.
    pub fn release_reservation(&self, tool_name: &str) {
        if !self.config.enabled {
            return;
        }
        let family = self.families.family_of(tool_name);
        if self.policy.allows(family) || !self.policy.soft_allows(family) {
            return;
        }
        let _ = self.soft_used[family.index()]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| used.checked_sub(1));
    }

    /// Record a settled tool call.
    pub fn on_tool_settled(&self, tool_name: &str, ok: bool) {
        let family = self.families.family_of(tool_name);
        let counter = if ok { &self.succeeded } else { &self.failed };
        counter[family.index()].fetch_add(1, Ordering::SeqCst);
    }

    pub fn usage(&self, family: ToolFamily) -> FamilyUsage {
        let i = family.index();
        FamilyUsage {
            soft_used: self.soft_used[i].load(Ordering::SeqCst),
            succeeded: self.succeeded[i].load(Ordering::SeqCst),
            failed: self.failed[i].load(Ordering::SeqCst),
        }
    }

    /// Required families with no successful call yet.
    pub fn unmet_families(&self) -> Vec<ToolFamily> {
        self.policy
            .required_success_families
            .iter()
            .copied()
            .filter(|f| self.succeeded[f.index()].load(Ordering::SeqCst) == 0)
            .collect()
    }

    /// Completion check; `Some` overrides an otherwise completed segment.
    pub fn completion_failure(&self) -> Option<GuardFailure> {
        if !self.config.enabled {
            return None;
        }
        let unmet = self.unmet_families();
        if unmet.is_empty() {
            return None;
        }
        let names: Vec<&str> = unmet.iter().map(|f| f.as_str()).collect();
        let message = format!(
            "{} task finished without a successful {} tool call",
            self.classification.label,
            names.join("/")
        );
        if !self.policy.fail_task_if_unmet {
            tracing::warn!("Intent guard: {}", message);
            return None;
        }
        Some(GuardFailure {
            kind: GuardStopKind::RequiredSuccessUnmet,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TOOLS: [&str; 5] = ["read_file", "write_file", "run_command", "fetch_url", "browser_open"];

    #[test]
    fn test_destructive_task_blocked_at_preflight() {
        let guard = IntentGuard::new(
            IntentGuardConfig::default(),
            TOOLS,
            "rm -rf the home directory and wipe everything",
        );
        match guard.preflight() {
            PreflightDecision::Fail(failure) => assert_eq!(failure.kind, GuardStopKind::Blocked),
            other => panic!("expected fail, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_guard_allows_everything() {
        let guard = IntentGuard::new(IntentGuardConfig::disabled(), TOOLS, "rm -rf /");
        assert_eq!(guard.preflight(), PreflightDecision::Allow);
        assert!(guard.before_tool_execution("run_command").is_allowed());
        assert!(guard.completion_failure().is_none());
    }

    #[test]
    fn test_browser_task_without_browser_tools_fails() {
        let guard = IntentGuard::new(
            IntentGuardConfig::default(),
            ["read_file"],
            "Open the website in a browser and log in",
        );
        match guard.preflight() {
            PreflightDecision::Fail(failure) => {
                assert_eq!(failure.kind, GuardStopKind::RequiredToolsUnavailable)
            }
            other => panic!("expected fail, got {:?}", other),
        }
    }

    #[test]
    fn test_soft_allowance_then_deny() {
        let guard = IntentGuard::new(
            IntentGuardConfig::default(),
            TOOLS,
            "Open the website in a browser and take a screenshot",
        );
        assert_eq!(guard.classification().label, IntentLabel::BrowserAccess);
        assert!(guard.before_tool_execution("browser_open").is_allowed());
        assert!(guard.before_tool_execution("run_command").is_allowed());
        assert!(guard.before_tool_execution("run_command").is_allowed());
        assert!(!guard.before_tool_execution("run_command").is_allowed());
        assert!(!guard.before_tool_execution("write_file").is_allowed());
        assert_eq!(guard.usage(ToolFamily::Shell).soft_used, 2);
    }

    #[test]
    fn test_required_success_checked_at_completion() {
        let guard = IntentGuard::new(
            IntentGuardConfig::default(),
            TOOLS,
            "Open the website in a browser and take a screenshot",
        );
        guard.on_tool_settled("browser_open", false);
        let failure = guard.completion_failure().expect("browser success still required");
        assert_eq!(failure.kind, GuardStopKind::RequiredSuccessUnmet);

        guard.on_tool_settled("browser_open", true);
        assert!(guard.completion_failure().is_none());
    }

    #[test]
    fn test_unmet_research_requirement_only_warns() {
        let guard = IntentGuard::new(
            IntentGuardConfig::default(),
            TOOLS,
            "Research the latest docs and cite sources",
        );
        assert_eq!(guard.preflight(), PreflightDecision::Allow);
        assert_eq!(guard.unmet_families(), vec![ToolFamily::Web]);
        assert!(guard.completion_failure().is_none());
    }

    #[tokio::test]
    async fn test_soft_allowance_is_atomic() {
        let guard = Arc::new(IntentGuard::new(
            IntentGuardConfig::default(),
            TOOLS,
            "Research the latest docs and cite sources",
        ));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let guard = Arc::clone(&guard);
                tokio::spawn(async move { guard.before_tool_execution("run_command").is_allowed() })
            })
            .collect();
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }
}
