//! Tool-call budget for a single task.
//!
//! # Invariants
//! - `used <= limit` (enforced at all times)
//! - `used` never decreases

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Per-task ceiling on tool calls.
///
/// Consumption is a single compare-and-increment on an atomic counter, so tool
/// calls dispatched concurrently within one model step cannot overshoot `limit`.
#[derive(Debug)]
pub struct ToolBudget {
    limit: u32,
    used: AtomicU32,
}

/// Result of a consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConsumption {
    pub ok: bool,
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
}

impl ToolBudget {
    /// # Postconditions
    /// - `budget.limit() == limit`
    /// - `budget.used() == 0`
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Reserve one call for `tool_name`.
    ///
    /// # Postcondition
    /// `used` increases by one iff `ok`; a failed attempt leaves the counter untouched.
    pub fn try_consume(&self, tool_name: &str) -> BudgetConsumption {
        let limit = self.limit;
        let result = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < limit).then_some(used + 1)
            });

        let consumption = match result {
            Ok(previous) => BudgetConsumption {
                ok: true,
                used: previous + 1,
                remaining: limit - (previous + 1),
                limit,
            },
            Err(current) => BudgetConsumption {
                ok: false,
                used: current,
                remaining: limit.saturating_sub(current),
                limit,
            },
        };

        if consumption.ok {
            tracing::debug!(
                "Tool budget: {} consumed ({}/{})",
                tool_name,
                consumption.used,
                limit
            );
        } else {
            tracing::info!(
                "Tool budget exhausted: {} denied ({}/{})",
                tool_name,
                consumption.used,
                limit
            );
        }
        consumption
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_consume_until_limit() {
        let budget = ToolBudget::new(3);

        for expected in 1..=3 {
            let c = budget.try_consume("read_file");
            assert!(c.ok);
            assert_eq!(c.used, expected);
            assert_eq!(c.remaining, 3 - expected);
        }

        let denied = budget.try_consume("read_file");
        assert!(!denied.ok);
        assert_eq!(denied.used, 3);
        assert_eq!(denied.remaining, 0);
        // Denied attempts never move the counter
        assert_eq!(budget.used(), 3);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_zero_limit_denies_immediately() {
        let budget = ToolBudget::new(0);
        assert!(!budget.try_consume("run_command").ok);
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_consumption_never_overshoots() {
        let budget = Arc::new(ToolBudget::new(10));
        let mut handles = Vec::new();
        for i in 0..50 {
            let budget = Arc::clone(&budget);
            handles.push(tokio::spawn(async move {
                budget.try_consume(&format!("tool_{}", i)).ok
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(budget.used(), 10);
    }
}
