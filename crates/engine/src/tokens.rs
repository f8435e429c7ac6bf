//! Per-invocation token budget tracking, as its own lock-protected type
//! rather than fields threaded through every strategy loop.

use std::sync::Mutex;

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::llm::types::TokenUsage;

/// Tracks cumulative token usage against an optional budget.
///
/// `budget == 0` means unlimited, matching the invocation-level
/// `TokenBudget` field's own zero-sentinel semantics.
pub struct TokenTracker {
    budget: u64,
    used: Mutex<TokenUsage>,
}

impl TokenTracker {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: Mutex::new(TokenUsage::default()),
        }
    }

    /// Add a call's usage to the running total.
    pub fn add(&self, usage: &TokenUsage) {
        self.used.lock().expect("token tracker mutex poisoned").add(usage);
    }

    /// Fail if adding `additional` tokens would exceed the budget.
    /// Always succeeds when the budget is unlimited.
    pub fn check_budget(&self, additional: u64) -> Result<()> {
        if self.budget == 0 {
            return Ok(());
        }
        let used = self.used.lock().expect("token tracker mutex poisoned").total();
        if used + additional > self.budget {
            warn!(used, additional, budget = self.budget, "token budget exceeded");
            return Err(EngineError::Internal(format!(
                "token budget exceeded: used {used} + requested {additional} > budget {}",
                self.budget
            )));
        }
        Ok(())
    }

    /// Tokens remaining, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        if self.budget == 0 {
            return None;
        }
        let used = self.used.lock().expect("token tracker mutex poisoned").total();
        Some(self.budget.saturating_sub(used))
    }

    pub fn usage(&self) -> TokenUsage {
        *self.used.lock().expect("token tracker mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_never_rejects() {
        let tracker = TokenTracker::new(0);
        tracker.add(&TokenUsage {
            input: 1_000_000,
            output: 0,
            cache_read: 0,
            cache_write: 0,
        });
        assert!(tracker.check_budget(1_000_000).is_ok());
        assert_eq!(tracker.remaining(), None);
    }

    #[test]
    fn budget_exceeded_rejects() {
        let tracker = TokenTracker::new(100);
        tracker.add(&TokenUsage {
            input: 60,
            output: 30,
            cache_read: 0,
            cache_write: 0,
        });
        assert!(tracker.check_budget(5).is_ok());
        assert!(tracker.check_budget(20).is_err());
    }

    #[test]
    fn remaining_is_clamped_at_zero() {
        let tracker = TokenTracker::new(10);
        tracker.add(&TokenUsage {
            input: 8,
            output: 8,
            cache_read: 0,
            cache_write: 0,
        });
        assert_eq!(tracker.remaining(), Some(0));
    }

    #[test]
    fn usage_is_monotonically_non_decreasing() {
        let tracker = TokenTracker::new(0);
        let mut prior_total = 0;
        for _ in 0..5 {
            tracker.add(&TokenUsage {
                input: 3,
                output: 2,
                cache_read: 0,
                cache_write: 0,
            });
            let total = tracker.usage().total();
            assert!(total >= prior_total);
            prior_total = total;
        }
    }
}
