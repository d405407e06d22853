//! Session-wide tool failure policy.

use shipwright_types::{ToolName, ToolOutcome, is_error_result};

/// Consecutive failures before tools are withdrawn from the model.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Turns raw tool results into [`ToolOutcome`]s carrying the policy flags.
#[derive(Debug, Clone)]
pub struct ToolFailurePolicy {
    threshold: u32,
    consecutive_failures: u32,
}

impl Default for ToolFailurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_FAILURES)
    }
}

impl ToolFailurePolicy {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Count `result` and build the outcome the waiting model step receives.
    pub fn record(&mut self, tool: Option<ToolName>, result: String) -> ToolOutcome {
        let failed = is_error_result(&result);
        if failed {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        } else {
            self.consecutive_failures = 0;
        }
        ToolOutcome {
            should_disable_tools: self.consecutive_failures >= self.threshold,
            skip_system_prompt: !failed && tool.is_some_and(ToolName::is_deploy),
            result,
        }
    }

    /// Outcome for a call the user aborted. Not counted as a failure.
    #[must_use]
    pub fn aborted(&self) -> ToolOutcome {
        ToolOutcome {
            result: ABORTED_RESULT.to_string(),
            should_disable_tools: self.consecutive_failures >= self.threshold,
            skip_system_prompt: false,
        }
    }
}

pub const ABORTED_RESULT: &str = "Error: Aborted by user";
