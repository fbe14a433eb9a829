//! Budget evaluation.
//!
//! A limit of zero means unlimited; a limit is violated when usage is
//! strictly greater. Retries are not evaluated here: `max_retries` caps the
//! attempts of each individual step inside the runner.

use jobward_core::Budgets;
use jobward_events::BudgetUsage;

/// Reason codes attached to checkpoints and terminal events.
pub mod reason {
    pub const BUDGET_EXCEEDED: &str = "E_BUDGET_EXCEEDED";
    pub const ADAPTER_FAIL: &str = "E_ADAPTER_FAIL";
    pub const APPROVAL_REQUIRED: &str = "E_CHECKPOINT_APPROVAL_REQUIRED";
    pub const ENV_FINGERPRINT_MISMATCH: &str = "E_ENV_FINGERPRINT_MISMATCH";
    pub const JOB_CANCELLED: &str = "E_JOB_CANCELLED";
}

/// Describe every exceeded limit as `<usage>><limit>`.
pub fn violations(limits: &Budgets, usage: &BudgetUsage) -> Vec<String> {
    let checks = [
        ("wall_time_seconds", limits.max_wall_time_seconds, usage.wall_time_seconds),
        ("step_count", limits.max_step_count, usage.steps),
        ("tool_call_count", limits.max_tool_calls, usage.tool_calls),
    ];
    checks
        .into_iter()
        .filter(|(_, limit, used)| *limit > 0 && used > limit)
        .map(|(name, limit, _)| format!("{name}>{limit}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_unlimited() {
        let limits = Budgets {
            max_wall_time_seconds: 0,
            max_retries: 0,
            max_step_count: 0,
            max_tool_calls: 0,
        };
        let usage = BudgetUsage {
            wall_time_seconds: 1_000_000,
            retries: 50,
            steps: 1_000,
            tool_calls: 1_000,
        };
        assert!(violations(&limits, &usage).is_empty());
    }

    #[test]
    fn reaching_a_limit_is_allowed_exceeding_is_not() {
        let limits = Budgets {
            max_wall_time_seconds: 60,
            max_retries: 1,
            max_step_count: 3,
            max_tool_calls: 10,
        };
        let at_limit = BudgetUsage {
            wall_time_seconds: 60,
            retries: 0,
            steps: 3,
            tool_calls: 10,
        };
        assert!(violations(&limits, &at_limit).is_empty());

        let over = BudgetUsage {
            steps: 4,
            tool_calls: 11,
            ..at_limit
        };
        assert_eq!(
            violations(&limits, &over),
            vec!["step_count>3".to_string(), "tool_call_count>10".to_string()]
        );
    }
}
