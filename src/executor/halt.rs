use crate::types::{Step, StepOutcome};

/// Decides whether execution continues after a step has exhausted its retries.
pub trait HaltPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Called only for failed outcomes. `true` stops the plan.
    fn should_halt(&self, step: &Step, outcome: &StepOutcome) -> bool;
}

/// Every step is critical: the first failure stops the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFast;

impl HaltPolicy for FailFast {
    fn name(&self) -> &str {
        "fail_fast"
    }

    fn should_halt(&self, _step: &Step, _outcome: &StepOutcome) -> bool {
        true
    }
}
