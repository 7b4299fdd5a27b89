//! Execution records: the audit trail of one goal submission.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FlowError};
use crate::types::{Context, ExecutionStatus, FinalResult, Intent, Plan, StepOutcome};

/// Aggregate figures for a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Capabilities that were invoked, in first-use order.
    pub capabilities_used: Vec<String>,
    pub steps_planned: usize,
    pub steps_executed: usize,
    pub failure_count: usize,
    pub total_attempts: u32,
    pub elapsed_ms: u64,
    pub fallback_plan: bool,
}

/// One submission, from `running` to sealed.
///
/// Owned and mutated by a single pipeline until [`ExecutionRecord::seal`],
/// after which it is shared read-only behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub goal: String,
    /// Context as submitted by the caller.
    pub input_context: Context,
    /// Working context, final state once sealed.
    pub context: Context,
    pub intent: Option<Intent>,
    pub plan: Option<Plan>,
    pub outcomes: Vec<StepOutcome>,
    pub status: ExecutionStatus,
    pub final_result: Option<FinalResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub summary: ExecutionSummary,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(goal: impl Into<String>, context: Context) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.into(),
            input_context: context.clone(),
            context,
            intent: None,
            plan: None,
            outcomes: Vec::new(),
            status: ExecutionStatus::Running,
            final_result: None,
            error: None,
            error_kind: None,
            summary: ExecutionSummary::default(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn fail_with(&mut self, error: &FlowError) {
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
    }

    /// Finish the record: set the terminal status and result, compute the
    /// summary, and freeze it.
    pub fn seal(mut self, status: ExecutionStatus, final_result: FinalResult) -> Arc<Self> {
        let completed_at = Utc::now();
        self.status = status;
        self.final_result = Some(final_result);
        self.summary = self.summarize(completed_at);
        self.completed_at = Some(completed_at);
        Arc::new(self)
    }

    fn summarize(&self, completed_at: DateTime<Utc>) -> ExecutionSummary {
        let mut capabilities_used: Vec<String> = Vec::new();
        for outcome in &self.outcomes {
            if outcome.retry_count > 0 && !capabilities_used.contains(&outcome.capability) {
                capabilities_used.push(outcome.capability.clone());
            }
        }
        ExecutionSummary {
            capabilities_used,
            steps_planned: self.plan.as_ref().map(|p| p.len()).unwrap_or(0),
            steps_executed: self.outcomes.len(),
            failure_count: self.outcomes.iter().filter(|o| !o.success).count(),
            total_attempts: self.outcomes.iter().map(|o| o.retry_count).sum(),
            elapsed_ms: (completed_at - self.created_at).num_milliseconds().max(0) as u64,
            fallback_plan: self.plan.as_ref().map(|p| p.is_fallback()).unwrap_or(false),
        }
    }
}
