//! Step executor: runs a plan's steps in order, one at a time.
//!
//! Each step is resolved against the registry, invoked under the configured
//! per-attempt timeout and retried with a [`Backoff`] policy. Whether a step
//! that still fails stops the plan is decided by a [`HaltPolicy`].

mod halt;
mod retry;

pub use halt::{FailFast, HaltPolicy};
pub use retry::{Backoff, ExponentialBackoff, NoBackoff};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capability::{Capability, CapabilityOutput, CapabilityRegistry};
use crate::config::OrchestratorConfig;
use crate::error::FlowError;
use crate::types::{Context, ExecutionStatus, OrchestratorEvent, Plan, Step, StepOutcome};

/// Per-submission handles threaded through execution.
#[derive(Clone, Copy)]
pub struct ExecutionScope<'a> {
    pub execution_id: &'a str,
    pub cancel: &'a CancellationToken,
    pub events: Option<&'a mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl ExecutionScope<'_> {
    pub(crate) fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event);
        }
    }
}

/// How a plan run ended.
#[derive(Debug)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    /// Halting or fatal cause. `None` when every step succeeded.
    pub error: Option<FlowError>,
}

/// Result of a single attempt.
enum Attempt {
    Succeeded(CapabilityOutput),
    Failed {
        error: FlowError,
        result: Option<Value>,
    },
    Cancelled,
}

pub struct StepExecutor {
    registry: Arc<CapabilityRegistry>,
    max_attempts: u32,
    capability_timeout: Duration,
    backoff: Arc<dyn Backoff>,
    halt: Arc<dyn HaltPolicy>,
}

impl StepExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            max_attempts: config.retry.max_attempts.max(1),
            capability_timeout: config.capability_timeout(),
            backoff: Arc::new(ExponentialBackoff::from_config(&config.retry)),
            halt: Arc::new(FailFast),
        }
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_halt_policy(mut self, halt: Arc<dyn HaltPolicy>) -> Self {
        self.halt = halt;
        self
    }

    /// Run every step of `plan` in position order, appending one outcome per
    /// step that was started.
    pub async fn execute(
        &self,
        plan: &Plan,
        context: &mut Context,
        outcomes: &mut Vec<StepOutcome>,
        scope: ExecutionScope<'_>,
    ) -> ExecutionReport {
        let mut last_error: Option<FlowError> = None;

        for step in plan.steps() {
            if scope.cancel.is_cancelled() {
                tracing::info!(execution_id = %scope.execution_id, position = step.position, "cancelled before step");
                return report(outcomes, plan.len(), Some(FlowError::Cancelled), true);
            }

            let capability = match self.registry.lookup(&step.capability) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(
                        execution_id = %scope.execution_id,
                        position = step.position,
                        capability = %step.capability,
                        "capability missing at execution time"
                    );
                    let outcome = failed_outcome(step, e.to_string(), None, 0, Duration::ZERO);
                    scope.emit(OrchestratorEvent::StepFinished {
                        execution_id: scope.execution_id.to_string(),
                        outcome: outcome.clone(),
                    });
                    outcomes.push(outcome);
                    return report(outcomes, plan.len(), Some(e), true);
                }
            };

            tracing::info!(
                execution_id = %scope.execution_id,
                position = step.position,
                capability = %step.capability,
                "step started"
            );
            scope.emit(OrchestratorEvent::StepStarted {
                execution_id: scope.execution_id.to_string(),
                position: step.position,
                capability: step.capability.clone(),
            });

            let (outcome, error) = self
                .run_step(step, capability.as_ref(), context, scope)
                .await;

            if outcome.success {
                let value = outcome.output.clone().unwrap_or(Value::Null);
                context.set(format!("step_{}", step.position), value.clone());
                context.set(step.capability.clone(), value);
            }

            tracing::info!(
                execution_id = %scope.execution_id,
                position = step.position,
                capability = %step.capability,
                success = outcome.success,
                attempts = outcome.retry_count,
                duration_ms = outcome.duration_ms,
                "step finished"
            );
            scope.emit(OrchestratorEvent::StepFinished {
                execution_id: scope.execution_id.to_string(),
                outcome: outcome.clone(),
            });

            let halt = match error {
                None => false,
                Some(FlowError::Cancelled) => {
                    outcomes.push(outcome);
                    return report(outcomes, plan.len(), Some(FlowError::Cancelled), true);
                }
                Some(e) => {
                    let halt = self.halt.should_halt(step, &outcome);
                    tracing::warn!(
                        execution_id = %scope.execution_id,
                        position = step.position,
                        capability = %step.capability,
                        error = %e,
                        policy = self.halt.name(),
                        halt,
                        "step failed after retries"
                    );
                    last_error = Some(e);
                    halt
                }
            };
            outcomes.push(outcome);
            if halt {
                return report(outcomes, plan.len(), last_error, false);
            }
        }

        report(outcomes, plan.len(), last_error, false)
    }

    /// Invoke one step with retries. Returns its outcome and, on failure, the cause.
    async fn run_step(
        &self,
        step: &Step,
        capability: &dyn Capability,
        context: &mut Context,
        scope: ExecutionScope<'_>,
    ) -> (StepOutcome, Option<FlowError>) {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let (error, result) = match self.attempt(step, capability, context, scope.cancel).await {
                Attempt::Succeeded(output) => {
                    let outcome = StepOutcome {
                        position: step.position,
                        capability: step.capability.clone(),
                        success: true,
                        output: output.result,
                        error: None,
                        retry_count: attempt,
                        duration_ms: started.elapsed().as_millis() as u64,
                        finished_at: chrono::Utc::now(),
                    };
                    return (outcome, None);
                }
                Attempt::Cancelled => {
                    let outcome =
                        failed_outcome(step, "cancelled".into(), None, attempt, started.elapsed());
                    return (outcome, Some(FlowError::Cancelled));
                }
                Attempt::Failed { error, result } => (error, result),
            };

            if attempt >= self.max_attempts {
                let outcome =
                    failed_outcome(step, error.to_string(), result, attempt, started.elapsed());
                return (outcome, Some(error));
            }

            let delay = self.backoff.delay(attempt);
            tracing::warn!(
                execution_id = %scope.execution_id,
                position = step.position,
                capability = %step.capability,
                error = %error,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                "retrying step"
            );
            scope.emit(OrchestratorEvent::StepRetrying {
                execution_id: scope.execution_id.to_string(),
                position: step.position,
                capability: step.capability.clone(),
                attempt,
                retry_in_ms: delay.as_millis() as u64,
                error: error.to_string(),
            });

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = scope.cancel.cancelled() => {
                        let outcome =
                            failed_outcome(step, "cancelled".into(), None, attempt, started.elapsed());
                        return (outcome, Some(FlowError::Cancelled));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    async fn attempt(
        &self,
        step: &Step,
        capability: &dyn Capability,
        context: &mut Context,
        cancel: &CancellationToken,
    ) -> Attempt {
        let invocation = tokio::time::timeout(
            self.capability_timeout,
            capability.execute(&step.parameters, context, cancel),
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            result = invocation => result,
        };

        match result {
            Err(_) => Attempt::Failed {
                error: FlowError::StepTimeout {
                    capability: step.capability.clone(),
                    timeout_ms: self.capability_timeout.as_millis() as u64,
                },
                result: None,
            },
            Ok(Err(FlowError::Cancelled)) => Attempt::Cancelled,
            Ok(Err(e @ FlowError::StepTimeout { .. })) => Attempt::Failed {
                error: e,
                result: None,
            },
            Ok(Err(e)) => Attempt::Failed {
                error: FlowError::StepExecution {
                    capability: step.capability.clone(),
                    message: e.to_string(),
                },
                result: None,
            },
            Ok(Ok(output)) if output.success => Attempt::Succeeded(output),
            Ok(Ok(output)) => Attempt::Failed {
                error: FlowError::StepExecution {
                    capability: step.capability.clone(),
                    message: output
                        .error
                        .unwrap_or_else(|| "capability reported failure".into()),
                },
                result: output.result,
            },
        }
    }
}

fn failed_outcome(
    step: &Step,
    error: String,
    output: Option<Value>,
    attempts: u32,
    elapsed: Duration,
) -> StepOutcome {
    StepOutcome {
        position: step.position,
        capability: step.capability.clone(),
        success: false,
        output,
        error: Some(error),
        retry_count: attempts,
        duration_ms: elapsed.as_millis() as u64,
        finished_at: chrono::Utc::now(),
    }
}

fn report(
    outcomes: &[StepOutcome],
    planned: usize,
    error: Option<FlowError>,
    fatal: bool,
) -> ExecutionReport {
    let all_ok = outcomes.iter().all(|o| o.success);
    let any_ok = outcomes.iter().any(|o| o.success);
    let status = if fatal {
        ExecutionStatus::Failed
    } else if error.is_none() && all_ok && outcomes.len() == planned {
        ExecutionStatus::Completed
    } else if any_ok {
        ExecutionStatus::Partial
    } else {
        ExecutionStatus::Failed
    };
    ExecutionReport { status, error }
}
