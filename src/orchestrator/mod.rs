//! Orchestrator: the submit/query surface.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use goalflow_core::capability::{CapabilityRegistry, HttpCapability, ReasoningCapability};
//! use goalflow_core::oracle::{OpenAiOracle, OracleConfig};
//! use goalflow_core::{Context, Orchestrator, OrchestratorConfig};
//!
//! # async fn run() -> goalflow_core::FlowResult<()> {
//! let oracle = Arc::new(OpenAiOracle::new(OracleConfig::from_env()?)?);
//! let mut registry = CapabilityRegistry::new();
//! registry.register(Arc::new(ReasoningCapability::new(oracle.clone())))?;
//! registry.register(Arc::new(HttpCapability::new()))?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(registry), oracle, OrchestratorConfig::from_env()?)?;
//! let record = orchestrator.submit("What is 2+2", Context::new()).await?;
//! println!("{}: {:?}", record.status, record.final_result);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::error::{FlowError, FlowResult};
use crate::executor::{Backoff, ExecutionScope, HaltPolicy, StepExecutor};
use crate::oracle::Oracle;
use crate::planner::{GoalPlanner, PlannedGoal};
use crate::record::ExecutionRecord;
use crate::resolver::ResultResolver;
use crate::store::ExecutionStore;
use crate::types::{Context, ExecutionStatus, OrchestratorEvent};

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    planner: GoalPlanner,
    executor: StepExecutor,
    resolver: ResultResolver,
    store: ExecutionStore,
    events: Option<mpsc::UnboundedSender<OrchestratorEvent>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Validates `config` and that its reasoning capability is registered.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        oracle: Arc<dyn Oracle>,
        mut config: OrchestratorConfig,
    ) -> FlowResult<Self> {
        config.validate()?;
        let reasoning = registry.lookup(&config.reasoning_capability)?;
        config.reasoning_capability = reasoning.name().to_string();

        Ok(Self {
            planner: GoalPlanner::new(oracle, registry.clone(), config.clone()),
            executor: StepExecutor::new(registry.clone(), &config),
            resolver: ResultResolver::new(registry.clone()),
            store: ExecutionStore::new(),
            events: None,
            registry,
            config,
        })
    }

    /// Attach a channel that receives progress events for every submission.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.executor = self.executor.with_backoff(backoff);
        self
    }

    pub fn with_halt_policy(mut self, halt: Arc<dyn HaltPolicy>) -> Self {
        self.executor = self.executor.with_halt_policy(halt);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Plan, execute and resolve `goal`, returning the sealed record.
    ///
    /// Only a blank goal is returned as `Err`; every other failure is
    /// recorded on the sealed record.
    pub async fn submit(&self, goal: &str, context: Context) -> FlowResult<Arc<ExecutionRecord>> {
        self.submit_with_cancel(goal, context, CancellationToken::new())
            .await
    }

    /// [`submit`](Self::submit) with a caller-held cancellation token.
    pub async fn submit_with_cancel(
        &self,
        goal: &str,
        context: Context,
        cancel: CancellationToken,
    ) -> FlowResult<Arc<ExecutionRecord>> {
        if goal.trim().is_empty() {
            return Err(FlowError::InvalidInput("goal must not be blank".into()));
        }

        let mut record = ExecutionRecord::new(goal, context);
        let execution_id = record.id.clone();
        let scope = ExecutionScope {
            execution_id: &execution_id,
            cancel: &cancel,
            events: self.events.as_ref(),
        };
        self.store.insert(Arc::new(record.clone()));
        tracing::info!(execution_id = %execution_id, goal, "submission started");
        scope.emit(OrchestratorEvent::SubmissionStarted {
            execution_id: execution_id.clone(),
            goal: goal.to_string(),
        });

        let PlannedGoal { plan, intent } =
            match self.planner.plan(goal, &record.context, &cancel).await {
                Ok(planned) => planned,
                Err(e) => {
                    tracing::warn!(execution_id = %execution_id, error = %e, "planning failed");
                    record.fail_with(&e);
                    return Ok(self.seal(record, ExecutionStatus::Failed, scope));
                }
            };

        record.intent = Some(intent);
        record.plan = Some(plan.clone());
        self.store.insert(Arc::new(record.clone()));
        scope.emit(OrchestratorEvent::PlanReady {
            execution_id: execution_id.clone(),
            steps: plan.len(),
            fallback: plan.is_fallback(),
            intent,
        });

        let report = self
            .executor
            .execute(&plan, &mut record.context, &mut record.outcomes, scope)
            .await;
        if let Some(e) = &report.error {
            record.fail_with(e);
        }

        Ok(self.seal(record, report.status, scope))
    }

    /// Look up a record, sealed or in progress.
    pub fn get(&self, execution_id: &str) -> FlowResult<Arc<ExecutionRecord>> {
        self.store.get(execution_id)
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<ExecutionRecord>> {
        self.store.recent(limit)
    }

    fn seal(
        &self,
        record: ExecutionRecord,
        status: ExecutionStatus,
        scope: ExecutionScope<'_>,
    ) -> Arc<ExecutionRecord> {
        let final_result = self.resolver.resolve(
            &record.id,
            record.plan.as_ref(),
            &record.outcomes,
            record.error.as_deref(),
        );
        let sealed = record.seal(status, final_result);
        self.store.insert(sealed.clone());

        tracing::info!(
            execution_id = %sealed.id,
            status = %sealed.status,
            steps = sealed.outcomes.len(),
            elapsed_ms = sealed.summary.elapsed_ms,
            "submission sealed"
        );
        scope.emit(OrchestratorEvent::SubmissionSealed {
            execution_id: sealed.id.clone(),
            status: sealed.status,
        });
        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilityOutput};
    use crate::oracle::{OracleError, OracleRequest};
    use crate::types::CapabilityKind;
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};

    struct FixedOracle(&'static str);

    #[async_trait]
    impl Oracle for FixedOracle {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn invoke(&self, _request: OracleRequest) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    struct Answer;

    #[async_trait]
    impl Capability for Answer {
        fn name(&self) -> &str {
            "reasoning"
        }

        fn description(&self) -> &str {
            "answers"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Reasoning
        }

        async fn execute(
            &self,
            _parameters: &Map<String, Value>,
            _context: &mut Context,
            _cancel: &CancellationToken,
        ) -> FlowResult<CapabilityOutput> {
            Ok(CapabilityOutput::success(json!({"answer": "4"})))
        }
    }

    fn registry() -> Arc<CapabilityRegistry> {
        Arc::new(CapabilityRegistry::new().with(Arc::new(Answer)).unwrap())
    }

    #[test]
    fn requires_reasoning_capability() {
        let result = Orchestrator::new(
            Arc::new(CapabilityRegistry::new()),
            Arc::new(FixedOracle("[]")),
            OrchestratorConfig::default(),
        );
        assert!(matches!(result, Err(FlowError::CapabilityNotFound { .. })));
    }

    #[test]
    fn rejects_invalid_config() {
        let result = Orchestrator::new(
            registry(),
            Arc::new(FixedOracle("[]")),
            OrchestratorConfig::default().with_max_steps(0),
        );
        assert!(matches!(result, Err(FlowError::Config(_))));
    }

    #[tokio::test]
    async fn blank_goal_is_invalid_input() {
        let orch = Orchestrator::new(registry(), Arc::new(FixedOracle("[]")), OrchestratorConfig::default())
            .unwrap();
        let err = orch.submit("   ", Context::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidInput(_)));
        assert!(orch.recent(10).is_empty());
    }

    #[tokio::test]
    async fn submit_stores_sealed_record() {
        let oracle = FixedOracle(r#"[{"capability": "reasoning", "parameters": {"question": "2+2"}}]"#);
        let orch = Orchestrator::new(registry(), Arc::new(oracle), OrchestratorConfig::default()).unwrap();
        let record = orch.submit("What is 2+2", Context::new()).await.unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        let stored = orch.get(&record.id).unwrap();
        assert!(Arc::ptr_eq(&record, &stored));
        assert_eq!(orch.recent(5).len(), 1);
    }

    #[tokio::test]
    async fn goal_is_kept_verbatim() {
        let orch = Orchestrator::new(
            registry(),
            Arc::new(FixedOracle("no plan here")),
            OrchestratorConfig::default(),
        )
        .unwrap();
        let goal = "  What is 2+2?\n";
        let record = orch.submit(goal, Context::new()).await.unwrap();

        assert_eq!(record.goal, goal);
        let plan = record.plan.as_ref().unwrap();
        assert!(plan.is_fallback());
        assert_eq!(plan.steps()[0].parameters["question"], goal);
    }

    #[tokio::test]
    async fn events_bracket_the_submission() {
        let oracle = FixedOracle(r#"[{"capability": "reasoning", "parameters": {"question": "2+2"}}]"#);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orch = Orchestrator::new(registry(), Arc::new(oracle), OrchestratorConfig::default())
            .unwrap()
            .with_events(tx);
        let record = orch.submit("What is 2+2", Context::new()).await.unwrap();
        drop(orch);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.execution_id(), record.id);
            events.push(event);
        }
        assert!(matches!(events.first(), Some(OrchestratorEvent::SubmissionStarted { .. })));
        assert!(matches!(events[1], OrchestratorEvent::PlanReady { steps: 1, fallback: false, .. }));
        assert!(matches!(
            events.last(),
            Some(OrchestratorEvent::SubmissionSealed { status: ExecutionStatus::Completed, .. })
        ));
    }

    #[test]
    fn orchestrator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Orchestrator>();
    }
}
