//! Result resolver: collapses a finished execution into one [`FinalResult`].

use std::sync::Arc;

use serde_json::Value;

use crate::capability::reasoning::REASONING_NOTE;
use crate::capability::CapabilityRegistry;
use crate::types::{CapabilityKind, Confidence, FinalResult, Plan, ResultSource, StepOutcome};

pub struct ResultResolver {
    registry: Arc<CapabilityRegistry>,
}

impl ResultResolver {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Build the final result. Total: every input produces a result.
    ///
    /// `plan` is `None` when planning failed; `error` is the record's
    /// fatal or halting cause, if any.
    pub fn resolve(
        &self,
        execution_id: &str,
        plan: Option<&Plan>,
        outcomes: &[StepOutcome],
        error: Option<&str>,
    ) -> FinalResult {
        let failed = error.is_some() || plan.is_none() || outcomes.iter().any(|o| !o.success);
        let fallback = plan.map(|p| p.is_fallback()).unwrap_or(false);

        let content = match outcomes.iter().rev().find(|o| o.success) {
            Some(outcome) => render_output(outcome.output.as_ref()),
            None => {
                let cause = error
                    .or_else(|| outcomes.iter().rev().find_map(|o| o.error.as_deref()))
                    .unwrap_or("no step produced a result");
                format!("Execution failed: {cause}")
            }
        };

        let mut reasoning = false;
        let mut tools = false;
        let mut network = false;
        for outcome in outcomes.iter().filter(|o| o.success) {
            match self.kind_of(&outcome.capability) {
                CapabilityKind::Reasoning => reasoning = true,
                CapabilityKind::Network => {
                    tools = true;
                    network = true;
                }
                CapabilityKind::Local => tools = true,
            }
        }

        let source = if failed {
            ResultSource::ToolFailure
        } else {
            match (reasoning, tools) {
                (true, true) => ResultSource::Mixed,
                (false, true) => ResultSource::Http,
                _ => ResultSource::ReasoningOnly,
            }
        };

        let confidence = if failed || fallback {
            Confidence::Low
        } else if network {
            Confidence::High
        } else {
            Confidence::Medium
        };

        let note = (source == ResultSource::ReasoningOnly).then(|| REASONING_NOTE.to_string());

        FinalResult {
            content,
            source,
            confidence,
            execution_id: execution_id.to_string(),
            note,
        }
    }

    fn kind_of(&self, capability: &str) -> CapabilityKind {
        self.registry
            .lookup(capability)
            .map(|c| c.kind())
            .unwrap_or(CapabilityKind::Local)
    }
}

/// Render a step output as answer text.
fn render_output(output: Option<&Value>) -> String {
    match output {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => match map.get("answer") {
            Some(Value::String(answer)) => answer.clone(),
            _ => Value::Object(map.clone()).to_string(),
        },
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilityOutput};
    use crate::error::FlowResult;
    use crate::types::{Context, Step};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use tokio_util::sync::CancellationToken;

    struct Kinded(&'static str, CapabilityKind);

    #[async_trait]
    impl Capability for Kinded {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "kinded"
        }

        fn kind(&self) -> CapabilityKind {
            self.1
        }

        async fn execute(
            &self,
            _parameters: &Map<String, Value>,
            _context: &mut Context,
            _cancel: &CancellationToken,
        ) -> FlowResult<CapabilityOutput> {
            Ok(CapabilityOutput::success(Value::Null))
        }
    }

    fn resolver() -> ResultResolver {
        let registry = CapabilityRegistry::new()
            .with(Arc::new(Kinded("reasoning", CapabilityKind::Reasoning)))
            .unwrap()
            .with(Arc::new(Kinded("http", CapabilityKind::Network)))
            .unwrap()
            .with(Arc::new(Kinded("memory", CapabilityKind::Local)))
            .unwrap();
        ResultResolver::new(Arc::new(registry))
    }

    fn outcome(position: usize, capability: &str, output: Option<Value>, error: Option<&str>) -> StepOutcome {
        StepOutcome {
            position,
            capability: capability.into(),
            success: error.is_none(),
            output,
            error: error.map(String::from),
            retry_count: 1,
            duration_ms: 1,
            finished_at: chrono::Utc::now(),
        }
    }

    fn plan_of(names: &[&str]) -> Plan {
        Plan::from_steps(names.iter().map(|n| Step::new(0, *n, Map::new())).collect()).unwrap()
    }

    #[test]
    fn reasoning_only_is_medium() {
        let plan = plan_of(&["reasoning"]);
        let outcomes = [outcome(1, "reasoning", Some(json!({"answer": "4", "question": "2+2"})), None)];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.content, "4");
        assert_eq!(result.source, ResultSource::ReasoningOnly);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.note.as_deref(), Some(REASONING_NOTE));
        assert_eq!(result.execution_id, "e1");
    }

    #[test]
    fn network_success_is_high() {
        let plan = plan_of(&["http"]);
        let outcomes = [outcome(1, "http", Some(json!({"status_code": 200})), None)];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.source, ResultSource::Http);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.content, r#"{"status_code":200}"#);
        assert!(result.note.is_none());
    }

    #[test]
    fn mixed_uses_latest_output() {
        let plan = plan_of(&["http", "reasoning"]);
        let outcomes = [
            outcome(1, "http", Some(json!({"status_code": 200})), None),
            outcome(2, "reasoning", Some(json!("BTC is up")), None),
        ];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.source, ResultSource::Mixed);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.content, "BTC is up");
    }

    #[test]
    fn local_only_is_medium_http_source() {
        let plan = plan_of(&["memory"]);
        let outcomes = [outcome(1, "memory", Some(json!({"key": "k"})), None)];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.source, ResultSource::Http);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn any_failure_overrides() {
        let plan = plan_of(&["reasoning", "http"]);
        let outcomes = [
            outcome(1, "reasoning", Some(json!("partial answer")), None),
            outcome(2, "http", None, Some("HTTP 503")),
        ];
        let result =
            resolver().resolve("e1", Some(&plan), &outcomes, Some("Step execution failed: HTTP 503"));
        assert_eq!(result.source, ResultSource::ToolFailure);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.content, "partial answer");
    }

    #[test]
    fn nothing_succeeded_reports_error() {
        let plan = plan_of(&["http"]);
        let outcomes = [outcome(1, "http", None, Some("HTTP 500"))];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.content, "Execution failed: HTTP 500");
        assert_eq!(result.source, ResultSource::ToolFailure);
    }

    #[test]
    fn planning_failure_resolves() {
        let result = resolver().resolve("e1", None, &[], Some("Oracle auth failed: 401"));
        assert_eq!(result.content, "Execution failed: Oracle auth failed: 401");
        assert_eq!(result.source, ResultSource::ToolFailure);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn fallback_plan_is_low() {
        let plan = Plan::fallback(Step::new(1, "reasoning", Map::new()));
        let outcomes = [outcome(1, "reasoning", Some(json!("4")), None)];
        let result = resolver().resolve("e1", Some(&plan), &outcomes, None);
        assert_eq!(result.source, ResultSource::ReasoningOnly);
        assert_eq!(result.confidence, Confidence::Low);
    }
}
