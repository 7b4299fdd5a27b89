//! Goal planner: turns a goal into a validated [`Plan`].
//!
//! The planner makes exactly one oracle call per goal and never retries it.
//! The response is untrusted text; [`parse`] locates a JSON payload in it and
//! each step is checked against the [`CapabilityRegistry`]:
//!
//! - structurally invalid steps are dropped
//! - a step naming an unregistered capability rejects the whole plan
//! - plans longer than `max_steps` are rejected, never truncated
//! - an unusable response degrades to a single reasoning step over the goal

mod parse;

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::capability::{has_value, CapabilityRegistry};
use crate::config::OrchestratorConfig;
use crate::error::{FlowError, FlowResult};
use crate::oracle::{invoke_bounded, Oracle, OracleRequest};
use crate::types::{Context, Intent, Plan, Step};

use self::parse::{extract_payload, parse_step, step_values, RawStep};

const SYSTEM_PROMPT: &str =
    "You are an AI planning agent. Break complex goals into concrete, ordered steps.";

/// A plan plus caller-facing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedGoal {
    pub plan: Plan,
    pub intent: Intent,
}

pub struct GoalPlanner {
    oracle: Arc<dyn Oracle>,
    registry: Arc<CapabilityRegistry>,
    config: OrchestratorConfig,
}

impl GoalPlanner {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        registry: Arc<CapabilityRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            oracle,
            registry,
            config,
        }
    }

    /// Produce a validated plan for `goal`.
    ///
    /// Oracle failures, unknown capabilities and over-long plans are returned
    /// as errors. Unparseable output is recovered with the fallback plan.
    pub async fn plan(
        &self,
        goal: &str,
        context: &Context,
        cancel: &CancellationToken,
    ) -> FlowResult<PlannedGoal> {
        let request = OracleRequest::new(self.build_prompt(goal, context), self.config.oracle_timeout())
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.config.planner_temperature);

        let text = invoke_bounded(self.oracle.as_ref(), request, cancel).await?;

        let plan = match self.parse_plan(goal, &text) {
            Ok(plan) => plan,
            Err(FlowError::PlanParseFailure(reason)) => {
                tracing::warn!(%reason, "unusable plan from oracle, using reasoning fallback");
                self.fallback_plan(goal)
            }
            Err(e) => return Err(e),
        };

        let intent = self.intent_of(&plan);
        tracing::info!(
            steps = plan.len(),
            fallback = plan.is_fallback(),
            ?intent,
            "plan ready"
        );
        Ok(PlannedGoal { plan, intent })
    }

    /// Deterministic planning prompt for a goal and context.
    pub fn build_prompt(&self, goal: &str, context: &Context) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Break the goal below into concrete, ordered steps using only the capabilities listed."
        );
        let _ = writeln!(prompt, "\nGoal: {goal}");

        if !context.is_empty() {
            let _ = writeln!(prompt, "\nContext:");
            for (key, value) in context.iter() {
                let _ = writeln!(prompt, "- {key}: {}", render_value(value));
            }
        }

        let _ = writeln!(prompt, "\nAvailable capabilities:");
        for descriptor in self.registry.list() {
            let _ = writeln!(
                prompt,
                "\n{} ({}): {}",
                descriptor.name, descriptor.kind, descriptor.description
            );
            if !descriptor.required_parameters.is_empty() {
                let _ = writeln!(
                    prompt,
                    "  Required parameters: {}",
                    descriptor.required_parameters.join(", ")
                );
            }
            let _ = writeln!(prompt, "  Input schema: {}", descriptor.input_schema);
        }

        let _ = write!(
            prompt,
            r#"
Return ONLY a JSON array with this shape:
[
  {{
    "position": 1,
    "capability": "name of a capability listed above",
    "parameters": {{"key": "value"}},
    "description": "Short, human-readable step name",
    "rationale": "Why this step is necessary"
  }}
]

Rules:
1. Use only the capability names listed above.
2. Use '{reasoning}' only when no external data or actions are needed.
3. Never fabricate external data. If the goal needs live data, use a network capability.
4. Use at most {max} steps, ordered logically.
5. Omit optional parameters instead of sending empty strings.
"#,
            reasoning = self.config.reasoning_capability,
            max = self.config.max_steps,
        );
        prompt
    }

    /// Validate oracle output against the registry.
    ///
    /// Returns `PlanParseFailure` when no valid step survives.
    pub fn parse_plan(&self, goal: &str, text: &str) -> FlowResult<Plan> {
        let payload = extract_payload(text)
            .ok_or_else(|| FlowError::PlanParseFailure("no JSON payload in oracle output".into()))?;

        let mut accepted: Vec<RawStep> = Vec::new();
        for (index, value) in step_values(payload).iter().enumerate() {
            let mut raw = match parse_step(value) {
                Ok(raw) => raw,
                Err(reason) => {
                    tracing::warn!(index, reason, "discarding plan step");
                    continue;
                }
            };

            let capability = self.registry.lookup(&raw.capability)?;
            raw.capability = capability.name().to_string();
            capability.repair_parameters(goal, &mut raw.parameters);

            if let Some(missing) = capability
                .required_parameters()
                .iter()
                .find(|p| !has_value(raw.parameters.get(**p)))
            {
                tracing::warn!(
                    index,
                    capability = %raw.capability,
                    parameter = *missing,
                    "discarding plan step, required parameter missing"
                );
                continue;
            }
            accepted.push(raw);
        }

        if accepted.len() > self.config.max_steps {
            return Err(FlowError::PlanTooLong {
                steps: accepted.len(),
                max: self.config.max_steps,
            });
        }

        if accepted.iter().all(|s| s.position.is_some()) {
            accepted.sort_by_key(|s| s.position);
        }

        let steps = accepted
            .into_iter()
            .map(|raw| Step {
                position: 0,
                capability: raw.capability,
                parameters: raw.parameters,
                description: raw.description,
                rationale: raw.rationale,
            })
            .collect();
        Plan::from_steps(steps)
    }

    /// Single reasoning step over the full goal text.
    pub fn fallback_plan(&self, goal: &str) -> Plan {
        let mut parameters = Map::new();
        parameters.insert("question".into(), Value::String(goal.to_string()));
        Plan::fallback(
            Step::new(1, self.config.reasoning_capability.clone(), parameters)
                .with_description("Answer the goal directly"),
        )
    }

    fn intent_of(&self, plan: &Plan) -> Intent {
        Intent::from_kinds(
            plan.capabilities()
                .into_iter()
                .filter_map(|name| self.registry.lookup(name).ok())
                .map(|c| c.kind()),
        )
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capability, CapabilityOutput, MemoryCapability};
    use crate::oracle::OracleError;
    use crate::types::CapabilityKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedOracle {
        reply: Result<String, OracleError>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Oracle for ScriptedOracle {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _request: OracleRequest) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    struct Stub {
        name: &'static str,
        kind: CapabilityKind,
        required: &'static [&'static str],
    }

    #[async_trait]
    impl Capability for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn kind(&self) -> CapabilityKind {
            self.kind
        }

        fn required_parameters(&self) -> &[&'static str] {
            self.required
        }

        fn repair_parameters(&self, goal: &str, parameters: &mut Map<String, Value>) {
            if self.kind == CapabilityKind::Reasoning && !has_value(parameters.get("question")) {
                parameters.insert("question".into(), json!(goal));
            }
        }

        async fn execute(
            &self,
            _parameters: &Map<String, Value>,
            _context: &mut Context,
            _cancel: &CancellationToken,
        ) -> FlowResult<CapabilityOutput> {
            Ok(CapabilityOutput::success(json!("ok")))
        }
    }

    fn registry() -> Arc<CapabilityRegistry> {
        let registry = CapabilityRegistry::new()
            .with(Arc::new(Stub {
                name: "reasoning",
                kind: CapabilityKind::Reasoning,
                required: &["question"],
            }))
            .unwrap()
            .with(Arc::new(Stub {
                name: "http",
                kind: CapabilityKind::Network,
                required: &["url"],
            }))
            .unwrap()
            .with(Arc::new(MemoryCapability::default()))
            .unwrap();
        Arc::new(registry)
    }

    fn planner_with(oracle: Arc<dyn Oracle>, max_steps: usize) -> GoalPlanner {
        GoalPlanner::new(
            oracle,
            registry(),
            OrchestratorConfig::default().with_max_steps(max_steps),
        )
    }

    fn planner() -> GoalPlanner {
        planner_with(ScriptedOracle::replying("[]"), 10)
    }

    #[test]
    fn prompt_is_deterministic_and_complete() {
        let mut ctx = Context::new();
        ctx.set("zeta", json!("last"));
        ctx.set("alpha", json!({"n": 1}));
        let p = planner();
        let a = p.build_prompt("Fetch BTC price", &ctx);
        let b = p.build_prompt("Fetch BTC price", &ctx);
        assert_eq!(a, b);
        assert!(a.contains("Goal: Fetch BTC price"));
        assert!(a.find("- alpha").unwrap() < a.find("- zeta").unwrap());
        assert!(a.contains("http (network)"));
        assert!(a.contains("Required parameters: url"));
        assert!(a.contains("at most 10 steps"));
    }

    #[test]
    fn parses_aliases_and_orders_by_position() {
        let text = r#"[
            {"step_number": 2, "tool_name": "HTTP", "input_data": {"url": "https://api"}},
            {"step_number": 1, "tool_name": "reasoning", "input_data": {"question": "why"}}
        ]"#;
        let plan = planner().parse_plan("goal", text).unwrap();
        let names: Vec<&str> = plan.steps().iter().map(|s| s.capability.as_str()).collect();
        assert_eq!(names, vec!["reasoning", "http"]);
        assert_eq!(plan.steps()[1].position, 2);
    }

    #[test]
    fn response_order_kept_when_positions_incomplete() {
        let text = r#"[
            {"position": 5, "capability": "http", "parameters": {"url": "https://a"}},
            {"capability": "reasoning", "parameters": {"question": "q"}}
        ]"#;
        let plan = planner().parse_plan("goal", text).unwrap();
        assert_eq!(plan.steps()[0].capability, "http");
        assert_eq!(plan.steps()[0].position, 1);
    }

    #[test]
    fn invalid_steps_are_discarded() {
        let text = r#"[
            "just text",
            {"capability": "http", "parameters": null},
            {"capability": "http", "parameters": {"method": "GET"}},
            {"capability": "reasoning", "parameters": {"question": "ok"}}
        ]"#;
        let plan = planner().parse_plan("goal", text).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].capability, "reasoning");
    }

    #[test]
    fn repair_runs_before_required_check() {
        let text = r#"[{"capability": "memory", "parameters": {"value": 3}}]"#;
        let plan = planner().parse_plan("Remember the answer", text).unwrap();
        let params = &plan.steps()[0].parameters;
        assert_eq!(params["action"], "store");
        assert_eq!(params["key"], "remember_the_answer");
    }

    #[test]
    fn unknown_capability_rejects_plan() {
        let text = r#"[
            {"capability": "reasoning", "parameters": {"question": "q"}},
            {"capability": "weather", "parameters": {"city": "Oslo"}}
        ]"#;
        let err = planner().parse_plan("goal", text).unwrap_err();
        assert!(matches!(err, FlowError::CapabilityNotFound { ref name } if name == "weather"));
    }

    #[test]
    fn too_many_steps_rejected() {
        let p = planner_with(ScriptedOracle::replying("[]"), 2);
        let steps: Vec<Value> = (0..3)
            .map(|i| json!({"capability": "reasoning", "parameters": {"question": format!("q{i}")}}))
            .collect();
        let err = p.parse_plan("goal", &Value::Array(steps).to_string()).unwrap_err();
        assert!(matches!(err, FlowError::PlanTooLong { steps: 3, max: 2 }));
    }

    #[test]
    fn empty_plan_is_parse_failure() {
        let err = planner().parse_plan("goal", "[]").unwrap_err();
        assert!(matches!(err, FlowError::PlanParseFailure(_)));
        let err = planner().parse_plan("goal", "no idea").unwrap_err();
        assert!(matches!(err, FlowError::PlanParseFailure(_)));
    }

    #[tokio::test]
    async fn garbage_falls_back_to_reasoning() {
        let oracle = ScriptedOracle::replying("I'd rather chat about the weather.");
        let p = planner_with(oracle.clone(), 10);
        let planned = p
            .plan("What is 2+2?", &Context::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(planned.plan.is_fallback());
        assert_eq!(planned.plan.len(), 1);
        let step = &planned.plan.steps()[0];
        assert_eq!(step.capability, "reasoning");
        assert_eq!(step.parameters.len(), 1);
        assert_eq!(step.parameters["question"], "What is 2+2?");
        assert_eq!(planned.intent, Intent::ReasoningOnly);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn intent_reflects_capability_kinds() {
        let oracle = ScriptedOracle::replying(
            r#"{"steps": [
                {"capability": "http", "parameters": {"url": "https://api"}},
                {"capability": "reasoning", "parameters": {"question": "summarize"}}
            ]}"#,
        );
        let planned = planner_with(oracle, 10)
            .plan("Fetch and explain", &Context::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(planned.intent, Intent::Mixed);
        assert!(!planned.plan.is_fallback());
    }

    #[tokio::test]
    async fn oracle_failure_is_fatal() {
        let oracle = Arc::new(ScriptedOracle {
            reply: Err(OracleError::Auth("401".into())),
            calls: AtomicUsize::new(0),
        });
        let err = planner_with(oracle.clone(), 10)
            .plan("goal", &Context::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::OracleAuthFailure(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }
}
