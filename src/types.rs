use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, FlowResult};

// ─── Context ─────────────────────────────────────────────────────────────────

/// Mutable key/value side channel shared by the steps of one execution.
///
/// Keys are kept sorted so anything rendered from a context (prompts, logs)
/// is deterministic. Writes to an existing key replace the previous value:
/// the last writer wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Insert a value, returning whatever it replaced.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Broad category of a capability, used for intent and result attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Answers from the reasoning oracle alone, no external data.
    Reasoning,
    /// Reaches outside the process (HTTP and similar).
    Network,
    /// In-process tools such as the key/value store.
    Local,
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityKind::Reasoning => write!(f, "reasoning"),
            CapabilityKind::Network => write!(f, "network"),
            CapabilityKind::Local => write!(f, "local"),
        }
    }
}

/// What the planner tells the oracle about a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub kind: CapabilityKind,
    pub input_schema: Value,
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// One discrete action of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based, contiguous within a plan.
    pub position: usize,
    pub capability: String,
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl Step {
    pub fn new(position: usize, capability: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            position,
            capability: capability.into(),
            parameters,
            description: None,
            rationale: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Non-empty ordered sequence of steps with positions `1..=N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanFields")]
pub struct Plan {
    steps: Vec<Step>,
    fallback: bool,
}

/// Unchecked wire form of a [`Plan`].
#[derive(Deserialize)]
struct PlanFields {
    steps: Vec<Step>,
    #[serde(default)]
    fallback: bool,
}

impl TryFrom<PlanFields> for Plan {
    type Error = FlowError;

    fn try_from(fields: PlanFields) -> FlowResult<Self> {
        if fields.steps.is_empty() {
            return Err(FlowError::PlanParseFailure("plan has no steps".into()));
        }
        if fields.fallback && fields.steps.len() != 1 {
            return Err(FlowError::PlanParseFailure(
                "fallback plan must have exactly one step".into(),
            ));
        }
        if let Some((expected, step)) = fields
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (i + 1, step))
            .find(|(expected, step)| step.position != *expected)
        {
            return Err(FlowError::PlanParseFailure(format!(
                "step position {} where {expected} was expected",
                step.position
            )));
        }
        Ok(Self {
            steps: fields.steps,
            fallback: fields.fallback,
        })
    }
}

impl Plan {
    /// Build a plan, renumbering positions to `1..=N` in the given order.
    pub fn from_steps(steps: Vec<Step>) -> FlowResult<Self> {
        if steps.is_empty() {
            return Err(FlowError::PlanParseFailure("plan has no steps".into()));
        }
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, mut step)| {
                step.position = i + 1;
                step
            })
            .collect();
        Ok(Self {
            steps,
            fallback: false,
        })
    }

    /// The synthetic single-step plan used when the oracle output is unusable.
    pub fn fallback(step: Step) -> Self {
        let mut step = step;
        step.position = 1;
        Self {
            steps: vec![step],
            fallback: true,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Capability names in first-use order, without duplicates.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.capability.as_str()) {
                seen.push(step.capability.as_str());
            }
        }
        seen
    }
}

/// Caller-facing classification of a plan. Has no effect on execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReasoningOnly,
    ToolRequired,
    Mixed,
}

impl Intent {
    /// Derive intent from the kinds of capabilities a plan uses.
    pub fn from_kinds<I: IntoIterator<Item = CapabilityKind>>(kinds: I) -> Self {
        let mut reasoning = false;
        let mut tools = false;
        for kind in kinds {
            match kind {
                CapabilityKind::Reasoning => reasoning = true,
                CapabilityKind::Network | CapabilityKind::Local => tools = true,
            }
        }
        match (reasoning, tools) {
            (true, true) => Intent::Mixed,
            (false, true) => Intent::ToolRequired,
            _ => Intent::ReasoningOnly,
        }
    }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Recorded result of one step, from its final attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub position: usize,
    pub capability: String,
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Number of attempts made (0 when the capability could not be resolved).
    pub retry_count: u32,
    #[serde(default)]
    pub duration_ms: u64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Partial => write!(f, "partial"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

// ─── Final Result ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultSource {
    #[serde(rename = "reasoning-only")]
    ReasoningOnly,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "mixed")]
    Mixed,
    #[serde(rename = "tool-failure")]
    ToolFailure,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSource::ReasoningOnly => write!(f, "reasoning-only"),
            ResultSource::Http => write!(f, "http"),
            ResultSource::Mixed => write!(f, "mixed"),
            ResultSource::ToolFailure => write!(f, "tool-failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// The synthesized answer attached to every sealed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub content: String,
    pub source: ResultSource,
    pub confidence: Confidence,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Progress notifications for callers that attach an event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    SubmissionStarted {
        execution_id: String,
        goal: String,
    },
    PlanReady {
        execution_id: String,
        steps: usize,
        fallback: bool,
        intent: Intent,
    },
    StepStarted {
        execution_id: String,
        position: usize,
        capability: String,
    },
    StepRetrying {
        execution_id: String,
        position: usize,
        capability: String,
        attempt: u32,
        retry_in_ms: u64,
        error: String,
    },
    StepFinished {
        execution_id: String,
        outcome: StepOutcome,
    },
    SubmissionSealed {
        execution_id: String,
        status: ExecutionStatus,
    },
}

impl OrchestratorEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            OrchestratorEvent::SubmissionStarted { execution_id, .. }
            | OrchestratorEvent::PlanReady { execution_id, .. }
            | OrchestratorEvent::StepStarted { execution_id, .. }
            | OrchestratorEvent::StepRetrying { execution_id, .. }
            | OrchestratorEvent::StepFinished { execution_id, .. }
            | OrchestratorEvent::SubmissionSealed { execution_id, .. } => execution_id,
        }
    }
}
