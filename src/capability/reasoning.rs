//! Reasoning capability: answers a question from the oracle alone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::FlowResult;
use crate::oracle::{invoke_bounded, Oracle, OracleRequest};
use crate::types::{CapabilityKind, Context};

use super::{has_value, Capability, CapabilityOutput};

pub const REASONING_NOTE: &str = "Reasoning-only; no external tools used";

const SYSTEM_PROMPT: &str = "You are an agentic execution system. Provide a concise, accurate \
explanation without implying external actions or live data access.";

/// Delegates a question to the oracle.
///
/// Parameters: `question` (required) and an optional free-text `context`.
pub struct ReasoningCapability {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
    temperature: f32,
}

impl ReasoningCapability {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(60),
            temperature: 0.3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(question: &str, extra: Option<&Value>) -> String {
        let mut prompt = format!("Question: {question}");
        match extra {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                prompt.push_str("\n\nAdditional Context: ");
                prompt.push_str(s);
            }
            Some(v) if has_value(Some(v)) && !v.is_string() => {
                prompt.push_str("\n\nAdditional Context: ");
                prompt.push_str(&v.to_string());
            }
            _ => {}
        }
        prompt
    }
}

#[async_trait]
impl Capability for ReasoningCapability {
    fn name(&self) -> &str {
        "reasoning"
    }

    fn description(&self) -> &str {
        "Reasoning-only answers when no external tools are required"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Reasoning
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "Question to answer"},
                "context": {"type": "string", "description": "Additional context for answering"}
            },
            "required": ["question"]
        })
    }

    fn required_parameters(&self) -> &[&'static str] {
        &["question"]
    }

    fn repair_parameters(&self, goal: &str, parameters: &mut Map<String, Value>) {
        if !has_value(parameters.get("question")) {
            parameters.insert("question".into(), Value::String(goal.to_string()));
        }
    }

    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        _context: &mut Context,
        cancel: &CancellationToken,
    ) -> FlowResult<CapabilityOutput> {
        let question = match parameters.get("question").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => return Ok(CapabilityOutput::failure("Missing 'question' parameter")),
        };

        let request = OracleRequest::new(
            Self::build_prompt(&question, parameters.get("context")),
            self.timeout,
        )
        .with_system(SYSTEM_PROMPT)
        .with_temperature(self.temperature);

        let answer = invoke_bounded(self.oracle.as_ref(), request, cancel).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(CapabilityOutput::failure("Failed to generate answer"));
        }

        tracing::debug!(oracle = %self.oracle.name(), "question answered");
        Ok(CapabilityOutput::success(json!({
            "answer": answer,
            "question": question,
            "note": REASONING_NOTE,
        })))
    }
}
