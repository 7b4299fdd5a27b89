//! Capabilities: named, invocable actions a plan step can target.
//!
//! The core only depends on the [`Capability`] trait. Three reference
//! implementations ship with the crate:
//! - [`ReasoningCapability`]: answers from the oracle alone
//! - [`HttpCapability`]: makes HTTP requests
//! - [`MemoryCapability`]: process-wide key/value store

pub mod http;
pub mod memory;
pub mod reasoning;
mod registry;

pub use http::HttpCapability;
pub use memory::{MemoryCapability, MemoryStore};
pub use reasoning::ReasoningCapability;
pub use registry::CapabilityRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::FlowResult;
use crate::types::{CapabilityDescriptor, CapabilityKind, Context};

/// A named action that can be invoked by a plan step.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name used in plans.
    fn name(&self) -> &str;

    /// Description for the oracle prompt.
    fn description(&self) -> &str;

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Local
    }

    /// JSON schema hint for the oracle prompt. Not enforced.
    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// Parameters that must be present (and non-empty) for a step to be valid.
    fn required_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Fill in parameters the oracle left out when they can be inferred
    /// from the goal text. Runs before required parameters are checked.
    fn repair_parameters(&self, _goal: &str, _parameters: &mut Map<String, Value>) {}

    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            kind: self.kind(),
            input_schema: self.input_schema(),
            required_parameters: self
                .required_parameters()
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Execute with the step's parameters.
    ///
    /// `context` belongs to the calling execution and may be read or written
    /// freely. Implementations doing long I/O should watch `cancel`.
    async fn execute(
        &self,
        parameters: &Map<String, Value>,
        context: &mut Context,
        cancel: &CancellationToken,
    ) -> FlowResult<CapabilityOutput>;
}

/// Output of one capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CapabilityOutput {
    pub fn success(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// A failure that still carries a payload (e.g. a non-2xx HTTP body).
    pub fn failure_with_result(error: impl Into<String>, result: Value) -> Self {
        Self {
            success: false,
            result: Some(result),
            error: Some(error.into()),
        }
    }
}

/// True when a parameter is present and not null, blank, or empty.
pub(crate) fn has_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(_) => true,
    }
}
