//! # goalflow-core
//!
//! Goal orchestration engine. A natural-language goal is turned into a plan by
//! a reasoning oracle, the plan's steps are run against registered
//! capabilities, and the run is sealed into an auditable execution record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use goalflow_core::capability::{CapabilityRegistry, MemoryCapability, ReasoningCapability};
//! use goalflow_core::oracle::{OpenAiOracle, OracleConfig};
//! use goalflow_core::{Context, Orchestrator, OrchestratorConfig};
//!
//! # async fn run() -> goalflow_core::FlowResult<()> {
//! let oracle = Arc::new(OpenAiOracle::new(OracleConfig::from_env()?)?);
//!
//! let registry = CapabilityRegistry::new()
//!     .with(Arc::new(ReasoningCapability::new(oracle.clone())))?
//!     .with(Arc::new(MemoryCapability::default()))?;
//!
//! let orchestrator = Orchestrator::new(Arc::new(registry), oracle, OrchestratorConfig::default())?;
//! let record = orchestrator.submit("Explain what an API is", Context::new()).await?;
//!
//! let result = record.final_result.as_ref().map(|r| r.content.as_str());
//! println!("{} -> {:?}", record.status, result);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | Core types: `Context`, `Step`, `Plan`, `StepOutcome`, `FinalResult`, `OrchestratorEvent` |
//! | [`capability`] | `Capability` trait, registry, and the reasoning / http / memory capabilities |
//! | [`oracle`] | `Oracle` trait with bounded invocation and an OpenAI-compatible backend |
//! | [`planner`] | Prompt construction and tolerant, validated plan parsing with fallback |
//! | [`executor`] | Sequential step execution with timeouts, retry/backoff and halt policy |
//! | [`resolver`] | Collapses outcomes into one `FinalResult` with source and confidence |
//! | [`record`] | `ExecutionRecord` and its summary |
//! | [`store`] | Concurrent in-memory record store |
//! | [`orchestrator`] | `submit` / `get` surface composing all of the above |
//! | [`config`] | Serde configuration with env overrides |
//! | [`error`] | Error types with thiserror: oracle, planning, step, lookup failures |
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod orchestrator;
pub mod planner;
pub mod record;
pub mod resolver;
pub mod store;
pub mod types;

pub use config::{OrchestratorConfig, RetryConfig};
pub use error::{ErrorKind, FlowError, FlowResult};
pub use orchestrator::Orchestrator;
pub use record::{ExecutionRecord, ExecutionSummary};
pub use types::*;
