use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::types::CapabilityDescriptor;

use super::Capability;

/// Registry of capabilities, keyed by name.
///
/// Populated once at startup, then shared read-only behind an `Arc`.
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a capability under its name.
    ///
    /// Registering the same instance twice is a no-op; a different
    /// implementation under a taken name is rejected.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> FlowResult<()> {
        let name = capability.name().to_string();
        if let Some(&idx) = self.index.get(&name) {
            let existing = &self.capabilities[idx];
            if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&capability)) {
                return Ok(());
            }
            return Err(FlowError::DuplicateCapability { name });
        }
        self.index.insert(name, self.capabilities.len());
        self.capabilities.push(capability);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, capability: Arc<dyn Capability>) -> FlowResult<Self> {
        self.register(capability)?;
        Ok(self)
    }

    pub fn lookup(&self, name: &str) -> FlowResult<Arc<dyn Capability>> {
        self.resolve_name(name)
            .and_then(|canonical| self.index.get(canonical))
            .map(|&idx| self.capabilities[idx].clone())
            .ok_or_else(|| FlowError::CapabilityNotFound {
                name: name.to_string(),
            })
    }

    /// Canonical registered name for `name`: exact match first, then
    /// ASCII case-insensitive.
    pub fn resolve_name(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.index.get_key_value(name) {
            return Some(key.as_str());
        }
        let trimmed = name.trim();
        self.capabilities
            .iter()
            .map(|c| c.name())
            .find(|n| n.eq_ignore_ascii_case(trimmed))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve_name(name).is_some()
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities.iter().map(|c| c.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
