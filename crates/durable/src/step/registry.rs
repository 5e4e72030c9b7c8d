//! Step registry keyed by the closed set of step types
//!
//! The registry is assembled once through [`StepRegistryBuilder`] and is
//! immutable afterwards. Every step type always has a handler: the builder
//! starts from the built-in ones and lets callers replace individual entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flowrun_core::{StepType, UnknownStepType};

use super::builtin::{FetchHandler, InferHandler, NotifyHandler, ProcessHandler};
use super::handler::StepHandler;

/// Immutable map from step type to handler
#[derive(Clone)]
pub struct StepRegistry {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StepRegistry {
    /// Start from the built-in handlers
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::new()
    }

    /// Resolve a persisted type tag to its step type and handler
    pub fn resolve(
        &self,
        step_type: &str,
    ) -> Result<(StepType, Arc<dyn StepHandler>), UnknownStepType> {
        let step_type: StepType = step_type.parse()?;
        let handler = self.handler(step_type);
        Ok((step_type, handler))
    }

    /// Handler for an already-resolved step type
    pub fn handler(&self, step_type: StepType) -> Arc<dyn StepHandler> {
        match self.handlers.get(&step_type) {
            Some(handler) => Arc::clone(handler),
            None => builtin_handler(step_type),
        }
    }

    /// Get the number of registered step types
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut step_types: Vec<&str> = self.handlers.keys().map(|t| t.as_str()).collect();
        step_types.sort_unstable();
        f.debug_struct("StepRegistry")
            .field("step_types", &step_types)
            .finish()
    }
}

fn builtin_handler(step_type: StepType) -> Arc<dyn StepHandler> {
    match step_type {
        StepType::Fetch => Arc::new(FetchHandler),
        StepType::Process => Arc::new(ProcessHandler),
        StepType::Infer => Arc::new(InferHandler),
        StepType::Notify => Arc::new(NotifyHandler),
    }
}

/// Builder for [`StepRegistry`]
///
/// # Example
///
/// ```ignore
/// let registry = StepRegistry::builder()
///     .with_handler(StepType::Process, FlakyProcess::default())
///     .build();
/// ```
pub struct StepRegistryBuilder {
    handlers: HashMap<StepType, Arc<dyn StepHandler>>,
}

impl StepRegistryBuilder {
    fn new() -> Self {
        let handlers = StepType::ALL
            .into_iter()
            .map(|step_type| (step_type, builtin_handler(step_type)))
            .collect();
        Self { handlers }
    }

    /// Replace the handler for one step type
    pub fn with_handler(mut self, step_type: StepType, handler: impl StepHandler) -> Self {
        self.handlers.insert(step_type, Arc::new(handler));
        self
    }

    /// Replace the handler for one step type with a shared instance
    pub fn with_shared_handler(
        mut self,
        step_type: StepType,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        self.handlers.insert(step_type, handler);
        self
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry {
            handlers: self.handlers,
        }
    }
}
