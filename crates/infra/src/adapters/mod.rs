//! Step adapters: the pluggable capability that actually performs a step.
//!
//! The runner never executes work itself. It hands each executed step to the
//! adapter named in the job spec and records the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use jobward_core::{JobError, JobId, JobResult, StepSpec};

pub mod noop;
pub mod shell;

pub use noop::NoopAdapter;
pub use shell::ShellAdapter;

/// Everything an adapter gets to see about one attempt.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub job_id: &'a JobId,
    pub step_index: usize,
    pub step: &'a StepSpec,
    /// 1-based attempt number.
    pub attempt: u32,
    pub config: &'a BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub tool_calls: u64,
    pub artifacts: Vec<String>,
    pub output: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("command exited with status {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid adapter config: {0}")]
    Config(String),

    #[error("{0}")]
    Failed(String),
}

pub trait StepAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, request: &StepRequest<'_>) -> Result<StepOutcome, AdapterError>;
}

/// Adapters addressable by the name used in job specs.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn StepAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// `noop` and `shell`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(NoopAdapter));
        registry.register(Arc::new(ShellAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn StepAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> JobResult<Arc<dyn StepAdapter>> {
        self.adapters.get(name).cloned().ok_or_else(|| {
            JobError::invalid_input(format!("unsupported adapter '{name}'"))
                .with_detail("adapter", name)
                .with_detail(
                    "supported",
                    self.adapters.keys().cloned().collect::<Vec<_>>(),
                )
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobward_core::ErrorKind;

    #[test]
    fn unknown_adapter_is_invalid_input() {
        let registry = AdapterRegistry::with_defaults();
        assert!(registry.get("noop").is_ok());
        assert!(registry.get("shell").is_ok());
        let err = registry.get("not-real").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
