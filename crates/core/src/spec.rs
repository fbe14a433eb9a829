//! Job specifications: the immutable workflow definition a job runs.
//!
//! Specs are authored as YAML (or JSON), loaded with [`JobSpec::load`], then
//! normalized and validated before the dispatcher snapshots them into the
//! job's first event.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::checkpoint::{CheckpointType, RequiredAction};
use crate::error::JobError;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("read job spec {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse job spec {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid job spec: {0}")]
    Invalid(String),
}

impl SpecError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<SpecError> for JobError {
    fn from(value: SpecError) -> Self {
        let err = JobError::invalid_input(value.to_string());
        match &value {
            SpecError::Read { path, .. } | SpecError::Parse { path, .. } => {
                err.with_detail("spec_path", path.display().to_string())
            }
            SpecError::Invalid(_) => err,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub objective: String,
    #[serde(default)]
    pub inputs: JobInputs,
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub budgets: Budgets,
    #[serde(default)]
    pub checkpoint_policy: CheckpointPolicy,
    #[serde(default)]
    pub environment_fingerprint: FingerprintRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInputs {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// One ordered unit of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Run through the adapter.
    #[serde(default)]
    pub executed: bool,
    /// Halt for human approval instead of executing.
    #[serde(default)]
    pub decision_needed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, JsonValue>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "noop".to_string(),
            config: BTreeMap::new(),
        }
    }
}

/// Execution limits. A limit of zero means "unlimited".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    pub max_wall_time_seconds: u64,
    /// Retries allowed per failing step.
    pub max_retries: u32,
    pub max_step_count: u64,
    pub max_tool_calls: u64,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_wall_time_seconds: 3600,
            max_retries: 2,
            max_step_count: 20,
            max_tool_calls: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPolicy {
    pub min_interval_seconds: u64,
    pub required_types: Vec<CheckpointType>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            min_interval_seconds: 10,
            required_types: vec![
                CheckpointType::Plan,
                CheckpointType::Progress,
                CheckpointType::Completed,
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRules {
    #[serde(default)]
    pub rules: Vec<String>,
}

/// Longest accepted `checkpoint_policy.min_interval_seconds` (one year).
pub const MAX_CHECKPOINT_INTERVAL_SECONDS: u64 = 365 * 24 * 60 * 60;

impl JobSpec {
    /// Read, parse, normalize and validate a spec file.
    ///
    /// `.json` files are parsed as JSON; anything else as YAML.
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let spec: JobSpec = if is_json {
            serde_json::from_str(&raw).map_err(|e| SpecError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|e| SpecError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };
        spec.prepared()
    }

    /// Normalize defaults, then validate.
    pub fn prepared(mut self) -> Result<Self, SpecError> {
        self.normalize();
        self.validate()?;
        Ok(self)
    }

    /// Fill in step defaults the author may omit.
    pub fn normalize(&mut self) {
        for (idx, step) in self.inputs.steps.iter_mut().enumerate() {
            if step.id.trim().is_empty() {
                step.id = format!("step_{}", idx + 1);
            }
            if step.summary.trim().is_empty() {
                step.summary = format!("step {}", step.id);
            }
            if step.decision_needed && step.required_action.is_none() {
                step.required_action = Some(RequiredAction::approval(format!(
                    "approve step {} to continue",
                    step.id
                )));
            }
        }
        self.checkpoint_policy.required_types.sort();
        self.checkpoint_policy.required_types.dedup();
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::invalid("name is required"));
        }
        if self.objective.trim().is_empty() {
            return Err(SpecError::invalid("objective is required"));
        }
        if self.adapter.name.trim().is_empty() {
            return Err(SpecError::invalid("adapter.name is required"));
        }
        if self.inputs.steps.is_empty() {
            return Err(SpecError::invalid("inputs.steps must contain at least one step"));
        }

        let mut seen = BTreeSet::new();
        for step in &self.inputs.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(SpecError::invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.executed && step.decision_needed {
                return Err(SpecError::invalid(format!(
                    "step '{}' cannot be both executed and decision_needed",
                    step.id
                )));
            }
        }

        let policy = &self.checkpoint_policy;
        if policy.min_interval_seconds > MAX_CHECKPOINT_INTERVAL_SECONDS {
            return Err(SpecError::invalid(format!(
                "checkpoint_policy.min_interval_seconds must be at most {MAX_CHECKPOINT_INTERVAL_SECONDS}"
            )));
        }
        // Blocked checkpoints only accompany a failure, so a healthy job could never satisfy them.
        if policy.required_types.contains(&CheckpointType::Blocked) {
            return Err(SpecError::invalid(
                "checkpoint_policy.required_types cannot include blocked",
            ));
        }

        let has_decision = self.inputs.steps.iter().any(|s| s.decision_needed);
        if self
            .checkpoint_policy
            .required_types
            .contains(&CheckpointType::DecisionNeeded)
            && !has_decision
        {
            return Err(SpecError::invalid(
                "checkpoint_policy requires decision-needed but no step is decision_needed",
            ));
        }

        Ok(())
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.inputs.steps
    }

    /// The three-step demo job: plan, a human review gate, finalize.
    pub fn example() -> Self {
        let step = |id: &str, summary: &str, executed: bool, decision_needed: bool| StepSpec {
            id: id.to_string(),
            summary: summary.to_string(),
            command: executed.then(|| "true".to_string()),
            executed,
            decision_needed,
            required_action: decision_needed
                .then(|| RequiredAction::approval("review the plan and approve to finalize")),
            artifacts: Vec::new(),
        };

        JobSpec {
            name: "demo_refactor_job".to_string(),
            objective: "plan, review, then finalize a refactor".to_string(),
            inputs: JobInputs {
                steps: vec![
                    step("plan", "draft the refactor plan", true, false),
                    step("review", "human review of the plan", false, true),
                    step("finalize", "apply and summarize the refactor", true, false),
                ],
            },
            expected_artifacts: vec!["reports/summary.md".to_string()],
            adapter: AdapterConfig::default(),
            budgets: Budgets::default(),
            checkpoint_policy: CheckpointPolicy {
                min_interval_seconds: 10,
                required_types: vec![
                    CheckpointType::Plan,
                    CheckpointType::Progress,
                    CheckpointType::DecisionNeeded,
                    CheckpointType::Completed,
                ],
            },
            environment_fingerprint: FingerprintRules::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
name: nightly build
objective: build and publish
inputs:
  steps:
    - summary: compile
      command: "true"
      executed: true
    - id: gate
      decision_needed: true
adapter:
  name: shell
budgets:
  max_wall_time_seconds: 100
  max_retries: 1
  max_step_count: 5
  max_tool_calls: 5
checkpoint_policy:
  min_interval_seconds: 0
  required_types: [progress, plan, plan]
"#;

    #[test]
    fn loads_yaml_and_fills_step_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let spec = JobSpec::load(file.path()).unwrap();
        assert_eq!(spec.steps().len(), 2);
        assert_eq!(spec.steps()[0].id, "step_1");
        assert_eq!(spec.steps()[1].summary, "step gate");
        assert_eq!(
            spec.steps()[1].required_action.as_ref().map(|a| a.kind.as_str()),
            Some("approval")
        );
        assert_eq!(
            spec.checkpoint_policy.required_types,
            vec![CheckpointType::Plan, CheckpointType::Progress]
        );
        assert_eq!(spec.budgets.max_retries, 1);
    }

    #[test]
    fn loads_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        let raw = serde_json::to_string(&JobSpec::example()).unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let spec = JobSpec::load(file.path()).unwrap();
        assert_eq!(spec, JobSpec::example().prepared().unwrap());
    }

    #[test]
    fn rejects_spec_without_steps() {
        let mut spec = JobSpec::example();
        spec.inputs.steps.clear();
        let err = spec.prepared().unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let mut spec = JobSpec::example();
        spec.inputs.steps[2].id = "plan".to_string();
        assert!(spec.prepared().is_err());
    }

    #[test]
    fn rejects_required_decision_without_decision_step() {
        let mut spec = JobSpec::example();
        spec.inputs.steps.retain(|s| !s.decision_needed);
        assert!(spec.prepared().is_err());
    }

    #[test]
    fn rejects_out_of_range_checkpoint_interval() {
        let mut spec = JobSpec::example();
        spec.checkpoint_policy.min_interval_seconds = u64::MAX;
        let err = spec.prepared().unwrap_err();
        assert!(err.to_string().contains("min_interval_seconds"));

        let mut spec = JobSpec::example();
        spec.checkpoint_policy.min_interval_seconds = MAX_CHECKPOINT_INTERVAL_SECONDS;
        assert!(spec.prepared().is_ok());
    }

    #[test]
    fn rejects_blocked_as_a_required_checkpoint() {
        let mut spec = JobSpec::example();
        spec.checkpoint_policy.required_types.push(CheckpointType::Blocked);
        let err = spec.prepared().unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn missing_file_is_invalid_input() {
        let err: JobError = JobSpec::load(Path::new("/definitely/not/here.yaml"))
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
        assert!(err.details().contains_key("spec_path"));
    }
}
