//! Checkpoint vocabulary shared by job specifications and the event log.

use serde::{Deserialize, Serialize};

use crate::error::JobError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointType {
    Plan,
    Progress,
    DecisionNeeded,
    Blocked,
    Completed,
}

impl CheckpointType {
    pub const ALL: [CheckpointType; 5] = [
        CheckpointType::Plan,
        CheckpointType::Progress,
        CheckpointType::DecisionNeeded,
        CheckpointType::Blocked,
        CheckpointType::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointType::Plan => "plan",
            CheckpointType::Progress => "progress",
            CheckpointType::DecisionNeeded => "decision-needed",
            CheckpointType::Blocked => "blocked",
            CheckpointType::Completed => "completed",
        }
    }
}

impl core::fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CheckpointType {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckpointType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                JobError::invalid_input(format!("unknown checkpoint type '{s}'"))
                    .with_detail("checkpoint_type", s)
            })
    }
}

/// What a human must do before a blocked job can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub kind: String,
    pub instructions: String,
}

impl RequiredAction {
    pub fn approval(instructions: impl Into<String>) -> Self {
        Self {
            kind: "approval".to_string(),
            instructions: instructions.into(),
        }
    }
}
