//! Derived job state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobward_core::{CheckpointId, CheckpointType, JobId, JobSpec, RequiredAction};

use crate::event::{ApprovalRecord, BudgetUsage, EnvironmentFingerprint, LeaseRecord};

/// Job lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, no step started yet
    Pending,
    /// Steps are being executed
    Running,
    /// Halted on a decision-needed checkpoint awaiting approval
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Blocked => "blocked",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkpoint surfaced to clients, with its approval state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: CheckpointId,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub checkpoint_type: CheckpointType,
    pub summary: String,
    /// Job status right after the checkpoint was recorded.
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    pub artifacts: Vec<String>,
    pub reason_codes: Vec<String>,
    pub budget: BudgetUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
}

impl CheckpointRecord {
    pub fn is_decision(&self) -> bool {
        self.checkpoint_type == CheckpointType::DecisionNeeded
    }

    pub fn is_approved(&self) -> bool {
        self.approval.is_some()
    }
}

/// State derived by replaying a job log from sequence 0. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub status: JobStatus,
    pub summary: String,
    pub reason_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub spec: JobSpec,
    pub fingerprint: EnvironmentFingerprint,
    /// Most recent lease observed in the log (possibly released or expired).
    pub lease: Option<LeaseRecord>,
    /// Index of the next step to run.
    pub next_step_index: usize,
    pub step_in_flight: Option<usize>,
    pub steps_started: u64,
    pub steps_completed: u64,
    /// Failed step attempts across the whole job.
    pub retries: u64,
    /// Failed attempts of the step currently in flight.
    pub step_failures: u32,
    pub tool_calls: u64,
    pub checkpoints: Vec<CheckpointRecord>,
    /// Steps completed since the last plan/progress checkpoint.
    pub unreported_steps: Vec<String>,
    pub unreported_artifacts: Vec<String>,
    /// Latest drifted fingerprint hash recorded for this job.
    pub drift_hash: Option<String>,
    pub pending_decision: Option<CheckpointId>,
    /// Number of events applied; the next append receives this sequence number.
    pub version: u64,
}

impl JobState {
    pub fn checkpoint(&self, id: CheckpointId) -> Option<&CheckpointRecord> {
        self.checkpoints.iter().find(|c| c.checkpoint_id == id)
    }

    pub fn has_emitted(&self, checkpoint_type: CheckpointType) -> bool {
        self.checkpoints
            .iter()
            .any(|c| c.checkpoint_type == checkpoint_type)
    }

    /// Time of the most recent checkpoint of any of the given types.
    pub fn last_checkpoint_at(&self, types: &[CheckpointType]) -> Option<DateTime<Utc>> {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| types.contains(&c.checkpoint_type))
            .map(|c| c.created_at)
    }

    /// The lease, if one is held and unexpired at `now`.
    pub fn active_lease(&self, now: DateTime<Utc>) -> Option<&LeaseRecord> {
        self.lease.as_ref().filter(|l| l.is_active(now))
    }

    pub fn usage(&self, now: DateTime<Utc>) -> BudgetUsage {
        let elapsed = (now - self.created_at).num_seconds().max(0);
        BudgetUsage {
            wall_time_seconds: elapsed as u64,
            retries: self.retries,
            steps: self.steps_started,
            tool_calls: self.tool_calls,
        }
    }

    pub fn all_steps_done(&self) -> bool {
        self.step_in_flight.is_none() && self.next_step_index >= self.spec.steps().len()
    }
}
