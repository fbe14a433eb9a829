use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use jobward_core::{
    CheckpointId, CheckpointType, JobError, JobId, JobResult, JobSpec, LeaseId, RequiredAction,
    WorkerId,
};

/// One fact in a job's log.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **append-only**, ordered by the store-assigned sequence number
/// - persisted as `{type, payload}` inside an [`EventRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted(Submitted),
    StepStarted(StepStarted),
    StepCompleted(StepCompleted),
    StepFailed(StepFailed),
    Checkpoint(CheckpointEmitted),
    Approved(ApprovalRecord),
    LeaseAcquired(LeaseRecord),
    LeaseRenewed(LeaseRecord),
    LeaseReleased(LeaseReleased),
    BudgetExceeded(BudgetExceeded),
    JobFailed(JobFailed),
    EnvironmentDrift(EnvironmentDrift),
    Cancelled(Cancelled),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submitted {
    pub job_id: JobId,
    pub spec: JobSpec,
    pub fingerprint: EnvironmentFingerprint,
    pub producer_version: String,
}

/// Hash over named environment facts, plus the facts themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub hash: String,
    pub rules: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStarted {
    pub step_index: usize,
    pub step_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompleted {
    pub step_index: usize,
    pub step_id: String,
    pub attempts: u32,
    pub tool_calls: u64,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailed {
    pub step_index: usize,
    pub step_id: String,
    pub attempt: u32,
    pub error: String,
    /// Tool calls spent by the failed attempt.
    #[serde(default)]
    pub tool_calls: u64,
}

/// Resource consumption at a point in the job's life.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub wall_time_seconds: u64,
    pub retries: u64,
    pub steps: u64,
    pub tool_calls: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEmitted {
    pub checkpoint_type: CheckpointType,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub reason_codes: Vec<String>,
    #[serde(default)]
    pub budget: BudgetUsage,
}

/// Evidence that a decision-needed checkpoint was cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub job_id: JobId,
    pub checkpoint_id: CheckpointId,
    pub reason: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

/// Exclusive execution right over one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub worker_id: WorkerId,
    pub lease_id: LeaseId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

impl LeaseRecord {
    /// Staleness is judged by expiry alone.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseReleased {
    pub worker_id: WorkerId,
    pub lease_id: LeaseId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetExceeded {
    pub violations: Vec<String>,
    pub usage: BudgetUsage,
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub error: String,
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDrift {
    pub expected_hash: String,
    pub actual_hash: String,
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancelled {
    pub reason: String,
    pub reason_codes: Vec<String>,
}

impl JobEvent {
    /// Stable type tag persisted in the log.
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Submitted(_) => "submitted",
            JobEvent::StepStarted(_) => "step_started",
            JobEvent::StepCompleted(_) => "step_completed",
            JobEvent::StepFailed(_) => "step_failed",
            JobEvent::Checkpoint(_) => "checkpoint",
            JobEvent::Approved(_) => "approved",
            JobEvent::LeaseAcquired(_) => "lease_acquired",
            JobEvent::LeaseRenewed(_) => "lease_renewed",
            JobEvent::LeaseReleased(_) => "lease_released",
            JobEvent::BudgetExceeded(_) => "budget_exceeded",
            JobEvent::JobFailed(_) => "job_failed",
            JobEvent::EnvironmentDrift(_) => "environment_drift",
            JobEvent::Cancelled(_) => "cancelled",
        }
    }

    /// Split into the `(type, payload)` pair stored in a record.
    pub fn to_parts(&self) -> JobResult<(String, JsonValue)> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| JobError::invalid_input(format!("event serialization failed: {e}")))?;
        let payload = value
            .get_mut("payload")
            .map(JsonValue::take)
            .unwrap_or(JsonValue::Null);
        Ok((self.event_type().to_string(), payload))
    }

    /// Decode a typed event from a stored `(type, payload)` pair.
    ///
    /// Unknown types and malformed payloads are log corruption.
    pub fn from_parts(event_type: &str, payload: &JsonValue) -> JobResult<Self> {
        serde_json::from_value(json!({ "type": event_type, "payload": payload })).map_err(|e| {
            JobError::corrupt_log(format!("undecodable {event_type} event: {e}"))
                .with_detail("event_type", event_type)
        })
    }
}

/// A persisted event: one line of a job's `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Gap-free position in the job log, starting at 0.
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: JsonValue,
}

impl EventRecord {
    pub fn new(seq: u64, timestamp: DateTime<Utc>, event: &JobEvent) -> JobResult<Self> {
        let (event_type, payload) = event.to_parts()?;
        Ok(Self {
            seq,
            event_type,
            timestamp,
            payload,
        })
    }

    pub fn decode(&self) -> JobResult<JobEvent> {
        JobEvent::from_parts(&self.event_type, &self.payload)
            .map_err(|e| e.with_detail("seq", self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_type_tag_and_bare_payload() {
        let event = JobEvent::Cancelled(Cancelled {
            reason: "operator request".to_string(),
            reason_codes: vec![],
        });
        let record = EventRecord::new(4, Utc::now(), &event).unwrap();

        assert_eq!(record.event_type, "cancelled");
        assert_eq!(record.payload["reason"], "operator request");
        let line = serde_json::to_value(&record).unwrap();
        assert_eq!(line["type"], "cancelled");
        assert_eq!(line["seq"], 4);
        assert_eq!(record.decode().unwrap(), event);
    }

    #[test]
    fn unknown_event_type_is_corruption() {
        let err = JobEvent::from_parts("teleported", &json!({})).unwrap_err();
        assert_eq!(err.kind(), jobward_core::ErrorKind::CorruptLog);
    }

    #[test]
    fn malformed_payload_is_corruption() {
        let err = JobEvent::from_parts("step_started", &json!({"step_index": "x"})).unwrap_err();
        assert_eq!(err.kind(), jobward_core::ErrorKind::CorruptLog);
    }

    #[test]
    fn lease_expiry_is_inclusive() {
        let now = Utc::now();
        let lease = LeaseRecord {
            worker_id: WorkerId::new("w1").unwrap(),
            lease_id: LeaseId::new(),
            acquired_at: now,
            expires_at: now,
            released_at: None,
        };
        assert!(lease.is_expired(now));
        assert!(!lease.is_active(now));
    }
}
