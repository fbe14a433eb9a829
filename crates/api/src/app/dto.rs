//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobward_core::{JobSpec, LeaseId, PRODUCER_VERSION, WorkerId};
use jobward_events::{JobState, JobStatus};

pub const STATUS_SCHEMA_ID: &str = "jobward.status_response";
pub const STATUS_SCHEMA_VERSION: &str = "v1";

/// Exactly one of `spec` and `spec_path` must be given.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub spec: Option<JobSpec>,
    #[serde(default)]
    pub spec_path: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub synchronous: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub checkpoint_id: String,
    pub reason: String,
    #[serde(default)]
    pub approved_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct LeaseView {
    pub worker_id: WorkerId,
    pub lease_id: LeaseId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub schema_id: &'static str,
    pub schema_version: &'static str,
    pub created_at: DateTime<Utc>,
    pub producer_version: &'static str,
    pub job_id: String,
    pub status: JobStatus,
    pub summary: String,
    pub reason_codes: Vec<String>,
    pub environment_fingerprint_hash: String,
    pub environment_fingerprint_rules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<LeaseView>,
}

impl StatusResponse {
    /// The lease is only shown while it is held and unexpired at `now`.
    pub fn from_state(state: &JobState, now: DateTime<Utc>) -> Self {
        Self {
            schema_id: STATUS_SCHEMA_ID,
            schema_version: STATUS_SCHEMA_VERSION,
            created_at: state.created_at,
            producer_version: PRODUCER_VERSION,
            job_id: state.job_id.to_string(),
            status: state.status,
            summary: state.summary.clone(),
            reason_codes: state.reason_codes.clone(),
            environment_fingerprint_hash: state.fingerprint.hash.clone(),
            environment_fingerprint_rules: state.fingerprint.rules.clone(),
            lease: state.active_lease(now).map(|lease| LeaseView {
                worker_id: lease.worker_id.clone(),
                lease_id: lease.lease_id,
                expires_at: lease.expires_at,
            }),
        }
    }
}
