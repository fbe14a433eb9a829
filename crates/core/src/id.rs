//! Strongly-typed identifiers used across the workspace.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Normalized, filesystem-safe job identifier (`[A-Za-z0-9._-]+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

/// Identity of a process (or thread) executing jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

/// Identifier of one granted lease.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(Uuid);

/// Checkpoint identifier derived from the sequence number of its event (`cp_<seq>`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CheckpointId(u64);

/// Reject any externally supplied path component that could escape the store root.
pub fn reject_traversal(field: &str, value: &str) -> Result<(), JobError> {
    if value.contains("..") {
        return Err(JobError::invalid_input(format!("{field} must not contain '..'"))
            .with_detail("field", field)
            .with_detail("value", value));
    }
    Ok(())
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl JobId {
    /// Validate an already-normalized identifier.
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(JobError::invalid_input("job id is required"));
        }
        reject_traversal("job_id", value)?;
        if !value.chars().all(is_id_char) {
            return Err(JobError::invalid_input("job id must match [A-Za-z0-9._-]+")
                .with_detail("job_id", value));
        }
        // `.` would name the jobs directory itself, and dotfiles are not jobs.
        if value.starts_with('.') {
            return Err(JobError::invalid_input("job id must not start with '.'")
                .with_detail("job_id", value));
        }
        Ok(Self(value.to_string()))
    }

    /// Turn a free-form name into a valid identifier.
    ///
    /// Lowercases, maps spaces and other disallowed characters to `_`, trims
    /// leading/trailing `_.-` and falls back to `job` when nothing is left.
    pub fn normalize(raw: &str) -> Result<Self, JobError> {
        let mapped: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if is_id_char(c) { c } else { '_' })
            .collect();
        let trimmed = mapped.trim_matches(|c| matches!(c, '_' | '.' | '-'));
        if trimmed.is_empty() {
            return Self::parse("job");
        }
        Self::parse(trimmed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl WorkerId {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, JobError> {
        let value = raw.as_ref().trim();
        if value.is_empty() {
            return Err(JobError::invalid_input("worker id is required"));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LeaseId {
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointId {
    pub fn from_seq(seq: u64) -> Self {
        Self(seq)
    }

    /// Sequence number of the checkpoint event in the job log.
    pub fn seq(&self) -> u64 {
        self.0
    }
}

macro_rules! impl_string_newtype {
    ($t:ty, $ctor:path) => {
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = JobError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $ctor(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = JobError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                $ctor(&value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(JobId, JobId::parse);
impl_string_newtype!(WorkerId, WorkerId::new);

impl core::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for LeaseId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s.trim())
            .map_err(|e| JobError::invalid_input(format!("lease id: {e}")))?;
        Ok(Self(uuid))
    }
}

impl core::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "cp_{}", self.0)
    }
}

impl FromStr for CheckpointId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            JobError::invalid_input("checkpoint id must look like cp_<seq>")
                .with_detail("checkpoint_id", s)
        };
        let digits = s.trim().strip_prefix("cp_").ok_or_else(invalid)?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.parse::<u64>().map(Self).map_err(|_| invalid())
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckpointId> for String {
    fn from(value: CheckpointId) -> Self {
        value.to_string()
    }
}
