//! Job error model.
//!
//! Every fallible operation in the workspace reports a [`JobError`]: a stable
//! [`ErrorKind`] that callers branch on, a human-readable message, and
//! key/value details for logs and transport-level error bodies.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result type used across the workspace.
pub type JobResult<T> = Result<T, JobError>;

/// Failure category, independent of any transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input (e.g. an empty approval reason).
    InvalidInput,
    /// Operation not valid for the job's current projected state.
    InvalidState,
    /// Unknown job or checkpoint.
    NotFound,
    /// Job id already taken.
    AlreadyExists,
    /// Another worker holds an unexpired lease.
    LeaseHeld,
    /// Supplied lease id is not the current unexpired lease.
    LeaseMismatch,
    /// Event log could not be parsed or is not gap-free.
    CorruptLog,
    /// A durable read or write did not complete.
    IoFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::LeaseHeld => "lease_held",
            ErrorKind::LeaseMismatch => "lease_mismatch",
            ErrorKind::CorruptLog => "corrupt_log",
            ErrorKind::IoFailure => "io_failure",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carrying a kind, a message and contextual details.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct JobError {
    kind: ErrorKind,
    message: String,
    details: BTreeMap<String, JsonValue>,
}

const VERSION_CONFLICT: &str = "version_conflict";

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, msg)
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, msg)
    }

    pub fn lease_held(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LeaseHeld, msg)
    }

    pub fn lease_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::LeaseMismatch, msg)
    }

    pub fn corrupt_log(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CorruptLog, msg)
    }

    pub fn io_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoFailure, msg)
    }

    /// A conditional append lost against a concurrent writer.
    pub fn version_conflict(expected: u64, actual: u64) -> Self {
        Self::invalid_state(format!(
            "optimistic concurrency check failed (expected: {expected}, actual: {actual})"
        ))
        .with_detail("reason", VERSION_CONFLICT)
        .with_detail("expected_version", expected)
        .with_detail("actual_version", actual)
    }

    /// Attach a key/value detail (builder style).
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &BTreeMap<String, JsonValue> {
        &self.details
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind == ErrorKind::InvalidState
            && self.details.get("reason").and_then(JsonValue::as_str) == Some(VERSION_CONFLICT)
    }
}

impl From<std::io::Error> for JobError {
    fn from(value: std::io::Error) -> Self {
        JobError::io_failure(value.to_string()).with_detail("io_kind", format!("{:?}", value.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_attached_in_key_order() {
        let err = JobError::not_found("job not found")
            .with_detail("job_id", "demo")
            .with_detail("checkpoint_id", "cp_3");

        assert_eq!(err.kind(), ErrorKind::NotFound);
        let keys: Vec<_> = err.details().keys().cloned().collect();
        assert_eq!(keys, vec!["checkpoint_id", "job_id"]);
        assert_eq!(err.to_string(), "not_found: job not found");
    }

    #[test]
    fn version_conflict_is_recognizable() {
        let err = JobError::version_conflict(3, 4);
        assert!(err.is_version_conflict());
        assert!(!JobError::invalid_state("already approved").is_version_conflict());
    }

    #[test]
    fn io_errors_map_to_io_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: JobError = io.into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
