//! Optimistic concurrency for conditional appends.

use crate::error::{JobError, JobResult};

/// Expected length of a job's event log at the moment of an append.
///
/// A job log with `n` events has version `n`; the next event receives
/// sequence number `n`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (plain append).
    Any,
    /// Require the log to hold exactly this many events.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> JobResult<()> {
        match self {
            ExpectedVersion::Exact(expected) if expected != actual => {
                Err(JobError::version_conflict(expected, actual))
            }
            _ => Ok(()),
        }
    }
}
