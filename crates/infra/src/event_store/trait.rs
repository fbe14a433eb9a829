use std::sync::Arc;

use chrono::{DateTime, Utc};

use jobward_core::{ExpectedVersion, JobId, JobResult};
use jobward_events::{EventRecord, JobEvent, LeaseRecord};

/// Lazy, ordered, finite stream of a job's records, rooted at sequence 0.
///
/// Calling [`EventStore::read_events`] again restarts from the beginning.
pub type EventStream = Box<dyn Iterator<Item = JobResult<EventRecord>> + Send>;

/// Append-only, job-scoped event store.
///
/// The store is the **persistence layer** for job logs: one stream per job,
/// gap-free sequence numbers starting at 0, no updates or deletes.
///
/// ## Append Semantics
///
/// `append()`:
/// - Checks optimistic concurrency (`ExpectedVersion::Exact(n)` requires the log to
///   hold exactly `n` events; a mismatch is a version conflict)
/// - Assigns the next sequence number
/// - Persists the record atomically: readers see the old log or the new one, never
///   a partial record
///
/// ## Read Semantics
///
/// `read_events()`:
/// - Fails `NotFound` for unknown jobs
/// - Yields `CorruptLog` for unparseable records or broken sequencing, and stops
pub trait EventStore: Send + Sync {
    /// Exclusively create the job's record with its initiating event at sequence 0.
    ///
    /// Fails `AlreadyExists` if the job id is taken; the existing log is untouched.
    fn create_job(
        &self,
        job_id: &JobId,
        initial: &JobEvent,
        timestamp: DateTime<Utc>,
    ) -> JobResult<EventRecord>;

    /// Append one event, assigning the next sequence number.
    fn append(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        timestamp: DateTime<Utc>,
        expected_version: ExpectedVersion,
    ) -> JobResult<EventRecord>;

    fn read_events(&self, job_id: &JobId) -> JobResult<EventStream>;

    fn job_exists(&self, job_id: &JobId) -> bool;

    /// Materialize the latest lease record next to the log for inspection.
    ///
    /// The log stays authoritative; stores without a filesystem view may ignore this.
    fn write_lease(&self, _job_id: &JobId, _lease: &LeaseRecord) -> JobResult<()> {
        Ok(())
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn create_job(
        &self,
        job_id: &JobId,
        initial: &JobEvent,
        timestamp: DateTime<Utc>,
    ) -> JobResult<EventRecord> {
        (**self).create_job(job_id, initial, timestamp)
    }

    fn append(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        timestamp: DateTime<Utc>,
        expected_version: ExpectedVersion,
    ) -> JobResult<EventRecord> {
        (**self).append(job_id, event, timestamp, expected_version)
    }

    fn read_events(&self, job_id: &JobId) -> JobResult<EventStream> {
        (**self).read_events(job_id)
    }

    fn job_exists(&self, job_id: &JobId) -> bool {
        (**self).job_exists(job_id)
    }

    fn write_lease(&self, job_id: &JobId, lease: &LeaseRecord) -> JobResult<()> {
        (**self).write_lease(job_id, lease)
    }
}

pub(crate) fn unknown_job(job_id: &JobId) -> jobward_core::JobError {
    jobward_core::JobError::not_found(format!("job {job_id} not found"))
        .with_detail("job_id", job_id.to_string())
}
