use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use jobward_core::{ExpectedVersion, JobError, JobId, JobResult};
use jobward_events::{EventRecord, JobEvent, LeaseRecord};

use super::r#trait::{EventStore, EventStream, unknown_job};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<JobId, Vec<EventRecord>>>,
    leases: RwLock<HashMap<JobId, LeaseRecord>>,
}

fn poisoned() -> JobError {
    JobError::io_failure("lock poisoned")
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last lease handed to [`EventStore::write_lease`].
    pub fn lease(&self, job_id: &JobId) -> Option<LeaseRecord> {
        self.leases.read().ok()?.get(job_id).cloned()
    }
}

impl EventStore for InMemoryEventStore {
    fn create_job(
        &self,
        job_id: &JobId,
        initial: &JobEvent,
        timestamp: DateTime<Utc>,
    ) -> JobResult<EventRecord> {
        let record = EventRecord::new(0, timestamp, initial)?;
        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        if streams.contains_key(job_id) {
            return Err(JobError::already_exists(format!("job {job_id} already exists"))
                .with_detail("job_id", job_id.to_string()));
        }
        streams.insert(job_id.clone(), vec![record.clone()]);
        Ok(record)
    }

    fn append(
        &self,
        job_id: &JobId,
        event: &JobEvent,
        timestamp: DateTime<Utc>,
        expected_version: ExpectedVersion,
    ) -> JobResult<EventRecord> {
        let mut streams = self.streams.write().map_err(|_| poisoned())?;
        let stream = streams.get_mut(job_id).ok_or_else(|| unknown_job(job_id))?;

        let current = stream.len() as u64;
        expected_version.check(current)?;

        let record = EventRecord::new(current, timestamp, event)?;
        stream.push(record.clone());
        Ok(record)
    }

    fn read_events(&self, job_id: &JobId) -> JobResult<EventStream> {
        let streams = self.streams.read().map_err(|_| poisoned())?;
        let records = streams.get(job_id).cloned().ok_or_else(|| unknown_job(job_id))?;
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn job_exists(&self, job_id: &JobId) -> bool {
        self.streams
            .read()
            .map(|s| s.contains_key(job_id))
            .unwrap_or(false)
    }

    fn write_lease(&self, job_id: &JobId, lease: &LeaseRecord) -> JobResult<()> {
        let mut leases = self.leases.write().map_err(|_| poisoned())?;
        leases.insert(job_id.clone(), lease.clone());
        Ok(())
    }
}
