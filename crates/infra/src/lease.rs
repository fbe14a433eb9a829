//! Single-writer execution rights, stored in the job log.
//!
//! A lease is a durable record, not an in-memory lock: the same job can be
//! resumed by another process after a crash. Staleness is judged purely by
//! comparing `expires_at` against the caller's clock; there is no heartbeat.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use jobward_core::{Clock, ExpectedVersion, JobError, JobId, JobResult, LeaseId, WorkerId};
use jobward_events::{JobEvent, JobState, LeaseRecord, LeaseReleased, project};

use crate::event_store::EventStore;

/// Conditional appends retried this many times before a conflict is surfaced.
pub(crate) const MAX_APPEND_CONFLICTS: usize = 16;

#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub lease_ttl: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::seconds(30),
        }
    }
}

#[derive(Clone)]
pub struct LeaseManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S> LeaseManager<S>
where
    S: EventStore,
{
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn current(&self, job_id: &JobId) -> JobResult<JobState> {
        project(job_id, self.store.read_events(job_id)?)
    }

    /// Append a lease event conditionally on the state it was decided from.
    ///
    /// `decide` returns `Ok(None)` when nothing needs to be written.
    fn commit<F>(&self, job_id: &JobId, mut decide: F) -> JobResult<Option<LeaseRecord>>
    where
        F: FnMut(&JobState) -> JobResult<Option<(JobEvent, LeaseRecord)>>,
    {
        let mut conflicts = 0;
        loop {
            let state = self.current(job_id)?;
            let Some((event, lease)) = decide(&state)? else {
                return Ok(None);
            };
            let now = self.clock.now();
            match self
                .store
                .append(job_id, &event, now, ExpectedVersion::Exact(state.version))
            {
                Ok(_) => {
                    self.store.write_lease(job_id, &lease)?;
                    return Ok(Some(lease));
                }
                Err(e) if e.is_version_conflict() && conflicts < MAX_APPEND_CONFLICTS => {
                    conflicts += 1;
                    debug!(job_id = %job_id, conflicts, "lease append lost a race; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the execution right for `worker_id`.
    ///
    /// Fails `LeaseHeld` while another worker's lease is unexpired. Otherwise a
    /// fresh lease id is issued, including when the same worker re-acquires.
    pub fn acquire(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        ttl: Duration,
    ) -> JobResult<LeaseRecord> {
        let lease = self.commit(job_id, |state| {
            let now = self.clock.now();
            if let Some(held) = state.active_lease(now) {
                if held.worker_id != *worker_id {
                    return Err(JobError::lease_held(format!(
                        "job {job_id} is leased by {} until {}",
                        held.worker_id, held.expires_at
                    ))
                    .with_detail("job_id", job_id.to_string())
                    .with_detail("worker_id", held.worker_id.to_string())
                    .with_detail("expires_at", held.expires_at.to_rfc3339()));
                }
            }
            let lease = LeaseRecord {
                worker_id: worker_id.clone(),
                lease_id: LeaseId::new(),
                acquired_at: now,
                expires_at: now + ttl,
                released_at: None,
            };
            Ok(Some((JobEvent::LeaseAcquired(lease.clone()), lease)))
        })?;

        let lease = lease.ok_or_else(|| JobError::io_failure("lease was not recorded"))?;
        info!(
            job_id = %job_id,
            worker_id = %lease.worker_id,
            lease_id = %lease.lease_id,
            expires_at = %lease.expires_at,
            "lease acquired"
        );
        Ok(lease)
    }

    /// Extend the current lease. Fails `LeaseMismatch` unless `lease_id` is the
    /// job's current, unexpired lease.
    pub fn renew(&self, job_id: &JobId, lease_id: LeaseId, ttl: Duration) -> JobResult<LeaseRecord> {
        let lease = self.commit(job_id, |state| {
            let now = self.clock.now();
            let Some(held) = state.active_lease(now).filter(|l| l.lease_id == lease_id) else {
                return Err(JobError::lease_mismatch(format!(
                    "lease {lease_id} is not the current lease for job {job_id}"
                ))
                .with_detail("job_id", job_id.to_string())
                .with_detail("lease_id", lease_id.to_string()));
            };
            let renewed = LeaseRecord {
                expires_at: now + ttl,
                ..held.clone()
            };
            Ok(Some((JobEvent::LeaseRenewed(renewed.clone()), renewed)))
        })?;

        let lease = lease.ok_or_else(|| JobError::io_failure("lease renewal was not recorded"))?;
        debug!(job_id = %job_id, lease_id = %lease_id, expires_at = %lease.expires_at, "lease renewed");
        Ok(lease)
    }

    /// Mark the lease inactive. Releasing a lease that is not current is a no-op.
    pub fn release(&self, job_id: &JobId, lease_id: LeaseId) -> JobResult<()> {
        let released = self.commit(job_id, |state| {
            let Some(held) = state
                .lease
                .as_ref()
                .filter(|l| l.lease_id == lease_id && l.released_at.is_none())
            else {
                return Ok(None);
            };
            let event = JobEvent::LeaseReleased(LeaseReleased {
                worker_id: held.worker_id.clone(),
                lease_id,
            });
            let record = LeaseRecord {
                released_at: Some(self.clock.now()),
                ..held.clone()
            };
            Ok(Some((event, record)))
        })?;

        if released.is_some() {
            info!(job_id = %job_id, lease_id = %lease_id, "lease released");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobward_core::{ErrorKind, JobSpec, ManualClock};
    use jobward_events::{EnvironmentFingerprint, Submitted};

    use crate::event_store::InMemoryEventStore;

    fn setup() -> (Arc<InMemoryEventStore>, Arc<ManualClock>, LeaseManager<Arc<InMemoryEventStore>>, JobId) {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));
        let job_id = JobId::parse("leased_job").unwrap();
        store
            .create_job(
                &job_id,
                &JobEvent::Submitted(Submitted {
                    job_id: job_id.clone(),
                    spec: JobSpec::example(),
                    fingerprint: EnvironmentFingerprint::default(),
                    producer_version: "test".to_string(),
                }),
                clock.now(),
            )
            .unwrap();
        let manager = LeaseManager::new(store.clone(), clock.clone());
        (store, clock, manager, job_id)
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::new(name).unwrap()
    }

    #[test]
    fn second_worker_is_refused_until_expiry() {
        let (_store, clock, leases, job) = setup();
        let ttl = Duration::seconds(30);

        let a = leases.acquire(&job, &worker("a"), ttl).unwrap();
        let err = leases.acquire(&job, &worker("b"), ttl).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LeaseHeld);

        clock.advance(Duration::seconds(30));
        let b = leases.acquire(&job, &worker("b"), ttl).unwrap();
        assert_ne!(a.lease_id, b.lease_id);

        let err = leases.renew(&job, a.lease_id, ttl).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LeaseMismatch);
    }

    #[test]
    fn renew_extends_expiry_of_current_lease() {
        let (store, clock, leases, job) = setup();
        let ttl = Duration::seconds(30);
        let lease = leases.acquire(&job, &worker("a"), ttl).unwrap();

        clock.advance(Duration::seconds(20));
        let renewed = leases.renew(&job, lease.lease_id, ttl).unwrap();
        assert_eq!(renewed.lease_id, lease.lease_id);
        assert_eq!(renewed.expires_at, clock.now() + ttl);
        assert_eq!(store.lease(&job), Some(renewed));
    }

    #[test]
    fn expired_lease_cannot_be_renewed() {
        let (_store, clock, leases, job) = setup();
        let lease = leases.acquire(&job, &worker("a"), Duration::seconds(5)).unwrap();
        clock.advance(Duration::seconds(5));
        let err = leases.renew(&job, lease.lease_id, Duration::seconds(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LeaseMismatch);
    }

    #[test]
    fn release_is_idempotent_and_frees_the_job() {
        let (_store, _clock, leases, job) = setup();
        let ttl = Duration::seconds(30);
        let lease = leases.acquire(&job, &worker("a"), ttl).unwrap();

        leases.release(&job, lease.lease_id).unwrap();
        leases.release(&job, lease.lease_id).unwrap();
        leases.release(&job, LeaseId::new()).unwrap();

        leases.acquire(&job, &worker("b"), ttl).unwrap();
    }

    #[test]
    fn same_worker_gets_a_fresh_lease() {
        let (_store, _clock, leases, job) = setup();
        let ttl = Duration::seconds(30);
        let first = leases.acquire(&job, &worker("a"), ttl).unwrap();
        let second = leases.acquire(&job, &worker("a"), ttl).unwrap();
        assert_ne!(first.lease_id, second.lease_id);
        assert_eq!(
            leases.renew(&job, first.lease_id, ttl).unwrap_err().kind(),
            ErrorKind::LeaseMismatch
        );
    }
}
