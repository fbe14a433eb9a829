//! Job submission pipeline.
//!
//! ```text
//! spec file / JobSpec
//!   ↓
//! 1. Normalize + validate the job spec
//!   ↓
//! 2. Resolve the adapter (unknown adapters are rejected before anything is written)
//!   ↓
//! 3. Derive the job id and compute the environment fingerprint
//!   ↓
//! 4. Create the job log with the `submitted` event (fails if the id is taken)
//!   ↓
//! 5. Optionally advance synchronously
//! ```
//!
//! Submission never overwrites an existing job: a colliding id fails with
//! `AlreadyExists` and leaves the original log untouched.

use std::path::Path;

use tracing::info;

use jobward_core::{JobId, JobResult, JobSpec, PRODUCER_VERSION, WorkerId, reject_traversal};
use jobward_events::{JobEvent, JobStatus, Submitted};

use crate::event_store::EventStore;
use crate::fingerprint;
use crate::runner::Runner;

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller-chosen id. Normalized; derived from the job name when absent.
    pub job_id: Option<String>,
    /// Advance the job before returning.
    pub synchronous: bool,
    /// Worker used for a synchronous advance.
    pub worker_id: Option<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Clone)]
pub struct Dispatcher<S> {
    runner: Runner<S>,
}

impl<S> Dispatcher<S>
where
    S: EventStore + Clone,
{
    pub fn new(runner: Runner<S>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Runner<S> {
        &self.runner
    }

    /// Load a spec from disk (YAML, or JSON for `.json` files) and submit it.
    pub fn submit(&self, spec_path: &Path, opts: SubmitOptions) -> JobResult<SubmitResult> {
        reject_traversal("spec_path", &spec_path.to_string_lossy())?;
        let spec = JobSpec::load(spec_path)?;
        self.submit_spec(spec, opts)
    }

    pub fn submit_spec(&self, spec: JobSpec, opts: SubmitOptions) -> JobResult<SubmitResult> {
        let spec = spec.prepared()?;
        self.runner.adapters().get(&spec.adapter.name)?;

        let job_id = match opts.job_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                reject_traversal("job_id", raw)?;
                JobId::normalize(raw)?
            }
            _ => {
                let now = self.runner.clock().now();
                JobId::normalize(&format!("{}_{}", spec.name, now.timestamp()))?
            }
        };

        let fingerprint =
            fingerprint::compute(&spec.environment_fingerprint.rules, self.runner.facts())?;
        let submitted = JobEvent::Submitted(Submitted {
            job_id: job_id.clone(),
            spec,
            fingerprint,
            producer_version: PRODUCER_VERSION.to_string(),
        });
        self.runner
            .store()
            .create_job(&job_id, &submitted, self.runner.clock().now())?;
        info!(job_id = %job_id, synchronous = opts.synchronous, "job submitted");

        let state = if opts.synchronous {
            let worker = match opts.worker_id {
                Some(worker) => worker,
                None => WorkerId::new("jobward-submit")?,
            };
            self.runner.advance(&job_id, &worker)?
        } else {
            self.runner.recover(&job_id)?
        };

        Ok(SubmitResult {
            job_id,
            status: state.status,
        })
    }
}

impl<S> From<Runner<S>> for Dispatcher<S>
where
    S: EventStore + Clone,
{
    fn from(runner: Runner<S>) -> Self {
        Self::new(runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use jobward_core::{ErrorKind, ManualClock};

    use crate::event_store::InMemoryEventStore;

    fn dispatcher() -> Dispatcher<Arc<InMemoryEventStore>> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
        ));
        Dispatcher::new(Runner::new(Arc::new(InMemoryEventStore::new()), clock))
    }

    #[test]
    fn derived_job_id_uses_name_and_submission_time() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .submit_spec(JobSpec::example(), SubmitOptions::default())
            .unwrap();
        let expected = format!(
            "demo_refactor_job_{}",
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap().timestamp()
        );
        assert_eq!(result.job_id.as_str(), expected);
        assert_eq!(result.status, JobStatus::Pending);
    }

    #[test]
    fn supplied_job_id_is_normalized() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .submit_spec(
                JobSpec::example(),
                SubmitOptions {
                    job_id: Some("My Job!".to_string()),
                    ..SubmitOptions::default()
                },
            )
            .unwrap();
        assert_eq!(result.job_id.as_str(), "my_job");
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let dispatcher = dispatcher();
        let opts = SubmitOptions {
            job_id: Some("dup".to_string()),
            ..SubmitOptions::default()
        };
        dispatcher
            .submit_spec(JobSpec::example(), opts.clone())
            .unwrap();
        let err = dispatcher
            .submit_spec(JobSpec::example(), opts)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn traversal_in_job_id_is_rejected() {
        let dispatcher = dispatcher();
        let err = dispatcher
            .submit_spec(
                JobSpec::example(),
                SubmitOptions {
                    job_id: Some("../escape".to_string()),
                    ..SubmitOptions::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_adapter_writes_nothing() {
        let dispatcher = dispatcher();
        let mut spec = JobSpec::example();
        spec.adapter.name = "teleport".to_string();
        let err = dispatcher
            .submit_spec(
                spec,
                SubmitOptions {
                    job_id: Some("never".to_string()),
                    ..SubmitOptions::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(
            !dispatcher
                .runner()
                .store()
                .job_exists(&JobId::parse("never").unwrap())
        );
    }

    #[test]
    fn synchronous_submission_runs_until_blocked() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .submit_spec(
                JobSpec::example(),
                SubmitOptions {
                    synchronous: true,
                    ..SubmitOptions::default()
                },
            )
            .unwrap();
        assert_eq!(result.status, JobStatus::Blocked);
    }
}
