//! Status projector: ordered job log in, [`JobState`] out.
//!
//! Pure and deterministic. Every record must be explainable by the lifecycle
//! table below; anything else is reported as `CorruptLog`.
//!
//! ```text
//! (none)    --submitted-------------------> Pending
//! Pending   --step_started----------------> Running
//! Running   --checkpoint(decision-needed)-> Blocked
//! Blocked   --approved--------------------> Running
//! Running   --checkpoint(completed)-------> Completed
//! Pending/Running --budget_exceeded|job_failed--> Failed
//! non-terminal    --cancelled-------------------> Cancelled
//! ```

use jobward_core::{CheckpointId, CheckpointType, JobError, JobId, JobResult};

use crate::event::JobEvent;
use crate::replay::ProjectionRunner;
use crate::state::{CheckpointRecord, JobState, JobStatus};
use crate::{EventRecord, Projection};

/// Builds a [`JobState`] for one job.
#[derive(Debug)]
pub struct StatusProjector {
    job_id: JobId,
    state: Option<JobState>,
}

impl StatusProjector {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: None,
        }
    }

    pub fn state(&self) -> Option<&JobState> {
        self.state.as_ref()
    }

    /// Finish replay. An empty log has no state and counts as corruption.
    pub fn into_state(self) -> JobResult<JobState> {
        self.state.ok_or_else(|| {
            JobError::corrupt_log("event log is empty")
                .with_detail("job_id", self.job_id.to_string())
        })
    }
}

/// Replay a job log from sequence 0.
pub fn project(
    job_id: &JobId,
    records: impl IntoIterator<Item = JobResult<EventRecord>>,
) -> JobResult<JobState> {
    let (projector, _) =
        ProjectionRunner::rebuild_from_scratch(|| StatusProjector::new(job_id.clone()), records)?;
    projector.into_state()
}

fn corrupt(record: &EventRecord, msg: impl Into<String>) -> JobError {
    JobError::corrupt_log(msg)
        .with_detail("seq", record.seq)
        .with_detail("event_type", record.event_type.clone())
}

fn out_of_order(record: &EventRecord, status: JobStatus) -> JobError {
    corrupt(
        record,
        format!("{} event is not valid while job is {status}", record.event_type),
    )
}

fn require(record: &EventRecord, status: JobStatus, allowed: &[JobStatus]) -> JobResult<()> {
    if allowed.contains(&status) {
        Ok(())
    } else {
        Err(out_of_order(record, status))
    }
}

const ACTIVE: &[JobStatus] = &[JobStatus::Pending, JobStatus::Running];

impl Projection for StatusProjector {
    fn apply(&mut self, record: &EventRecord) -> JobResult<()> {
        let event = record.decode()?;

        let Some(state) = self.state.as_mut() else {
            let JobEvent::Submitted(submitted) = event else {
                return Err(corrupt(record, "log must start with a submitted event"));
            };
            if submitted.job_id != self.job_id {
                return Err(corrupt(record, "submitted event belongs to another job")
                    .with_detail("found_job_id", submitted.job_id.to_string()));
            }
            self.state = Some(JobState {
                job_id: submitted.job_id,
                status: JobStatus::Pending,
                summary: format!("submitted: {}", submitted.spec.objective),
                reason_codes: Vec::new(),
                created_at: record.timestamp,
                updated_at: record.timestamp,
                spec: submitted.spec,
                fingerprint: submitted.fingerprint,
                lease: None,
                next_step_index: 0,
                step_in_flight: None,
                steps_started: 0,
                steps_completed: 0,
                retries: 0,
                step_failures: 0,
                tool_calls: 0,
                checkpoints: Vec::new(),
                unreported_steps: Vec::new(),
                unreported_artifacts: Vec::new(),
                drift_hash: None,
                pending_decision: None,
                version: 1,
            });
            return Ok(());
        };

        apply_event(state, record, event)?;
        state.version += 1;
        state.updated_at = record.timestamp;
        Ok(())
    }
}

fn apply_event(state: &mut JobState, record: &EventRecord, event: JobEvent) -> JobResult<()> {
    match event {
        JobEvent::Submitted(_) => Err(corrupt(record, "duplicate submitted event")),

        JobEvent::StepStarted(e) => {
            require(record, state.status, ACTIVE)?;
            if state.step_in_flight.is_some()
                || e.step_index != state.next_step_index
                || e.step_index >= state.spec.steps().len()
            {
                return Err(corrupt(
                    record,
                    format!("step {} started out of order", e.step_index),
                ));
            }
            state.status = JobStatus::Running;
            state.step_in_flight = Some(e.step_index);
            state.step_failures = 0;
            state.steps_started += 1;
            state.summary = format!("running step {}", e.step_id);
            Ok(())
        }

        JobEvent::StepFailed(e) => {
            require(record, state.status, &[JobStatus::Running])?;
            if state.step_in_flight != Some(e.step_index) {
                return Err(corrupt(record, "failure reported for a step that is not running"));
            }
            state.retries += 1;
            state.step_failures += 1;
            state.tool_calls += e.tool_calls;
            state.summary = format!(
                "step {} attempt {} failed: {}",
                e.step_id, e.attempt, e.error
            );
            Ok(())
        }

        JobEvent::StepCompleted(e) => {
            require(record, state.status, &[JobStatus::Running])?;
            if state.step_in_flight != Some(e.step_index) {
                return Err(corrupt(record, "completion reported for a step that is not running"));
            }
            state.step_in_flight = None;
            state.next_step_index = e.step_index + 1;
            state.steps_completed += 1;
            state.tool_calls += e.tool_calls;
            state.unreported_steps.push(e.step_id.clone());
            state.unreported_artifacts.extend(e.artifacts);
            state.summary = format!("completed step {}", e.step_id);
            Ok(())
        }

        JobEvent::Checkpoint(cp) => {
            match cp.checkpoint_type {
                CheckpointType::Plan | CheckpointType::Progress => {
                    require(record, state.status, ACTIVE)?;
                    state.unreported_steps.clear();
                    state.unreported_artifacts.clear();
                }
                CheckpointType::Blocked => {
                    require(record, state.status, ACTIVE)?;
                }
                CheckpointType::DecisionNeeded => {
                    require(record, state.status, &[JobStatus::Running])?;
                    let is_decision_step = cp
                        .step_index
                        .filter(|idx| state.step_in_flight == Some(*idx))
                        .and_then(|idx| state.spec.steps().get(idx))
                        .is_some_and(|step| step.decision_needed);
                    if !is_decision_step {
                        return Err(corrupt(
                            record,
                            "decision-needed checkpoint without a running decision step",
                        ));
                    }
                    state.status = JobStatus::Blocked;
                    state.pending_decision = Some(CheckpointId::from_seq(record.seq));
                }
                CheckpointType::Completed => {
                    require(record, state.status, &[JobStatus::Running])?;
                    if !state.all_steps_done() {
                        return Err(corrupt(record, "completed checkpoint before the last step"));
                    }
                    state.status = JobStatus::Completed;
                }
            }

            if !cp.reason_codes.is_empty() {
                state.reason_codes = cp.reason_codes.clone();
            }
            state.summary = cp.summary.clone();
            state.checkpoints.push(CheckpointRecord {
                checkpoint_id: CheckpointId::from_seq(record.seq),
                job_id: state.job_id.clone(),
                created_at: record.timestamp,
                checkpoint_type: cp.checkpoint_type,
                summary: cp.summary,
                status: state.status,
                step_index: cp.step_index,
                required_action: cp.required_action,
                artifacts: cp.artifacts,
                reason_codes: cp.reason_codes,
                budget: cp.budget,
                approval: None,
            });
            Ok(())
        }

        JobEvent::Approved(approval) => {
            require(record, state.status, &[JobStatus::Blocked])?;
            if state.pending_decision != Some(approval.checkpoint_id)
                || approval.job_id != state.job_id
            {
                return Err(corrupt(record, "approval does not match the pending decision"));
            }
            let Some(step_index) = state.step_in_flight else {
                return Err(corrupt(record, "approval without a blocked step"));
            };
            let Some(checkpoint) = state
                .checkpoints
                .iter_mut()
                .find(|c| c.checkpoint_id == approval.checkpoint_id)
            else {
                return Err(corrupt(record, "approval for an unknown checkpoint"));
            };
            state.summary = format!(
                "checkpoint {} approved by {}",
                approval.checkpoint_id, approval.approved_by
            );
            checkpoint.approval = Some(approval);
            state.pending_decision = None;
            state.step_in_flight = None;
            state.next_step_index = step_index + 1;
            state.status = JobStatus::Running;
            Ok(())
        }

        JobEvent::LeaseAcquired(lease) => {
            state.lease = Some(lease);
            Ok(())
        }

        JobEvent::LeaseRenewed(lease) => {
            let renews_current = state
                .lease
                .as_ref()
                .is_some_and(|l| l.lease_id == lease.lease_id && l.released_at.is_none());
            if !renews_current {
                return Err(corrupt(record, "renewal of a lease that is not current"));
            }
            state.lease = Some(lease);
            Ok(())
        }

        JobEvent::LeaseReleased(released) => match state.lease.as_mut() {
            Some(l) if l.lease_id == released.lease_id && l.released_at.is_none() => {
                l.released_at = Some(record.timestamp);
                Ok(())
            }
            _ => Err(corrupt(record, "release of a lease that is not current")),
        },

        JobEvent::BudgetExceeded(e) => {
            require(record, state.status, ACTIVE)?;
            state.status = JobStatus::Failed;
            state.step_in_flight = None;
            state.reason_codes = e.reason_codes;
            state.summary = format!("budget exceeded: {}", e.violations.join(", "));
            Ok(())
        }

        JobEvent::JobFailed(e) => {
            require(record, state.status, ACTIVE)?;
            state.status = JobStatus::Failed;
            state.step_in_flight = None;
            state.reason_codes = e.reason_codes;
            state.summary = e.error;
            Ok(())
        }

        JobEvent::EnvironmentDrift(e) => {
            if state.status.is_terminal() {
                return Err(out_of_order(record, state.status));
            }
            state.reason_codes = e.reason_codes;
            state.drift_hash = Some(e.actual_hash);
            Ok(())
        }

        JobEvent::Cancelled(e) => {
            if state.status.is_terminal() {
                return Err(out_of_order(record, state.status));
            }
            state.status = JobStatus::Cancelled;
            state.pending_decision = None;
            if !e.reason_codes.is_empty() {
                state.reason_codes = e.reason_codes;
            }
            state.summary = format!("cancelled: {}", e.reason);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use jobward_core::{ErrorKind, JobSpec, LeaseId, StepSpec, WorkerId};
    use proptest::prelude::*;

    use crate::event::*;

    fn job_id() -> JobId {
        JobId::parse("demo_job").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, 21, 0, 0).unwrap()
    }

    struct Log {
        records: Vec<EventRecord>,
    }

    impl Log {
        fn submitted(spec: JobSpec) -> Self {
            let mut log = Log {
                records: Vec::new(),
            };
            log.push(JobEvent::Submitted(Submitted {
                job_id: job_id(),
                spec,
                fingerprint: EnvironmentFingerprint {
                    hash: "abc".to_string(),
                    rules: vec!["os".to_string()],
                    values: Default::default(),
                },
                producer_version: "test".to_string(),
            }));
            log
        }

        fn push(&mut self, event: JobEvent) -> u64 {
            let seq = self.records.len() as u64;
            let at = t0() + Duration::seconds(seq as i64);
            self.records.push(EventRecord::new(seq, at, &event).unwrap());
            seq
        }

        fn checkpoint(&mut self, checkpoint_type: CheckpointType, step_index: Option<usize>) -> u64 {
            self.push(JobEvent::Checkpoint(CheckpointEmitted {
                checkpoint_type,
                summary: format!("{checkpoint_type} checkpoint"),
                step_index,
                required_action: None,
                artifacts: vec![],
                reason_codes: vec![],
                budget: BudgetUsage::default(),
            }))
        }

        fn started(&mut self, step_index: usize) {
            self.push(JobEvent::StepStarted(StepStarted {
                step_index,
                step_id: format!("s{step_index}"),
            }));
        }

        fn completed(&mut self, step_index: usize) {
            self.push(JobEvent::StepCompleted(StepCompleted {
                step_index,
                step_id: format!("s{step_index}"),
                attempts: 1,
                tool_calls: 2,
                artifacts: vec![],
                output: None,
            }));
        }

        fn approve(&mut self, seq: u64) {
            self.push(JobEvent::Approved(ApprovalRecord {
                job_id: job_id(),
                checkpoint_id: CheckpointId::from_seq(seq),
                reason: "looks good".to_string(),
                approved_by: "alice".to_string(),
                approved_at: t0(),
            }));
        }

        fn project(&self) -> JobResult<JobState> {
            project(&job_id(), self.records.iter().cloned().map(Ok))
        }
    }

    /// Drive the demo spec up to (and optionally past) its review gate.
    fn blocked_demo() -> (Log, u64) {
        let mut log = Log::submitted(JobSpec::example());
        log.checkpoint(CheckpointType::Plan, None);
        log.started(0);
        log.completed(0);
        log.checkpoint(CheckpointType::Progress, Some(0));
        log.started(1);
        let decision = log.checkpoint(CheckpointType::DecisionNeeded, Some(1));
        (log, decision)
    }

    #[test]
    fn demo_job_walks_the_full_lifecycle() {
        let (mut log, decision) = blocked_demo();
        let blocked = log.project().unwrap();
        assert_eq!(blocked.status, JobStatus::Blocked);
        assert_eq!(blocked.pending_decision, Some(CheckpointId::from_seq(decision)));

        log.approve(decision);
        assert_eq!(log.project().unwrap().status, JobStatus::Running);

        log.started(2);
        log.completed(2);
        log.checkpoint(CheckpointType::Completed, None);

        let done = log.project().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.next_step_index, 3);
        assert_eq!(done.tool_calls, 4);
        assert_eq!(done.version, log.records.len() as u64);
        let review = done.checkpoint(CheckpointId::from_seq(decision)).unwrap();
        assert_eq!(review.approval.as_ref().unwrap().approved_by, "alice");
        assert_eq!(review.status, JobStatus::Blocked);
    }

    #[test]
    fn failed_attempts_count_toward_tool_calls() {
        let mut log = Log::submitted(JobSpec::example());
        log.checkpoint(CheckpointType::Plan, None);
        log.started(0);
        log.push(JobEvent::StepFailed(StepFailed {
            step_index: 0,
            step_id: "s0".to_string(),
            attempt: 1,
            error: "exit 1".to_string(),
            tool_calls: 3,
        }));

        let mid_retry = log.project().unwrap();
        assert_eq!(mid_retry.tool_calls, 3);
        assert_eq!(mid_retry.retries, 1);

        log.completed(0);
        assert_eq!(log.project().unwrap().tool_calls, 5);
    }

    #[test]
    fn empty_log_is_corrupt() {
        let err = project(&job_id(), std::iter::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn log_must_start_with_submission() {
        let mut log = Log {
            records: Vec::new(),
        };
        log.started(0);
        let err = log.project().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn approval_of_non_pending_checkpoint_is_corrupt() {
        let (mut log, decision) = blocked_demo();
        log.approve(decision - 1);
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn second_approval_is_corrupt() {
        let (mut log, decision) = blocked_demo();
        log.approve(decision);
        log.approve(decision);
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn completion_before_last_step_is_corrupt() {
        let mut log = Log::submitted(JobSpec::example());
        log.started(0);
        log.completed(0);
        log.checkpoint(CheckpointType::Completed, None);
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn steps_must_start_in_order() {
        let mut log = Log::submitted(JobSpec::example());
        log.started(1);
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn failure_is_terminal() {
        let mut log = Log::submitted(JobSpec::example());
        log.started(0);
        log.push(JobEvent::JobFailed(JobFailed {
            step_index: Some(0),
            error: "adapter failed".to_string(),
            reason_codes: vec!["E_ADAPTER_FAIL".to_string()],
        }));
        let failed = log.project().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.reason_codes, vec!["E_ADAPTER_FAIL"]);

        log.started(0);
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn cancelled_blocked_job_stays_cancelled() {
        let (mut log, _) = blocked_demo();
        log.push(JobEvent::Cancelled(Cancelled {
            reason: "no longer needed".to_string(),
            reason_codes: vec![],
        }));
        let state = log.project().unwrap();
        assert_eq!(state.status, JobStatus::Cancelled);
        assert_eq!(state.pending_decision, None);

        log.push(JobEvent::Cancelled(Cancelled {
            reason: "again".to_string(),
            reason_codes: vec![],
        }));
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[test]
    fn lease_history_is_tracked_in_any_status() {
        let mut log = Log::submitted(JobSpec::example());
        let lease = LeaseRecord {
            worker_id: WorkerId::new("w1").unwrap(),
            lease_id: LeaseId::new(),
            acquired_at: t0(),
            expires_at: t0() + Duration::seconds(30),
            released_at: None,
        };
        log.push(JobEvent::LeaseAcquired(lease.clone()));
        assert_eq!(log.project().unwrap().active_lease(t0()), Some(&lease));

        log.push(JobEvent::LeaseReleased(LeaseReleased {
            worker_id: lease.worker_id.clone(),
            lease_id: lease.lease_id,
        }));
        let state = log.project().unwrap();
        assert!(state.lease.as_ref().unwrap().released_at.is_some());
        assert_eq!(state.active_lease(t0()), None);

        log.push(JobEvent::LeaseReleased(LeaseReleased {
            worker_id: lease.worker_id.clone(),
            lease_id: lease.lease_id,
        }));
        assert_eq!(log.project().unwrap_err().kind(), ErrorKind::CorruptLog);
    }

    #[derive(Debug, Clone)]
    struct StepPlan {
        decision: bool,
        failures: u32,
    }

    fn arb_plan() -> impl Strategy<Value = Vec<StepPlan>> {
        prop::collection::vec(
            (any::<bool>(), 0u32..3).prop_map(|(decision, failures)| StepPlan {
                decision,
                failures,
            }),
            1..6,
        )
    }

    fn simulate(plan: &[StepPlan]) -> Log {
        let steps = plan
            .iter()
            .enumerate()
            .map(|(i, p)| StepSpec {
                id: format!("s{i}"),
                summary: format!("step {i}"),
                executed: !p.decision,
                decision_needed: p.decision,
                ..StepSpec::default()
            })
            .collect();
        let mut spec = JobSpec::example();
        spec.inputs.steps = steps;

        let mut log = Log::submitted(spec);
        log.checkpoint(CheckpointType::Plan, None);
        for (i, p) in plan.iter().enumerate() {
            log.started(i);
            if p.decision {
                let cp = log.checkpoint(CheckpointType::DecisionNeeded, Some(i));
                log.approve(cp);
                continue;
            }
            for attempt in 1..=p.failures {
                log.push(JobEvent::StepFailed(StepFailed {
                    step_index: i,
                    step_id: format!("s{i}"),
                    attempt,
                    error: "boom".to_string(),
                    tool_calls: 1,
                }));
            }
            log.completed(i);
            log.checkpoint(CheckpointType::Progress, Some(i));
        }
        log.checkpoint(CheckpointType::Completed, None);
        log
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: replaying the same log twice yields identical state, and
        /// every non-empty prefix of a valid log projects without error.
        #[test]
        fn replay_is_deterministic_over_every_prefix(plan in arb_plan()) {
            let log = simulate(&plan);

            let first = log.project().unwrap();
            let second = log.project().unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.status, JobStatus::Completed);

            for len in 1..=log.records.len() {
                let prefix = project(&job_id(), log.records[..len].iter().cloned().map(Ok));
                prop_assert!(prefix.is_ok(), "prefix {} failed: {:?}", len, prefix.err());
            }
        }
    }
}
