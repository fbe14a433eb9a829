//! The runner drives a job's steps and owns every operation that reads or
//! mutates an existing job.
//!
//! Nothing here keeps state between calls. Each operation replays the log,
//! decides, and appends conditionally on the version it decided from, so a
//! fresh process resumes exactly where the previous one stopped.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use jobward_core::{
    CheckpointId, CheckpointType, Clock, ExpectedVersion, JobError, JobId, JobResult,
    RequiredAction, StepSpec, WorkerId,
};
use jobward_events::{
    ApprovalRecord, BudgetExceeded, BudgetUsage, Cancelled, CheckpointEmitted, CheckpointRecord,
    EnvironmentDrift, EventRecord, JobEvent, JobFailed, JobState, JobStatus, LeaseRecord,
    StepCompleted, StepFailed, StepStarted, project,
};

use crate::adapters::{AdapterRegistry, StepRequest};
use crate::budget::{self, reason};
use crate::event_store::EventStore;
use crate::fingerprint::{self, FactSource, HostFacts};
use crate::lease::{LeaseConfig, LeaseManager, MAX_APPEND_CONFLICTS};

#[derive(Clone)]
pub struct Runner<S> {
    store: S,
    leases: LeaseManager<S>,
    clock: Arc<dyn Clock>,
    adapters: AdapterRegistry,
    facts: Arc<dyn FactSource>,
    config: LeaseConfig,
}

/// Whether the drive loop should keep stepping.
enum Flow {
    Continue,
    Halt,
}

impl<S> Runner<S>
where
    S: EventStore + Clone,
{
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), clock.clone()),
            store,
            clock,
            adapters: AdapterRegistry::with_defaults(),
            facts: Arc::new(HostFacts),
            config: LeaseConfig::default(),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_facts(mut self, facts: Arc<dyn FactSource>) -> Self {
        self.facts = facts;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.config.lease_ttl = ttl;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn facts(&self) -> &dyn FactSource {
        self.facts.as_ref()
    }

    pub fn leases(&self) -> &LeaseManager<S> {
        &self.leases
    }

    /// Rebuild the job's state from its log.
    pub fn recover(&self, job_id: &JobId) -> JobResult<JobState> {
        if !self.store.job_exists(job_id) {
            return Err(JobError::not_found(format!("job {job_id} does not exist"))
                .with_detail("job_id", job_id.to_string()));
        }
        project(job_id, self.store.read_events(job_id)?)
    }

    /// Checkpoints in emission order.
    pub fn list_checkpoints(&self, job_id: &JobId) -> JobResult<Vec<CheckpointRecord>> {
        Ok(self.recover(job_id)?.checkpoints)
    }

    pub fn get_checkpoint(&self, job_id: &JobId, checkpoint_id: &str) -> JobResult<CheckpointRecord> {
        let state = self.recover(job_id)?;
        checkpoint_id
            .parse::<CheckpointId>()
            .ok()
            .and_then(|id| state.checkpoint(id).cloned())
            .ok_or_else(|| {
                JobError::not_found(format!(
                    "checkpoint {checkpoint_id} does not exist for job {job_id}"
                ))
                .with_detail("job_id", job_id.to_string())
                .with_detail("checkpoint_id", checkpoint_id)
            })
    }

    /// Clear the pending decision checkpoint.
    ///
    /// Exactly one approval per checkpoint wins: the approval is appended
    /// conditionally on the version it was validated against, so a racing
    /// second approval re-validates and sees the first.
    pub fn approve_checkpoint(
        &self,
        job_id: &JobId,
        checkpoint_id: &str,
        reason: &str,
        approved_by: &str,
    ) -> JobResult<ApprovalRecord> {
        let reason = reason.trim();
        let approved_by = approved_by.trim();
        if reason.is_empty() {
            return Err(JobError::invalid_input("approval reason must not be empty"));
        }
        if approved_by.is_empty() {
            return Err(JobError::invalid_input("approved_by must not be empty"));
        }

        let mut conflicts = 0;
        loop {
            let state = self.recover(job_id)?;
            let id = approvable(&state, checkpoint_id)?;
            let approval = ApprovalRecord {
                job_id: job_id.clone(),
                checkpoint_id: id,
                reason: reason.to_string(),
                approved_by: approved_by.to_string(),
                approved_at: self.clock.now(),
            };
            match self.store.append(
                job_id,
                &JobEvent::Approved(approval.clone()),
                self.clock.now(),
                ExpectedVersion::Exact(state.version),
            ) {
                Ok(_) => {
                    info!(job_id = %job_id, checkpoint_id = %id, approved_by, "checkpoint approved");
                    return Ok(approval);
                }
                Err(e) if e.is_version_conflict() && conflicts < MAX_APPEND_CONFLICTS => {
                    conflicts += 1;
                    debug!(job_id = %job_id, conflicts, "approval raced another writer; revalidating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Move a non-terminal job to `cancelled`.
    pub fn cancel(&self, job_id: &JobId, reason: &str) -> JobResult<JobState> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(JobError::invalid_input("cancellation reason must not be empty"));
        }

        let mut conflicts = 0;
        loop {
            let state = self.recover(job_id)?;
            if state.status.is_terminal() {
                return Err(JobError::invalid_state(format!(
                    "job {job_id} is already {}",
                    state.status
                ))
                .with_detail("status", state.status.as_str()));
            }
            let event = JobEvent::Cancelled(Cancelled {
                reason: reason.to_string(),
                reason_codes: vec![reason::JOB_CANCELLED.to_string()],
            });
            match self.store.append(
                job_id,
                &event,
                self.clock.now(),
                ExpectedVersion::Exact(state.version),
            ) {
                Ok(_) => {
                    info!(job_id = %job_id, reason, "job cancelled");
                    return self.recover(job_id);
                }
                Err(e) if e.is_version_conflict() && conflicts < MAX_APPEND_CONFLICTS => {
                    conflicts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the job as far as it can go without outside input.
    ///
    /// Returns once the job is terminal or blocked on a decision. Jobs that are
    /// already terminal or blocked are returned untouched without taking the
    /// lease. Fails `LeaseHeld` while another worker owns the job.
    pub fn advance(&self, job_id: &JobId, worker_id: &WorkerId) -> JobResult<JobState> {
        let state = self.recover(job_id)?;
        if state.status.is_terminal() || state.status == JobStatus::Blocked {
            return Ok(state);
        }

        let mut lease = self
            .leases
            .acquire(job_id, worker_id, self.config.lease_ttl)?;
        let driven = self.drive(job_id, &mut lease);

        if let Err(e) = self.leases.release(job_id, lease.lease_id) {
            warn!(job_id = %job_id, lease_id = %lease.lease_id, error = %e, "failed to release lease");
        }

        driven?;
        self.recover(job_id)
    }

    fn drive(&self, job_id: &JobId, lease: &mut LeaseRecord) -> JobResult<()> {
        let mut drift_checked = false;
        let mut conflicts = 0;
        loop {
            self.keep_alive(job_id, lease)?;
            match self.step_once(job_id, lease, &mut drift_checked) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(e) if e.is_version_conflict() && conflicts < MAX_APPEND_CONFLICTS => {
                    conflicts += 1;
                    debug!(job_id = %job_id, conflicts, "append conflict while advancing; replaying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Renew once half the lease has elapsed. Returns whether a lease event
    /// was appended.
    ///
    /// A lease that lapsed while a step ran is taken back for the same worker,
    /// provided nobody acquired the job in the meantime.
    fn keep_alive(&self, job_id: &JobId, lease: &mut LeaseRecord) -> JobResult<bool> {
        let now = self.clock.now();
        if now < lease.expires_at - self.config.lease_ttl / 2 {
            return Ok(false);
        }
        if now < lease.expires_at {
            *lease = self
                .leases
                .renew(job_id, lease.lease_id, self.config.lease_ttl)?;
            return Ok(true);
        }

        let state = self.recover(job_id)?;
        let still_ours = state
            .lease
            .as_ref()
            .is_some_and(|l| l.lease_id == lease.lease_id && l.released_at.is_none());
        if !still_ours {
            return Err(JobError::lease_mismatch(format!(
                "lease {} lapsed and job {job_id} has since been leased again",
                lease.lease_id
            ))
            .with_detail("job_id", job_id.to_string())
            .with_detail("lease_id", lease.lease_id.to_string()));
        }
        let worker_id = lease.worker_id.clone();
        let lapsed = lease.lease_id;
        *lease = self
            .leases
            .acquire(job_id, &worker_id, self.config.lease_ttl)?;
        warn!(
            job_id = %job_id,
            lapsed_lease_id = %lapsed,
            lease_id = %lease.lease_id,
            "lease lapsed during a step; re-acquired"
        );
        Ok(true)
    }

    fn step_once(
        &self,
        job_id: &JobId,
        lease: &mut LeaseRecord,
        drift_checked: &mut bool,
    ) -> JobResult<Flow> {
        let state = self.recover(job_id)?;
        if state.status.is_terminal() || state.status == JobStatus::Blocked {
            return Ok(Flow::Halt);
        }
        let now = self.clock.now();
        if state.active_lease(now).map(|l| l.lease_id) != Some(lease.lease_id) {
            return Err(JobError::lease_mismatch(format!(
                "lease {} is no longer current for job {job_id}",
                lease.lease_id
            ))
            .with_detail("job_id", job_id.to_string())
            .with_detail("lease_id", lease.lease_id.to_string()));
        }

        let mut cursor = state.version;

        if !*drift_checked {
            self.check_drift(job_id, &state, &mut cursor)?;
            *drift_checked = true;
        }

        if !state.has_emitted(CheckpointType::Plan) {
            let steps: Vec<&str> = state.spec.steps().iter().map(|s| s.id.as_str()).collect();
            self.checkpoint(
                job_id,
                &mut cursor,
                &state,
                CheckpointEmitted {
                    checkpoint_type: CheckpointType::Plan,
                    summary: format!(
                        "plan: {} ({} steps: {})",
                        state.spec.objective,
                        steps.len(),
                        steps.join(", ")
                    ),
                    step_index: None,
                    required_action: None,
                    artifacts: state.spec.expected_artifacts.clone(),
                    reason_codes: Vec::new(),
                    budget: BudgetUsage::default(),
                },
            )?;
            return Ok(Flow::Continue);
        }

        if state.all_steps_done() {
            self.finish(job_id, &mut cursor, &state)?;
            return Ok(Flow::Halt);
        }

        let index = state.step_in_flight.unwrap_or(state.next_step_index);
        let Some(step) = state.spec.steps().get(index) else {
            return Err(JobError::corrupt_log(format!(
                "job {job_id} points at step {index} which the job does not define"
            )));
        };

        if state.step_in_flight.is_none() {
            let mut usage = state.usage(now);
            usage.steps += 1;
            let violations = budget::violations(&state.spec.budgets, &usage);
            if !violations.is_empty() {
                self.exceed_budget(job_id, &mut cursor, &state, violations, usage)?;
                return Ok(Flow::Halt);
            }
            self.append(
                job_id,
                &mut cursor,
                JobEvent::StepStarted(StepStarted {
                    step_index: index,
                    step_id: step.id.clone(),
                }),
            )?;
            info!(job_id = %job_id, step_index = index, step_id = %step.id, "step started");
        }

        if step.decision_needed {
            self.flush_progress(job_id, &mut cursor, &state)?;
            let required_action = step
                .required_action
                .clone()
                .unwrap_or_else(|| RequiredAction::approval(format!("approve step {}", step.id)));
            self.checkpoint(
                job_id,
                &mut cursor,
                &state,
                CheckpointEmitted {
                    checkpoint_type: CheckpointType::DecisionNeeded,
                    summary: format!("decision needed: {}", step.summary),
                    step_index: Some(index),
                    required_action: Some(required_action),
                    artifacts: step.artifacts.clone(),
                    reason_codes: vec![reason::APPROVAL_REQUIRED.to_string()],
                    budget: BudgetUsage::default(),
                },
            )?;
            info!(job_id = %job_id, step_id = %step.id, "job blocked awaiting approval");
            return Ok(Flow::Halt);
        }

        let completed = if step.executed {
            match self.execute(job_id, &mut cursor, &state, lease, index, step)? {
                Some(completed) => completed,
                None => return Ok(Flow::Halt),
            }
        } else {
            StepCompleted {
                step_index: index,
                step_id: step.id.clone(),
                attempts: 0,
                tool_calls: 0,
                artifacts: step.artifacts.clone(),
                output: None,
            }
        };
        self.append(job_id, &mut cursor, JobEvent::StepCompleted(completed))?;
        info!(job_id = %job_id, step_index = index, step_id = %step.id, "step completed");

        let state = self.recover(job_id)?;
        if state.status.is_terminal() {
            return Ok(Flow::Halt);
        }
        let mut cursor = state.version;
        let now = self.clock.now();

        let usage = state.usage(now);
        let violations = budget::violations(&state.spec.budgets, &usage);
        if !violations.is_empty() {
            self.exceed_budget(job_id, &mut cursor, &state, violations, usage)?;
            return Ok(Flow::Halt);
        }

        let interval = i64::try_from(state.spec.checkpoint_policy.min_interval_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let due = state
            .last_checkpoint_at(&[CheckpointType::Plan, CheckpointType::Progress])
            .is_none_or(|last| now - last >= interval);
        if due {
            self.flush_progress(job_id, &mut cursor, &state)?;
        }
        Ok(Flow::Continue)
    }

    /// Run the adapter until the step succeeds or its retries are spent.
    ///
    /// `None` means the job failed and the failure has been recorded.
    fn execute(
        &self,
        job_id: &JobId,
        cursor: &mut u64,
        state: &JobState,
        lease: &mut LeaseRecord,
        index: usize,
        step: &StepSpec,
    ) -> JobResult<Option<StepCompleted>> {
        let adapter = self.adapters.get(&state.spec.adapter.name)?;
        let max_attempts = state.spec.budgets.max_retries.saturating_add(1);
        let first_attempt = state.step_failures + 1;
        let mut last_error = String::new();

        for attempt in first_attempt..=max_attempts {
            if attempt > first_attempt && self.keep_alive(job_id, lease)? {
                // Only the lease event may have landed since our last append.
                let version = self.recover(job_id)?.version;
                if version != *cursor + 1 {
                    return Err(JobError::version_conflict(*cursor + 1, version));
                }
                *cursor = version;
            }
            let request = StepRequest {
                job_id,
                step_index: index,
                step,
                attempt,
                config: &state.spec.adapter.config,
            };
            match adapter.execute(&request) {
                Ok(outcome) => {
                    return Ok(Some(StepCompleted {
                        step_index: index,
                        step_id: step.id.clone(),
                        attempts: attempt,
                        tool_calls: outcome.tool_calls,
                        artifacts: outcome.artifacts,
                        output: outcome.output,
                    }));
                }
                Err(e) => {
                    warn!(
                        job_id = %job_id,
                        step_id = %step.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "step attempt failed"
                    );
                    last_error = e.to_string();
                    self.append(
                        job_id,
                        cursor,
                        JobEvent::StepFailed(StepFailed {
                            step_index: index,
                            step_id: step.id.clone(),
                            attempt,
                            error: last_error.clone(),
                            tool_calls: 1,
                        }),
                    )?;
                }
            }
        }

        let error = format!(
            "step {} failed after {} attempts: {last_error}",
            step.id, max_attempts
        );
        self.flush_progress(job_id, cursor, state)?;
        self.checkpoint(
            job_id,
            cursor,
            state,
            CheckpointEmitted {
                checkpoint_type: CheckpointType::Blocked,
                summary: error.clone(),
                step_index: Some(index),
                required_action: None,
                artifacts: Vec::new(),
                reason_codes: vec![reason::ADAPTER_FAIL.to_string()],
                budget: BudgetUsage::default(),
            },
        )?;
        self.append(
            job_id,
            cursor,
            JobEvent::JobFailed(JobFailed {
                step_index: Some(index),
                error,
                reason_codes: vec![reason::ADAPTER_FAIL.to_string()],
            }),
        )?;
        warn!(job_id = %job_id, step_id = %step.id, "job failed: adapter retries exhausted");
        Ok(None)
    }

    fn finish(&self, job_id: &JobId, cursor: &mut u64, state: &JobState) -> JobResult<()> {
        let reported = self.flush_progress(job_id, cursor, state)?;
        let progress_required = state
            .spec
            .checkpoint_policy
            .required_types
            .contains(&CheckpointType::Progress);
        if !reported && progress_required && !state.has_emitted(CheckpointType::Progress) {
            self.checkpoint(
                job_id,
                cursor,
                state,
                CheckpointEmitted {
                    checkpoint_type: CheckpointType::Progress,
                    summary: "all steps finished".to_string(),
                    step_index: None,
                    required_action: None,
                    artifacts: Vec::new(),
                    reason_codes: Vec::new(),
                    budget: BudgetUsage::default(),
                },
            )?;
        }

        self.checkpoint(
            job_id,
            cursor,
            state,
            CheckpointEmitted {
                checkpoint_type: CheckpointType::Completed,
                summary: format!("completed: {}", state.spec.objective),
                step_index: None,
                required_action: None,
                artifacts: state.spec.expected_artifacts.clone(),
                reason_codes: Vec::new(),
                budget: BudgetUsage::default(),
            },
        )?;
        info!(job_id = %job_id, "job completed");
        Ok(())
    }

    /// Report steps completed since the last plan/progress checkpoint.
    /// Returns whether a checkpoint was written.
    fn flush_progress(&self, job_id: &JobId, cursor: &mut u64, state: &JobState) -> JobResult<bool> {
        if state.unreported_steps.is_empty() {
            return Ok(false);
        }
        self.checkpoint(
            job_id,
            cursor,
            state,
            CheckpointEmitted {
                checkpoint_type: CheckpointType::Progress,
                summary: format!("completed steps: {}", state.unreported_steps.join(", ")),
                step_index: None,
                required_action: None,
                artifacts: state.unreported_artifacts.clone(),
                reason_codes: Vec::new(),
                budget: BudgetUsage::default(),
            },
        )?;
        Ok(true)
    }

    fn exceed_budget(
        &self,
        job_id: &JobId,
        cursor: &mut u64,
        state: &JobState,
        violations: Vec<String>,
        usage: BudgetUsage,
    ) -> JobResult<()> {
        self.flush_progress(job_id, cursor, state)?;
        self.checkpoint(
            job_id,
            cursor,
            state,
            CheckpointEmitted {
                checkpoint_type: CheckpointType::Blocked,
                summary: format!("budget exceeded: {}", violations.join(", ")),
                step_index: state.step_in_flight,
                required_action: None,
                artifacts: Vec::new(),
                reason_codes: vec![reason::BUDGET_EXCEEDED.to_string()],
                budget: usage,
            },
        )?;
        warn!(job_id = %job_id, violations = ?violations, "budget exceeded");
        self.append(
            job_id,
            cursor,
            JobEvent::BudgetExceeded(BudgetExceeded {
                violations,
                usage,
                reason_codes: vec![reason::BUDGET_EXCEEDED.to_string()],
            }),
        )?;
        Ok(())
    }

    /// Record drift when the host no longer matches the submission fingerprint.
    /// Drift is advisory: the job keeps running.
    fn check_drift(&self, job_id: &JobId, state: &JobState, cursor: &mut u64) -> JobResult<()> {
        let current = fingerprint::compute(&state.fingerprint.rules, self.facts.as_ref())?;
        if current.hash == state.fingerprint.hash
            || state.drift_hash.as_deref() == Some(current.hash.as_str())
        {
            return Ok(());
        }
        warn!(
            job_id = %job_id,
            expected = %state.fingerprint.hash,
            actual = %current.hash,
            "environment fingerprint changed since submission"
        );
        self.append(
            job_id,
            cursor,
            JobEvent::EnvironmentDrift(EnvironmentDrift {
                expected_hash: state.fingerprint.hash.clone(),
                actual_hash: current.hash,
                reason_codes: vec![reason::ENV_FINGERPRINT_MISMATCH.to_string()],
            }),
        )?;
        Ok(())
    }

    /// Append a checkpoint with the budget usage stamped in, unless the caller
    /// already supplied one.
    fn checkpoint(
        &self,
        job_id: &JobId,
        cursor: &mut u64,
        state: &JobState,
        mut checkpoint: CheckpointEmitted,
    ) -> JobResult<EventRecord> {
        if checkpoint.budget == BudgetUsage::default() {
            checkpoint.budget = state.usage(self.clock.now());
        }
        let kind = checkpoint.checkpoint_type;
        let record = self.append(job_id, cursor, JobEvent::Checkpoint(checkpoint))?;
        debug!(
            job_id = %job_id,
            checkpoint_id = %CheckpointId::from_seq(record.seq),
            checkpoint_type = %kind,
            "checkpoint emitted"
        );
        Ok(record)
    }

    fn append(&self, job_id: &JobId, cursor: &mut u64, event: JobEvent) -> JobResult<EventRecord> {
        let record = self.store.append(
            job_id,
            &event,
            self.clock.now(),
            ExpectedVersion::Exact(*cursor),
        )?;
        *cursor = record.seq + 1;
        Ok(record)
    }
}

/// Validate that `checkpoint_id` names the job's pending decision.
fn approvable(state: &JobState, checkpoint_id: &str) -> JobResult<CheckpointId> {
    let reject = |message: String| {
        JobError::invalid_state(message)
            .with_detail("job_id", state.job_id.to_string())
            .with_detail("checkpoint_id", checkpoint_id)
    };

    let Ok(id) = checkpoint_id.parse::<CheckpointId>() else {
        return Err(reject(format!("{checkpoint_id} is not a checkpoint id")));
    };
    let Some(checkpoint) = state.checkpoint(id) else {
        return Err(reject(format!("checkpoint {id} does not exist")));
    };
    if !checkpoint.is_decision() {
        return Err(reject(format!(
            "checkpoint {id} is a {} checkpoint and needs no approval",
            checkpoint.checkpoint_type
        )));
    }
    if checkpoint.is_approved() {
        return Err(reject(format!("checkpoint {id} is already approved")));
    }
    if state.pending_decision != Some(id) {
        return Err(reject(format!(
            "checkpoint {id} is not awaiting a decision (job is {})",
            state.status
        )));
    }
    Ok(id)
}
