//! Replay utilities.
//!
//! Deterministic replay with cursor tracking and no storage assumptions.
//! The runner enforces the log's ordering contract (gap-free, starting at 0)
//! before a projection ever sees a record.

use jobward_core::{JobError, JobResult};

use crate::{EventRecord, Projection};

/// Runs records through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    next_seq: u64,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            next_seq: 0,
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Number of records applied so far.
    pub fn applied(&self) -> u64 {
        self.next_seq
    }

    /// Apply a single record, enforcing gap-free sequencing.
    pub fn apply(&mut self, record: &EventRecord) -> JobResult<()> {
        if record.seq != self.next_seq {
            return Err(JobError::corrupt_log(format!(
                "non-monotonic sequence: expected {}, found {}",
                self.next_seq, record.seq
            ))
            .with_detail("expected_seq", self.next_seq)
            .with_detail("found_seq", record.seq));
        }
        self.projection.apply(record)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Apply many records in order, stopping at the first failure.
    pub fn run(
        &mut self,
        records: impl IntoIterator<Item = JobResult<EventRecord>>,
    ) -> JobResult<()> {
        for record in records {
            self.apply(&record?)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full log.
    pub fn rebuild_from_scratch(
        factory: impl FnOnce() -> P,
        records: impl IntoIterator<Item = JobResult<EventRecord>>,
    ) -> JobResult<(P, u64)> {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(records)?;
        Ok((runner.projection, runner.next_seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Counter(Vec<u64>);

    impl Projection for Counter {
        fn apply(&mut self, record: &EventRecord) -> JobResult<()> {
            self.0.push(record.seq);
            Ok(())
        }
    }

    fn record(seq: u64) -> EventRecord {
        EventRecord {
            seq,
            event_type: "noop".to_string(),
            timestamp: Utc::now(),
            payload: json!({}),
        }
    }

    #[test]
    fn replays_gap_free_log() {
        let (counter, applied) =
            ProjectionRunner::rebuild_from_scratch(Counter::default, (0..3).map(|s| Ok(record(s))))
                .unwrap();
        assert_eq!(counter.0, vec![0, 1, 2]);
        assert_eq!(applied, 3);
    }

    #[test]
    fn rejects_gaps_and_repeats() {
        for seqs in [vec![0, 2], vec![0, 1, 1], vec![1]] {
            let err = ProjectionRunner::rebuild_from_scratch(
                Counter::default,
                seqs.into_iter().map(|s| Ok(record(s))),
            )
            .unwrap_err();
            assert_eq!(err.kind(), jobward_core::ErrorKind::CorruptLog);
        }
    }
}
