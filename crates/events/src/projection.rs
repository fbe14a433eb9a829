use jobward_core::JobResult;

use crate::EventRecord;

/// A projection builds derived state from an append-only job log.
///
/// Projections are disposable: the log is the source of truth and any
/// projection can be rebuilt by replaying it from sequence 0. Unlike a
/// best-effort read model, `apply` is fallible: a record the projection cannot
/// account for means the log is corrupt, and guessing would surface a
/// plausible but wrong state.
pub trait Projection {
    /// Apply a single record, in log order.
    fn apply(&mut self, record: &EventRecord) -> JobResult<()>;
}
