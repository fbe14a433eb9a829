//! `jobward-core`: foundation types shared by every jobward crate.
//!
//! Pure building blocks (no filesystem layout, no HTTP): errors, identifiers,
//! the clock seam, optimistic-concurrency expectations and job specifications.

pub mod checkpoint;
pub mod clock;
pub mod error;
pub mod id;
pub mod spec;
pub mod version;

pub use checkpoint::{CheckpointType, RequiredAction};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, JobError, JobResult};
pub use id::{CheckpointId, JobId, LeaseId, WorkerId, reject_traversal};
pub use spec::{
    AdapterConfig, Budgets, CheckpointPolicy, FingerprintRules, JobInputs, JobSpec, SpecError,
    StepSpec,
};
pub use version::ExpectedVersion;

/// Version string stamped into status responses and the submitted event.
pub const PRODUCER_VERSION: &str = env!("CARGO_PKG_VERSION");
