//! Job events and the state derived from them.
//!
//! The event log is the only source of truth; [`project`] rebuilds a
//! [`JobState`] from it on demand.

pub mod event;
pub mod projection;
pub mod projector;
pub mod replay;
pub mod state;

pub use event::{
    ApprovalRecord, BudgetExceeded, BudgetUsage, Cancelled, CheckpointEmitted, EnvironmentDrift,
    EnvironmentFingerprint, EventRecord, JobEvent, JobFailed, LeaseRecord, LeaseReleased,
    StepCompleted, StepFailed, StepStarted, Submitted,
};
pub use projection::Projection;
pub use projector::{StatusProjector, project};
pub use replay::ProjectionRunner;
pub use state::{CheckpointRecord, JobState, JobStatus};
