//! Infrastructure layer: durable event storage, leases, step execution and
//! the runner/dispatcher operations built on top of them.

pub mod adapters;
pub mod budget;
pub mod dispatcher;
pub mod event_store;
pub mod fingerprint;
pub mod lease;
pub mod runner;

pub use adapters::{AdapterError, AdapterRegistry, StepAdapter, StepOutcome, StepRequest};
pub use dispatcher::{Dispatcher, SubmitOptions, SubmitResult};
pub use event_store::{EventStore, EventStream, FileEventStore, InMemoryEventStore};
pub use fingerprint::{FactSource, HostFacts, StaticFacts};
pub use lease::{LeaseConfig, LeaseManager};
pub use runner::Runner;
