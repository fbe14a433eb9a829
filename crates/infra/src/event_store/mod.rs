//! Append-only event store boundary.
//!
//! One log per job. The filesystem store is the production backend; the
//! in-memory store backs unit tests.

pub mod file;
pub mod in_memory;
pub mod r#trait;

pub use file::FileEventStore;
pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStream};
