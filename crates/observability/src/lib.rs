//! Logging setup shared by the jobward binaries and tests.

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogConfig::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
