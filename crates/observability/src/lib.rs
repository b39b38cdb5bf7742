//! Tracing and logging (shared setup).

/// Initialize process-wide logging at `level` (`RUST_LOG` wins when set).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init(level: &str) {
    tracing::init(level);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
