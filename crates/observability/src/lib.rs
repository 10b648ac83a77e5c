//! Process-wide tracing setup shared by binaries and tests.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber that writes through the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber configuration (filters, formatters).
pub mod tracing;
