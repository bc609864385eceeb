//! Process-wide tracing setup for wallet services and tests.

/// Initialize JSON tracing for the process (`RUST_LOG`, default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Human-readable output captured by the test harness.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_for_tests() {
    tracing::init_test("debug");
}

pub mod tracing;
