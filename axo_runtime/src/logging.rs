//! Tracing subscriber setup.

use tracing::Level;

fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

/// Installs the global fmt subscriber at `level` (`trace` … `error`).
///
/// Returns `false` if a subscriber was already installed; calling it twice
/// is harmless.
pub fn init_tracing(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(parse_level(level))
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}

/// Subscriber for tests: output goes through the test harness capture.
pub fn init_test_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init()
        .is_ok()
}
