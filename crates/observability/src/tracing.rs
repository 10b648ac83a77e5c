//! Subscriber installation.
//!
//! Both entry points honour `RUST_LOG` and fall back to a fixed level.

use tracing_subscriber::EnvFilter;

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// JSON logs with timestamps, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("info"))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact output captured per test; defaults to `debug` for the sharex crates.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("warn,sharex_sync=debug,sharex_splits=debug"))
        .compact()
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn repeated_init_is_harmless() {
        super::init_for_tests();
        super::init_for_tests();
        super::init();
        ::tracing::info!("still logging");
    }
}
