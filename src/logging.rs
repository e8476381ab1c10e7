//! `tracing` subscriber setup for the binary.
//!
//! Level is controlled by `RUST_LOG`, defaulting to `info` when unset.

/// Install the global `tracing` subscriber.
///
/// # Panics
/// Panics if a global subscriber has already been installed; `main` calls
/// this exactly once before doing anything else.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
