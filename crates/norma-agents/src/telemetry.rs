//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Initialize the subscriber from `RUST_LOG`, defaulting to `info` for this
/// workspace. Safe to call once at binary startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,norma_agents=info,retrieval=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
