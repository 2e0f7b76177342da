//! Logging setup for binaries and tests embedding the middleware

/// Install a `fmt` subscriber filtered by `RUST_LOG`
///
/// Falls back to `switchboard_core=<level>` when `RUST_LOG` is unset or
/// invalid. Returns `false` if a global subscriber was already installed,
/// so calling this more than once is harmless.
pub fn init_tracing(level: &str) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("switchboard_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}
