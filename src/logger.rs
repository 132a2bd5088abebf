use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

/// Log timestamps, local time with milliseconds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Filter used when `RUST_LOG` is unset
pub fn default_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "meshlobby=debug,meshlobby_lib=debug,webrtc=warn"
    } else {
        "meshlobby=info,meshlobby_lib=info,webrtc=error"
    }
}

/// Installs the global subscriber. Safe to call more than once.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}
