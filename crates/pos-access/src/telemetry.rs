//! Tracing setup for hosts embedding the access layer.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber. JSON output when `LOG_FORMAT=json`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("pos_access=info,pos_client=info,pos_offline=info,pos_storage=warn")
    });

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
            .is_ok()
    }
}
