use std::fs::OpenOptions;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::constants::{ENV_LOG_FILE, ENV_LOG_FILTER};

pub fn init_tracing() {
    init_tracing_with_filter("info");
}

/// Install the global subscriber.
///
/// Console output honours `CHATLOG_LOG` (falling back to `default_filter`).
/// When `CHATLOG_LOG_FILE` is set, a DEBUG-level file layer is added as well.
/// Calling this twice is harmless; the second install is ignored.
pub fn init_tracing_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_FILTER)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter),
    );

    let file = std::env::var(ENV_LOG_FILE)
        .ok()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    if let Some(file) = file {
        let file_layer = fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing();
        init_tracing_with_filter("debug");
        tracing::info!("tracing initialised");
    }
}
