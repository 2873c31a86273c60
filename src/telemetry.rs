//! Tracing setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Filter directive for the configured level; `RUST_LOG` takes precedence
pub fn filter_directive(config: &LoggingConfig) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| format!("enginewatch={}", config.level))
}

/// Install the global subscriber
///
/// `format = "json"` emits one JSON object per event; anything else uses
/// the human-readable formatter. Calling this twice is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::new(filter_directive(config));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
