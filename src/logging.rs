//! Tracing subscriber setup and log-safe formatting helpers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false).with_target(true))
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}

/// Keep only the last two digits of a tax id, e.g. `*********09`.
pub fn mask_tax_id(tax_id: &str) -> String {
    let digits: Vec<char> = tax_id.chars().filter(|c| c.is_ascii_digit()).collect();
    let visible = digits.len().min(2);
    let hidden = digits.len() - visible;
    let mut masked = "*".repeat(hidden);
    masked.extend(&digits[hidden..]);
    masked
}
