//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Map `-v` repetitions onto a log level
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - `tower_http` follows the crate level so request spans line up with handler events

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Install the global subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fog={level},tower_http={level}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Raise `base` by one level per `-v`, saturating at `trace`.
pub fn level_for_verbosity(base: &str, verbose: u8) -> &'static str {
    let start = LEVELS
        .iter()
        .position(|level| level.eq_ignore_ascii_case(base))
        .unwrap_or(2);
    let index = (start + usize::from(verbose)).min(LEVELS.len() - 1);
    LEVELS[index]
}
