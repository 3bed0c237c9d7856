//! Logging setup and the event macros used across the indexing core.
//!
//! Levels come from the `[logging]` section of the settings file, with
//! per-component overrides:
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! syncer = "debug"
//! ```
//!
//! `RUST_LOG` beats the configuration when set, e.g.
//! `RUST_LOG=syncer=debug,indexer=trace`.

use std::fmt;
use std::sync::Once;

use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm, local time. Index runs are short-lived enough that the
/// date is noise.
struct ClockTime;

impl FormatTime for ClockTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut directives = config.default.clone();
    for (module, level) in &config.modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    EnvFilter::new(&directives)
}

/// Install the global subscriber. Only the first call takes effect, so
/// libraries and tests may call this freely.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(build_filter(config))
            .with_timer(ClockTime)
            .with_target(true)
            .init();
    });
}

/// Install the global subscriber with the default (quiet) configuration.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log a component event at info level.
///
/// ```ignore
/// log_event!("syncer", "flushed", "{} symbols", count);
/// log_event!("indexer", "job done");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Like [`log_event!`] at debug level, for chatty per-entry events.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_includes_module_overrides() {
        let mut config = LoggingConfig::default();
        config
            .modules
            .insert("syncer".to_string(), "debug".to_string());
        // Just exercise the builder; the directive string must parse.
        let _ = build_filter(&config);
    }
}
