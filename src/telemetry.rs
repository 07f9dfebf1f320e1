use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingSettings};

/// Directives used when `RUST_LOG` is unset: `SONGBOOK_LOG_LEVEL` applies to
/// this crate's store, scheduler and worker events, while dependencies stay
/// at `warn`.
fn default_directives(level: LevelFilter) -> String {
    format!("warn,{}={level}", env!("CARGO_CRATE_NAME"))
}

/// Install the process-wide subscriber for scheduler decisions, dispatch
/// failures and worker outcomes. `SONGBOOK_LOG_FORMAT` picks compact lines or
/// JSON records; a `RUST_LOG` value replaces the default directives entirely.
pub fn init(logging: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(logging.level)));

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_level_is_scoped_to_this_crate() {
        assert_eq!(
            default_directives(LevelFilter::DEBUG).to_lowercase(),
            "warn,songbook_manager=debug"
        );
        // The result must parse as a filter.
        EnvFilter::try_new(default_directives(LevelFilter::OFF)).unwrap();
    }

    #[test]
    fn second_install_fails_cleanly() {
        let settings = LoggingSettings::default();
        // Another test may have installed a subscriber first; either way the
        // second attempt in this process must be an error, not a panic.
        let _ = init(&settings);
        assert!(init(&settings).is_err());
    }
}
