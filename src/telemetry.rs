/// Structured logging setup
///
/// The crate itself only emits `tracing` events. Applications that have no
/// subscriber of their own can install one with [`init_logging`]: it writes
/// human-readable or JSON lines to stderr, or to daily-rolling files when a
/// log directory is configured. `RUST_LOG` overrides the configured level.
use crate::config::LoggingConfig;
use crate::{RecoveryError, RecoveryResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(config: &LoggingConfig) -> RecoveryResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| {
        RecoveryError::Logging(format!("invalid log level '{}': {}", config.level, e))
    })
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as file output is wanted;
/// dropping it flushes and stops the background writer. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> RecoveryResult<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.directory.is_none())
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| RecoveryError::Logging(e.to_string()))?;

    tracing::debug!(
        level = %config.level,
        json = config.json,
        directory = ?config.directory,
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_configured_level_used_without_rust_log() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "recovery_core=debug,warn".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("recovery_core=debug"));
    }

    #[test]
    #[serial]
    fn test_invalid_level_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "recovery_core=loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            build_filter(&config),
            Err(RecoveryError::Logging(_))
        ));
    }
}
