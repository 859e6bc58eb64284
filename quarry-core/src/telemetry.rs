//! Tracing subscriber initialization
//!
//! Library code only emits `tracing` events; binaries embedding the store
//! cache call [`init_tracing`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ConfigError, QuarryError, QuarryResult};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: std::env::var("QUARRY_LOG_FILTER")
                .unwrap_or_else(|_| "quarry_storage=debug,quarry_monitor=info,info".to_string()),
            format: match std::env::var("QUARRY_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Fails if a global
/// subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> QuarryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    result.map_err(|e| {
        QuarryError::Config(ConfigError::InvalidValue {
            field: "tracing_subscriber".to_string(),
            value: config.default_filter.clone(),
            reason: e.to_string(),
        })
    })?;

    tracing::info!(
        filter = %config.default_filter,
        format = ?config.format,
        "Tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let config = TelemetryConfig {
            default_filter: "warn".to_string(),
            format: LogFormat::Pretty,
        };
        // The first call may already have happened in another test of this binary.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
