use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::ResearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Filter directive; falls back to `RUST_LOG`, then `default_level`.
    pub env_filter: Option<String>,
    pub default_level: String,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            default_level: "info".to_string(),
            with_ansi: true,
            with_target: false,
        }
    }
}

impl TelemetryOptions {
    /// Options whose fallback level comes from `[logging] level`.
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            default_level: level.into(),
            ..Self::default()
        }
    }

    fn resolve_filter(&self) -> String {
        self.env_filter
            .clone()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| self.default_level.clone())
    }
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), ResearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_new(options.resolve_filter()).map_err(|err| {
        ResearchError::InvalidConfiguration(format!("invalid log filter: {err}"))
    })?;

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            ResearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins() {
        let options = TelemetryOptions {
            env_filter: Some("webresearch_core=debug".into()),
            ..TelemetryOptions::default()
        };
        assert_eq!(options.resolve_filter(), "webresearch_core=debug");
    }

    #[test]
    fn bad_filter_is_a_configuration_error() {
        let options = TelemetryOptions {
            env_filter: Some("webresearch_core=loud".into()),
            ..TelemetryOptions::default()
        };
        let err = init_telemetry(options).unwrap_err();
        assert!(matches!(err, ResearchError::InvalidConfiguration(_)));
    }
}
