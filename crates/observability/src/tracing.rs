//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::TelemetryConfig;

fn filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(config: &TelemetryConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    // Only the first successful init wins; later calls are ignored.
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let config = TelemetryConfig {
            log_level: "debug".to_string(),
            json: false,
        };
        init(&config);
        init(&config);
        ::tracing::info!(attempt = 2, "still alive");
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"json": false}"#).unwrap();
        assert_eq!(config.log_level, "info");
        assert!(!config.json);
    }
}
