//! How much a pipeline run says, and where it says it.
//!
//! Every stage emits `tracing` events. [`LogConfig`] gates the noisier ones
//! (per-stage timings, catalog details, staging notices) and caps the length of
//! free-text fields such as source globs and error messages. [`setup`] installs
//! the stderr subscriber the `supply-etl` binary uses.

use tracing::Level;

/// Verbosity of a pipeline run.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level at which stage timings start to be reported
    pub base_level: Level,
    /// Report catalog checks and other per-stage details
    pub log_stage_details: bool,
    /// Report staging and publishing of the output dataset
    pub log_data_operations: bool,
    /// Longest free-text field written to a log event, in bytes
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_stage_details: false,
            log_data_operations: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Everything on, long fields kept. Used by `supply-etl --verbose`.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_stage_details: true,
            log_data_operations: true,
            max_field_length: 1024,
        }
    }

    /// Start and finish of the run only.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_stage_details: false,
            log_data_operations: false,
            max_field_length: 128,
        }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    /// Whether stage timings are reported.
    pub fn debug_enabled(&self) -> bool {
        // TRACE compares greatest.
        self.base_level >= Level::DEBUG
    }

    /// Cuts `value` down to [`LogConfig::max_field_length`].
    pub fn truncate(&self, value: &str) -> String {
        truncate_field(value, self.max_field_length)
    }
}

/// Debug event emitted only when stage timings are enabled.
#[macro_export]
macro_rules! perf_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

/// Debug event for per-stage details such as catalog fingerprints.
#[macro_export]
macro_rules! log_stage {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_stage_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Info event about the output dataset being staged or published.
#[macro_export]
macro_rules! log_data_op {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_data_operations {
            tracing::info!($($arg)*);
        }
    };
}

/// Shortens `value` to at most `max_length` bytes, marking the cut.
///
/// A cut inside a multi-byte character moves back to the previous boundary.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber installation.
pub mod setup {
    use tracing::Level;

    /// Filter and format of the stderr subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Level for DataFusion, object_store and the other dependencies
        pub level: Level,
        /// Level for `supply_etl` targets
        pub etl_level: Level,
        /// One JSON object per event instead of text lines
        pub json_format: bool,
        /// Replaces the filter built from the two levels
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::WARN,
                etl_level: Level::INFO,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON events for log shippers. `--log-format json` in the binary.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                etl_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Stage SQL at debug level, dependencies at info.
        pub fn development() -> Self {
            Self {
                level: Level::INFO,
                etl_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn structured() -> Self {
            Self {
                level: Level::INFO,
                etl_level: Level::DEBUG,
                json_format: true,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_etl_level(mut self, level: Level) -> Self {
            self.etl_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Filter directive, e.g. `warn,supply_etl=info`.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},supply_etl={}",
                    self.level.as_str().to_lowercase(),
                    self.etl_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs the global subscriber. Events go to stderr so the run report
    /// on stdout stays machine-readable.
    ///
    /// A set `RUST_LOG` wins over `config`. Fails if a subscriber is already
    /// installed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use supply_etl::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::production()).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::setup::LoggingConfig;
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.base_level, Level::INFO);
        assert!(!config.log_stage_details);
        assert!(config.log_data_operations);
        assert!(!config.debug_enabled());
        assert_eq!(config.max_field_length, 256);
    }

    #[test]
    fn test_log_config_presets() {
        let verbose = LogConfig::verbose();
        assert!(verbose.debug_enabled());
        assert!(verbose.log_stage_details);

        let production = LogConfig::production();
        assert_eq!(production.base_level, Level::WARN);
        assert!(!production.log_data_operations);
        assert!(!production.debug_enabled());
    }

    #[test]
    fn test_truncate_field() {
        assert_eq!(truncate_field("hello", 10), "hello");
        assert_eq!(
            truncate_field("this is a very long text that should be truncated", 10),
            "this is a ...(truncated)"
        );
        // 'é' spans bytes 1..3, so a cut at 2 backs off to 1.
        assert_eq!(truncate_field("héllo", 2), "h...(truncated)");
    }

    #[test]
    fn test_config_truncates_long_source_globs() {
        let config = LogConfig {
            max_field_length: 16,
            ..LogConfig::default()
        };
        let description = "CSV source: 3 files (data/raw/sales/*.csv)";
        assert_eq!(config.truncate(description), "CSV source: 3 fi...(truncated)");
        assert_eq!(config.truncate("CSV source"), "CSV source");
    }

    #[test]
    fn test_env_filter_string() {
        assert_eq!(LoggingConfig::default().env_filter(), "warn,supply_etl=info");
        assert_eq!(
            LoggingConfig::development().env_filter(),
            "info,supply_etl=debug"
        );
        assert_eq!(
            LoggingConfig::default()
                .with_env_filter("supply_etl=trace")
                .env_filter(),
            "supply_etl=trace"
        );
    }
}
