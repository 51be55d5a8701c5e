//! Log output for the bench.
//!
//! Installs a global `tracing-subscriber` stack built from the `[application]`
//! section of [`BenchConfig`]. `RUST_LOG`, when set, wins over the configured
//! level. Installing twice is a no-op, so tests and embedding applications can
//! call [`init_from_config`] freely.
//!
//! Closing spans are logged with their duration when `log_span_timing` is on;
//! each `check`/`calibrate`/`measure` runs in a span carrying its token, so
//! this gives per-run timings.
//!
//! ```no_run
//! use rf_bench::{config::BenchConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BenchConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("bench ready");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::BenchConfig;
use crate::error::{AppResult, BenchError};

/// Console line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(BenchError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: pretty, compact, json",
                other
            ))),
        }
    }
}

/// Resolved subscriber settings.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Line format
    pub format: LogFormat,
    /// Log span close events with busy/idle time
    pub span_timing: bool,
    /// Include source file and line
    pub source_location: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            span_timing: false,
            source_location: false,
        }
    }
}

impl LoggingOptions {
    /// Options from the `[application]` section.
    pub fn from_config(config: &BenchConfig) -> AppResult<Self> {
        let app = &config.application;
        Ok(Self {
            level: parse_level(&app.log_level)?,
            format: app.log_format.parse()?,
            span_timing: app.log_span_timing,
            source_location: false,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()))
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_span_events(spans)
            .with_file(self.source_location)
            .with_line_number(self.source_location);

        match self.format {
            LogFormat::Pretty => base.pretty().with_filter(self.filter()).boxed(),
            LogFormat::Compact => base
                .compact()
                .with_ansi(false)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Json => base.json().with_filter(self.filter()).boxed(),
        }
    }
}

/// Install the subscriber described by the configuration.
pub fn init_from_config(config: &BenchConfig) -> AppResult<()> {
    init(LoggingOptions::from_config(config)?)
}

/// Install a subscriber. Returns Ok(()) if one is already installed.
pub fn init(options: LoggingOptions) -> AppResult<()> {
    match tracing_subscriber::registry().with(options.layer()).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(BenchError::Configuration(format!(
            "Failed to install log subscriber: {}",
            e
        ))),
    }
}

/// Parse a level name, case-insensitive.
pub fn parse_level(level: &str) -> AppResult<Level> {
    Level::from_str(level).map_err(|_| {
        BenchError::Configuration(format!(
            "Invalid log_level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(BenchError::Configuration(_))
        ));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = BenchConfig::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = "json".to_string();
        config.application.log_span_timing = true;

        let options = LoggingOptions::from_config(&config).unwrap();
        assert_eq!(options.level, Level::DEBUG);
        assert_eq!(options.format, LogFormat::Json);
        assert!(options.span_timing);
        assert!(!options.source_location);
    }
}
