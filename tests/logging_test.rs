//! Global subscriber installation. Kept in its own test binary so nothing
//! else races for the global dispatcher.

use rf_bench::config::BenchConfig;
use rf_bench::logging::{self, LogFormat, LoggingOptions};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    let options = LoggingOptions {
        level: Level::DEBUG,
        format: LogFormat::Json,
        span_timing: true,
        source_location: true,
    };
    assert!(logging::init(options).is_ok());
    assert!(logging::init(LoggingOptions::default()).is_ok());
    assert!(logging::init_from_config(&BenchConfig::default()).is_ok());
}

#[test]
fn bad_level_is_rejected_before_init() {
    let mut config = BenchConfig::default();
    config.application.log_level = "chatty".to_string();
    assert!(logging::init_from_config(&config).is_err());
}
