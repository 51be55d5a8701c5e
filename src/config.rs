//! Bench Configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. `config/bench.toml` (or any file passed to [`BenchConfig::load_from`])
//! 3. Environment variables prefixed with `RF_BENCH_`, sections split by `__`
//!
//! Every field has a default, so a missing file yields a working config.
//!
//! # Example
//! ```no_run
//! use rf_bench::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! println!("Analyzer at {}", config.instruments.analyzer);
//! # Ok::<(), rf_bench::error::BenchError>(())
//! ```
//!
//! Override from the environment:
//! `RF_BENCH_APPLICATION__LOG_LEVEL=debug`

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, BenchError};
use crate::hardware::{AddressMap, InstrumentRole};
use crate::logging::{self, LogFormat};
use crate::sequencer::SequenceConfig;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument addresses
    pub instruments: InstrumentsConfig,
    /// Sweep sequence
    pub sequence: SequenceConfig,
    /// Persistence paths
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console format (pretty, compact, json)
    pub log_format: String,
    /// Log span durations on close
    pub log_span_timing: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "RF Bench".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            log_span_timing: false,
        }
    }
}

/// Resource addresses of the bench instruments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Network analyzer address
    pub analyzer: String,
    /// Power source address
    pub source: String,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            analyzer: "GPIB1::9::INSTR".to_string(),
            source: "GPIB1::4::INSTR".to_string(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Secondary parameter file
    pub params_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            params_file: PathBuf::from("params.ini"),
        }
    }
}

impl BenchConfig {
    /// Load from `config/bench.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RF_BENCH_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        logging::parse_level(&self.application.log_level)?;
        self.application.log_format.parse::<LogFormat>()?;

        if self.sequence.power_pattern_dbm.is_empty() {
            return Err(BenchError::Configuration(
                "sequence.power_pattern_dbm must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .sequence
            .power_pattern_dbm
            .iter()
            .find(|p| !p.is_finite())
        {
            return Err(BenchError::Configuration(format!(
                "Invalid power in sequence.power_pattern_dbm: {}",
                bad
            )));
        }

        for (role, address) in self.addresses() {
            if address.trim().is_empty() {
                return Err(BenchError::Configuration(format!(
                    "Missing address for {}",
                    role
                )));
            }
        }

        Ok(())
    }

    /// Instrument addresses keyed by role.
    pub fn addresses(&self) -> AddressMap {
        AddressMap::from([
            (InstrumentRole::Analyzer, self.instruments.analyzer.clone()),
            (InstrumentRole::Source, self.instruments.source.clone()),
        ])
    }
}
