//! Three-stage calibration.
//!
//! The LO, RF and Mod stages are independent and may run in any order. Each
//! stage presets the analyzer, waits for operation complete, performs its own
//! setup and stores a [`CalibrationResult`]. Repeating a stage overwrites its
//! previous result; results never expire.
//!
//! Correction tables are produced empty. They are an extension point: the
//! sequencer applies the fixed offset/slope from `SequenceConfig` and does not
//! read these tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};

use crate::error::AppResult;
use crate::hardware::{InstrumentRegistry, InstrumentRole, ScpiInstrument};
use crate::scpi;
use crate::sequencer::SweepSettings;

/// Calibration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CalibrationStage {
    /// Local oscillator path
    Lo,
    /// RF input path
    Rf,
    /// Modulation generator
    Mod,
}

impl CalibrationStage {
    /// All stages in the order `calibrate_all` runs them.
    pub const ALL: [CalibrationStage; 3] =
        [CalibrationStage::Lo, CalibrationStage::Rf, CalibrationStage::Mod];
}

impl std::fmt::Display for CalibrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationStage::Lo => write!(f, "LO"),
            CalibrationStage::Rf => write!(f, "RF"),
            CalibrationStage::Mod => write!(f, "Mod"),
        }
    }
}

/// Correction value (dB) per frequency (Hz).
pub type CorrectionTable = BTreeMap<u64, f64>;

/// Output of one calibration stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Stage that produced the table
    pub stage: CalibrationStage,
    /// Corrections
    pub corrections: CorrectionTable,
    /// Completion time
    pub calibrated_at: DateTime<Utc>,
}

/// Runs calibration stages and keeps their latest results.
#[derive(Debug, Default)]
pub struct CalibrationEngine {
    results: HashMap<CalibrationStage, CalibrationResult>,
}

impl CalibrationEngine {
    /// Engine with no stored results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one stage. A transport fault aborts the stage and leaves its
    /// previous result (and every other stage's result) untouched.
    #[instrument(skip(self, registry, settings))]
    pub async fn calibrate_stage(
        &mut self,
        registry: &InstrumentRegistry,
        stage: CalibrationStage,
        settings: &SweepSettings,
    ) -> AppResult<bool> {
        registry.ensure_found()?;
        let analyzer = registry.get(InstrumentRole::Analyzer)?;
        let source = registry.get(InstrumentRole::Source)?;
        let _session = registry.session().await;

        analyzer.send(scpi::SYSTEM_PRESET).await?;
        analyzer.wait_complete().await?;

        match stage {
            CalibrationStage::Lo => {
                analyzer.send(&scpi::start_frequency(settings.f_min_hz)).await?;
                analyzer.send(&scpi::stop_frequency(settings.f_max_hz)).await?;
                analyzer.wait_complete().await?;
            }
            CalibrationStage::Rf => {
                analyzer.send(&scpi::source_power(settings.p_in_dbm)).await?;
                analyzer.wait_complete().await?;
            }
            CalibrationStage::Mod => {
                source.send(scpi::SELECT_OUTPUT_1).await?;
                source.wait_complete().await?;
            }
        }

        // No compensation model yet.
        let corrections = CorrectionTable::new();

        info!(%stage, entries = corrections.len(), "calibration stage complete");
        self.results.insert(
            stage,
            CalibrationResult {
                stage,
                corrections,
                calibrated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Run every stage in order, stopping at the first fault.
    pub async fn calibrate_all(
        &mut self,
        registry: &InstrumentRegistry,
        settings: &SweepSettings,
    ) -> AppResult<bool> {
        let mut ok = true;
        for stage in CalibrationStage::ALL {
            ok &= self.calibrate_stage(registry, stage, settings).await?;
        }
        Ok(ok)
    }

    /// Latest result for `stage`.
    pub fn result(&self, stage: CalibrationStage) -> Option<&CalibrationResult> {
        self.results.get(&stage)
    }

    /// Whether `stage` has been calibrated.
    pub fn is_calibrated(&self, stage: CalibrationStage) -> bool {
        self.results.contains_key(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::hardware::{default_addresses, DriverType, SimulatedInstrument};
    use crate::parameter::SecondaryParameterStore;

    async fn connected(
        analyzer: &SimulatedInstrument,
        source: &SimulatedInstrument,
    ) -> InstrumentRegistry {
        let mut registry = InstrumentRegistry::new()
            .with_driver(InstrumentRole::Analyzer, DriverType::Simulated(analyzer.clone()))
            .with_driver(InstrumentRole::Source, DriverType::Simulated(source.clone()));
        registry.connect(&default_addresses()).await;
        registry
    }

    fn settings() -> SweepSettings {
        SweepSettings::from_snapshot(&SecondaryParameterStore::with_defaults().snapshot()).unwrap()
    }

    #[tokio::test]
    async fn test_calibrate_all_stores_every_stage() {
        let (analyzer, source) = (SimulatedInstrument::analyzer(), SimulatedInstrument::source());
        let registry = connected(&analyzer, &source).await;
        let mut engine = CalibrationEngine::new();

        assert!(engine.calibrate_all(&registry, &settings()).await.unwrap());
        for stage in CalibrationStage::ALL {
            let result = engine.result(stage).unwrap();
            assert_eq!(result.stage, stage);
            assert!(result.corrections.is_empty());
        }
        assert!(analyzer
            .command_log()
            .contains(&"SENS1:FREQ:STAR 1000000000Hz".to_string()));
        assert_eq!(source.command_log(), vec!["INST:SEL OUTP1", "*OPC?"]);
    }

    #[tokio::test]
    async fn test_stage_fault_keeps_other_results() {
        let (analyzer, source) = (SimulatedInstrument::analyzer(), SimulatedInstrument::source());
        let registry = connected(&analyzer, &source).await;
        let mut engine = CalibrationEngine::new();

        engine
            .calibrate_stage(&registry, CalibrationStage::Lo, &settings())
            .await
            .unwrap();
        let lo_time = engine.result(CalibrationStage::Lo).unwrap().calibrated_at;

        source.fail_on("INST:SEL");
        let err = engine
            .calibrate_stage(&registry, CalibrationStage::Mod, &settings())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!engine.is_calibrated(CalibrationStage::Mod));
        assert_eq!(
            engine.result(CalibrationStage::Lo).unwrap().calibrated_at,
            lo_time
        );
    }

    #[tokio::test]
    async fn test_repeat_overwrites() {
        let (analyzer, source) = (SimulatedInstrument::analyzer(), SimulatedInstrument::source());
        let registry = connected(&analyzer, &source).await;
        let mut engine = CalibrationEngine::new();

        engine
            .calibrate_stage(&registry, CalibrationStage::Rf, &settings())
            .await
            .unwrap();
        let first = engine.result(CalibrationStage::Rf).unwrap().calibrated_at;
        engine
            .calibrate_stage(&registry, CalibrationStage::Rf, &settings())
            .await
            .unwrap();
        assert!(engine.result(CalibrationStage::Rf).unwrap().calibrated_at >= first);
    }

    #[tokio::test]
    async fn test_not_connected_sends_nothing() {
        let (analyzer, source) = (SimulatedInstrument::analyzer(), SimulatedInstrument::source());
        source.set_reachable(false);
        let registry = connected(&analyzer, &source).await;
        let mut engine = CalibrationEngine::new();

        let err = engine.calibrate_all(&registry, &settings()).await.unwrap_err();
        assert!(matches!(err, BenchError::NotConnected));
        assert!(analyzer.command_log().is_empty());
        assert!(source.command_log().is_empty());
    }
}
