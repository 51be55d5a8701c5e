//! Measurement sequencing.
//!
//! The [`MeasurementSequencer`] drives the analyzer and the source through a
//! fixed characterization sequence:
//!
//! ```text
//! Idle ──measure──> Initializing ──> Sweeping ⇄ Collecting ──> Idle (Done | Failed | Cancelled)
//!  │                    ▲
//!  └──────check─────────┘ (reset only, back to Idle)
//! ```
//!
//! Configuration of both instruments and the sweep loop run inside an
//! "output armed" scope: whatever happens in between, the source output is
//! switched off and the analyzer returned to preset before `measure` returns.
//! If the `measure` future is dropped instead, the same teardown is spawned on
//! the runtime and holds the registry session until it completes.
//!
//! The sweep pattern and settle delays come from [`SequenceConfig`]. Settle
//! delays are skipped when the analyzer is simulated.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, BenchError};
use crate::hardware::capabilities::RESET_COMMAND;
use crate::hardware::{InstrumentHandle, InstrumentRegistry, InstrumentRole, ScpiInstrument};
use crate::parameter::{names, ParameterSnapshot};
use crate::result::{MeasurePoint, ResultBuffer};
use crate::scpi;
use crate::units::{ghz_to_hz, ma_to_a};

// =============================================================================
// Configuration
// =============================================================================

/// Tunable parts of the sweep sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Analyzer source power per iteration, dBm. One point per entry.
    pub power_pattern_dbm: Vec<f64>,
    /// Delay after the operation-complete acknowledgement, ms
    pub trigger_settle_ms: u64,
    /// Delay after changing source power, ms
    pub power_settle_ms: u64,
    /// Delay after applying the magnitude correction, ms
    pub correction_settle_ms: u64,
    /// Trace magnitude offset applied each iteration, dB
    pub magnitude_offset_db: f64,
    /// Trace magnitude slope applied each iteration
    pub magnitude_slope: f64,
}

impl SequenceConfig {
    /// Pattern alternating between `first` and `second`, `iterations` long.
    pub fn alternating(first: f64, second: f64, iterations: usize) -> Vec<f64> {
        (0..iterations)
            .map(|i| if i % 2 == 0 { first } else { second })
            .collect()
    }

    /// Number of points a run produces.
    pub fn iterations(&self) -> usize {
        self.power_pattern_dbm.len()
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            power_pattern_dbm: Self::alternating(-15.0, -16.0, 16),
            trigger_settle_ms: 500,
            power_settle_ms: 500,
            correction_settle_ms: 100,
            magnitude_offset_db: 0.0,
            magnitude_slope: 0.0,
        }
    }
}

/// Secondary parameters converted to instrument units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSettings {
    /// Analyzer sweep points
    pub sweep_points: u32,
    /// Start frequency, Hz
    pub f_min_hz: f64,
    /// Stop frequency, Hz
    pub f_max_hz: f64,
    /// Analyzer source power, dBm
    pub p_in_dbm: f64,
    /// Supply voltage, V
    pub src_u_v: f64,
    /// Supply current limit, A
    pub src_i_max_a: f64,
}

impl SweepSettings {
    /// Extract and convert the sweep settings from a parameter snapshot.
    pub fn from_snapshot(secondary: &ParameterSnapshot) -> AppResult<Self> {
        let get = |name: &str| {
            secondary
                .get(name)
                .copied()
                .ok_or_else(|| BenchError::UnknownParameter(name.to_string()))
        };
        Ok(Self {
            sweep_points: get(names::SWEEP_POINTS)?.round().max(1.0) as u32,
            f_min_hz: ghz_to_hz(get(names::F_MIN)?),
            f_max_hz: ghz_to_hz(get(names::F_MAX)?),
            p_in_dbm: get(names::P_IN)?,
            src_u_v: get(names::SRC_U)?,
            src_i_max_a: ma_to_a(get(names::SRC_I_MAX)?),
        })
    }
}

// =============================================================================
// State
// =============================================================================

/// Sequencer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    /// Nothing running
    Idle,
    /// Resetting or configuring instruments
    Initializing,
    /// Stepping the analyzer through the power pattern
    Sweeping,
    /// Recording a sample
    Collecting,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "Idle"),
            SequencerState::Initializing => write!(f, "Initializing"),
            SequencerState::Sweeping => write!(f, "Sweeping"),
            SequencerState::Collecting => write!(f, "Collecting"),
        }
    }
}

/// How the last measurement run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every iteration completed and the hardware was de-energized
    Done,
    /// A transport fault aborted the run
    Failed,
    /// The cancellation flag stopped the run between iterations
    Cancelled,
}

// =============================================================================
// Sequencer
// =============================================================================

/// Drives both instruments through check and measure sequences.
#[derive(Debug)]
pub struct MeasurementSequencer {
    config: SequenceConfig,
    state: SequencerState,
    last_outcome: Option<RunOutcome>,
}

impl MeasurementSequencer {
    /// Create an idle sequencer.
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            state: SequencerState::Idle,
            last_outcome: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Outcome of the most recent `measure`.
    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    /// Reset both instruments and report device presence.
    ///
    /// Presence is always reported: there is no self-test yet.
    pub async fn check(&mut self, registry: &InstrumentRegistry) -> AppResult<bool> {
        registry.ensure_found()?;
        let source = registry.get(InstrumentRole::Source)?;
        let analyzer = registry.get(InstrumentRole::Analyzer)?;
        let _session = registry.session().await;

        self.state = SequencerState::Initializing;
        let reset = async {
            source.send(RESET_COMMAND).await?;
            analyzer.send(RESET_COMMAND).await
        }
        .await;
        self.state = SequencerState::Idle;

        reset?;
        Ok(true)
    }

    /// Run the full measurement sequence, appending one point per pattern entry.
    ///
    /// `cancel` is polled between iterations. `on_point` is called after each
    /// sample is recorded.
    pub async fn measure<F>(
        &mut self,
        registry: &InstrumentRegistry,
        settings: &SweepSettings,
        buffer: &mut ResultBuffer,
        cancel: &AtomicBool,
        mut on_point: F,
    ) -> AppResult<()>
    where
        F: FnMut(&MeasurePoint) + Send,
    {
        registry.ensure_found()?;
        let analyzer = registry.shared(InstrumentRole::Analyzer)?;
        let source = registry.shared(InstrumentRole::Source)?;
        let session = registry.session().await;

        info!(
            points = self.config.iterations(),
            f_min_hz = settings.f_min_hz,
            f_max_hz = settings.f_max_hz,
            "starting measurement"
        );
        self.state = SequencerState::Initializing;

        let config = self.config.clone();
        let state = &mut self.state;
        let outcome = with_output_armed(analyzer, source, session, async {
            configure_analyzer(&**analyzer, settings).await?;
            configure_source(&**source, settings).await?;
            sweep(&**analyzer, &config, state, buffer, cancel, &mut on_point).await
        })
        .await;

        self.state = SequencerState::Idle;
        self.last_outcome = Some(match &outcome {
            Ok(()) => RunOutcome::Done,
            Err(BenchError::Cancelled) => RunOutcome::Cancelled,
            Err(_) => RunOutcome::Failed,
        });
        info!(outcome = ?self.last_outcome, "measurement finished");
        outcome
    }
}

impl Default for MeasurementSequencer {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}

// =============================================================================
// Sequence steps
// =============================================================================

/// Run `body`, then de-energize the source and preset the analyzer.
///
/// Teardown runs on every exit path of `body`, including the enclosing future
/// being dropped. A body error takes precedence over a teardown error.
async fn with_output_armed<Fut>(
    analyzer: &Arc<InstrumentHandle>,
    source: &Arc<InstrumentHandle>,
    session: OwnedMutexGuard<()>,
    body: Fut,
) -> AppResult<()>
where
    Fut: Future<Output = AppResult<()>>,
{
    let guard = TeardownGuard::arm(analyzer, source, session);
    let result = body.await;
    let teardown = de_energize(&**analyzer, &**source).await;
    guard.disarm();
    result.and(teardown)
}

/// Switch the source output off, then preset the analyzer.
///
/// Both commands are attempted even if the first fails.
async fn de_energize<I: ScpiInstrument>(analyzer: &I, source: &I) -> AppResult<()> {
    let output_off = source.send(scpi::OUTPUT_OFF).await;
    if let Err(e) = &output_off {
        error!(error = %e, "failed to switch source output off");
    }
    let preset = analyzer.send(scpi::SYSTEM_PRESET).await;
    if let Err(e) = &preset {
        warn!(error = %e, "failed to preset analyzer after run");
    }
    output_off.and(preset)
}

/// Spawns [`de_energize`] if dropped before [`TeardownGuard::disarm`].
///
/// The spawned task keeps the session so the next sequence starts only after
/// the instruments are safe.
struct TeardownGuard {
    armed: Option<(Arc<InstrumentHandle>, Arc<InstrumentHandle>, OwnedMutexGuard<()>)>,
}

impl TeardownGuard {
    fn arm(
        analyzer: &Arc<InstrumentHandle>,
        source: &Arc<InstrumentHandle>,
        session: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            armed: Some((Arc::clone(analyzer), Arc::clone(source), session)),
        }
    }

    fn disarm(mut self) {
        self.armed = None;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some((analyzer, source, session)) = self.armed.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("measurement abandoned outside a runtime, source output may still be on");
            return;
        };
        warn!("measurement abandoned mid-run, de-energizing in the background");
        runtime.spawn(async move {
            let _session = session;
            if de_energize(&*analyzer, &*source).await.is_ok() {
                info!("abandoned measurement torn down");
            }
        });
    }
}

async fn configure_analyzer<I: ScpiInstrument>(analyzer: &I, s: &SweepSettings) -> AppResult<()> {
    debug!(address = analyzer.address(), "configuring analyzer");
    analyzer.send(scpi::SYSTEM_PRESET).await?;
    analyzer.wait_complete().await?;
    analyzer.send(scpi::FACTORY_PRESET).await?;
    analyzer.send(scpi::DEFINE_S11_TRACE).await?;
    analyzer.send(scpi::DISPLAY_WINDOW_ON).await?;
    analyzer.send(scpi::DISPLAY_FEED_S11).await?;
    analyzer.send(&scpi::source_power(s.p_in_dbm)).await?;
    analyzer.send(&scpi::sweep_points(s.sweep_points)).await?;
    analyzer.send(&scpi::start_frequency(s.f_min_hz)).await?;
    analyzer.send(&scpi::stop_frequency(s.f_max_hz)).await?;
    analyzer.send(scpi::SWEEP_CONTINUOUS).await?;
    analyzer.send(scpi::FORMAT_ASCII).await
}

async fn configure_source<I: ScpiInstrument>(source: &I, s: &SweepSettings) -> AppResult<()> {
    debug!(address = source.address(), "configuring source");
    source.send(scpi::SELECT_OUTPUT_1).await?;
    source.send(&scpi::apply(s.src_u_v, s.src_i_max_a)).await?;
    source.send(scpi::OUTPUT_ON).await
}

async fn sweep<I, F>(
    analyzer: &I,
    config: &SequenceConfig,
    state: &mut SequencerState,
    buffer: &mut ResultBuffer,
    cancel: &AtomicBool,
    on_point: &mut F,
) -> AppResult<()>
where
    I: ScpiInstrument,
    F: FnMut(&MeasurePoint),
{
    let simulated = analyzer.is_simulated();
    let offset = scpi::magnitude_offset(config.magnitude_offset_db);
    let slope = scpi::magnitude_slope(config.magnitude_slope);

    for &power in &config.power_pattern_dbm {
        if cancel.load(Ordering::SeqCst) {
            warn!(collected = buffer.points().len(), "measurement cancelled");
            return Err(BenchError::Cancelled);
        }
        *state = SequencerState::Sweeping;

        analyzer.send(scpi::SELECT_S11_TRACE).await?;
        analyzer.wait_complete().await?;
        settle(simulated, config.trigger_settle_ms).await;

        analyzer.send(&scpi::source_power(power)).await?;
        settle(simulated, config.power_settle_ms).await;

        analyzer.send(&offset).await?;
        analyzer.send(&slope).await?;
        settle(simulated, config.correction_settle_ms).await;

        analyzer.send(scpi::AUTOSCALE).await?;

        *state = SequencerState::Collecting;
        let point = buffer.push(power);
        debug!(index = point.index, power_dbm = point.power_dbm, "measured point");
        on_point(&point);
    }
    Ok(())
}

async fn settle(simulated: bool, millis: u64) {
    if !simulated && millis > 0 {
        sleep(Duration::from_millis(millis)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{default_addresses, DriverType, SimulatedInstrument};
    use crate::parameter::{PrimaryParams, SecondaryParameterStore};

    async fn connected() -> (InstrumentRegistry, SimulatedInstrument, SimulatedInstrument) {
        let analyzer = SimulatedInstrument::analyzer();
        let source = SimulatedInstrument::source();
        let mut registry = InstrumentRegistry::new()
            .with_driver(InstrumentRole::Analyzer, DriverType::Simulated(analyzer.clone()))
            .with_driver(InstrumentRole::Source, DriverType::Simulated(source.clone()));
        assert!(registry.connect(&default_addresses()).await);
        (registry, analyzer, source)
    }

    fn settings() -> SweepSettings {
        SweepSettings::from_snapshot(&SecondaryParameterStore::with_defaults().snapshot()).unwrap()
    }

    fn buffer() -> ResultBuffer {
        ResultBuffer::begin("receiver", ParameterSnapshot::new(), PrimaryParams::new())
    }

    #[test]
    fn test_default_pattern() {
        let config = SequenceConfig::default();
        assert_eq!(config.iterations(), 16);
        assert_eq!(&config.power_pattern_dbm[..4], &[-15.0, -16.0, -15.0, -16.0]);
    }

    #[test]
    fn test_settings_conversion() {
        let mut store = SecondaryParameterStore::with_defaults();
        store.set(names::F_MIN, 2.5).unwrap();
        let s = SweepSettings::from_snapshot(&store.snapshot()).unwrap();
        assert_eq!(s.f_min_hz, 2_500_000_000.0);
        assert_eq!(s.f_max_hz, 2_000_000_000.0);
        assert_eq!(s.src_i_max_a, 0.06);
        assert_eq!(s.sweep_points, 401);
    }

    #[test]
    fn test_settings_missing_parameter() {
        let snapshot = ParameterSnapshot::from([("f_min".to_string(), 1.0)]);
        assert!(matches!(
            SweepSettings::from_snapshot(&snapshot),
            Err(BenchError::UnknownParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_check_resets_both() {
        let (registry, analyzer, source) = connected().await;
        let mut seq = MeasurementSequencer::default();
        assert!(seq.check(&registry).await.unwrap());
        assert_eq!(source.command_log(), vec!["*RST".to_string()]);
        assert_eq!(analyzer.command_log(), vec!["*RST".to_string()]);
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[tokio::test]
    async fn test_measure_collects_pattern() {
        let (registry, analyzer, source) = connected().await;
        let mut seq = MeasurementSequencer::default();
        let mut buf = buffer();
        let mut seen = Vec::new();

        seq.measure(&registry, &settings(), &mut buf, &AtomicBool::new(false), |p| {
            seen.push(p.index)
        })
        .await
        .unwrap();

        assert_eq!(buf.points().len(), 16);
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        assert_eq!(seq.last_outcome(), Some(RunOutcome::Done));
        assert!(!source.output_enabled());
        assert_eq!(analyzer.command_log().last().unwrap(), "SYST:PRES");

        let log = source.command_log();
        assert_eq!(log, vec!["INST:SEL OUTP1", "APPLY 3.3V,0.06A", "OUTP ON", "OUTP OFF"]);
    }

    #[tokio::test]
    async fn test_fault_still_tears_down() {
        let (registry, analyzer, source) = connected().await;
        analyzer.fail_on("SOUR1:POW1 -16");
        let mut seq = MeasurementSequencer::default();
        let mut buf = buffer();

        let err = seq
            .measure(&registry, &settings(), &mut buf, &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(buf.points().len(), 1);
        assert_eq!(seq.last_outcome(), Some(RunOutcome::Failed));
        assert!(!source.output_enabled());
        assert_eq!(source.command_log().last().unwrap(), "OUTP OFF");
        assert_eq!(analyzer.command_log().last().unwrap(), "SYST:PRES");
    }

    #[tokio::test]
    async fn test_cancel_before_first_point() {
        let (registry, _analyzer, source) = connected().await;
        let mut seq = MeasurementSequencer::default();
        let mut buf = buffer();

        let err = seq
            .measure(&registry, &settings(), &mut buf, &AtomicBool::new(true), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Cancelled));
        assert!(buf.points().is_empty());
        assert_eq!(seq.last_outcome(), Some(RunOutcome::Cancelled));
        assert!(!source.output_enabled());
    }

    #[tokio::test]
    async fn test_measure_requires_discovery() {
        let analyzer = SimulatedInstrument::analyzer();
        let registry = InstrumentRegistry::new()
            .with_driver(InstrumentRole::Analyzer, DriverType::Simulated(analyzer.clone()));
        let mut seq = MeasurementSequencer::default();
        let mut buf = buffer();

        let err = seq
            .measure(&registry, &settings(), &mut buf, &AtomicBool::new(false), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::NotConnected));
        assert!(analyzer.command_log().is_empty());
    }
}
