//! Bench facade.
//!
//! The [`Orchestrator`] owns the instrument registry, the sequencer, the
//! calibration engine, the secondary parameter store and the last committed
//! result. Every hardware operation takes a caller-supplied [`Token`] that is
//! echoed in the [`BenchEvent`]s it produces.
//!
//! Hardware operations are serialized: a call that finds another one in
//! progress fails immediately with [`BenchError::Busy`]. Operations requested
//! before a successful `connect` fail with [`BenchError::NotConnected`] without
//! sending anything to the instruments.
//!
//! Transport faults end the operation, are logged and broadcast as
//! [`BenchEvent::RunFailed`], and are reported as `Ok(false)`. The previous
//! committed result is kept.
//!
//! Dropping a `measure` future mid-run commits nothing. The source is still
//! switched off by a teardown task spawned on the runtime, and the next
//! hardware operation waits for it. [`Orchestrator::cancel`] remains the
//! orderly way to stop a run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, info_span, warn, Instrument};

use crate::calibration::{CalibrationEngine, CalibrationResult, CalibrationStage};
use crate::config::BenchConfig;
use crate::error::{AppResult, BenchError};
use crate::events::{BenchEvent, Token};
use crate::hardware::{AddressMap, InstrumentRegistry};
use crate::parameter::{DeviceParams, ParameterSnapshot, SecondaryParameterStore};
use crate::result::{MeasureResult, ResultBuffer};
use crate::sequencer::{MeasurementSequencer, SequenceConfig, SweepSettings};

/// Capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Everything that talks to instruments, guarded by one async lock.
#[derive(Debug)]
struct Hardware {
    registry: InstrumentRegistry,
    sequencer: MeasurementSequencer,
    calibration: CalibrationEngine,
}

/// Facade composing discovery, calibration, measurement and parameters.
#[derive(Debug)]
pub struct Orchestrator {
    hardware: Mutex<Hardware>,
    params: RwLock<SecondaryParameterStore>,
    params_path: PathBuf,
    devices: DeviceParams,
    result: RwLock<MeasureResult>,
    found: AtomicBool,
    present: AtomicBool,
    cancel: AtomicBool,
    events: broadcast::Sender<BenchEvent>,
}

impl Orchestrator {
    /// Compose a bench from its parts.
    pub fn new(
        registry: InstrumentRegistry,
        params: SecondaryParameterStore,
        params_path: impl Into<PathBuf>,
        sequence: SequenceConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            hardware: Mutex::new(Hardware {
                registry,
                sequencer: MeasurementSequencer::new(sequence),
                calibration: CalibrationEngine::new(),
            }),
            params: RwLock::new(params),
            params_path: params_path.into(),
            devices: DeviceParams::default(),
            result: RwLock::new(MeasureResult::default()),
            found: AtomicBool::new(false),
            present: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            events,
        }
    }

    /// Build from configuration, loading secondary parameters from the
    /// configured file (defaults apply if it is missing).
    pub fn from_config(config: &BenchConfig, registry: InstrumentRegistry) -> Self {
        let path = &config.storage.params_file;
        Self::new(
            registry,
            SecondaryParameterStore::from_file(path),
            path,
            config.sequence.clone(),
        )
    }

    /// Replace the device table.
    pub fn with_devices(mut self, devices: DeviceParams) -> Self {
        self.devices = devices;
        self
    }

    // =========================================================================
    // Hardware operations
    // =========================================================================

    /// Run discovery against `addresses`. Waits for any running operation.
    pub async fn connect(&self, addresses: &AddressMap) -> bool {
        let mut hw = self.hardware.lock().await;
        let found = hw.registry.connect(addresses).await;
        self.found.store(found, Ordering::SeqCst);
        if !found {
            self.present.store(false, Ordering::SeqCst);
            warn!("not every instrument answered discovery");
        }
        found
    }

    /// Drop the instrument handles.
    pub async fn disconnect(&self) {
        let mut hw = self.hardware.lock().await;
        hw.registry.disconnect();
        self.found.store(false, Ordering::SeqCst);
        self.present.store(false, Ordering::SeqCst);
    }

    /// Reset both instruments and report whether `device` is present.
    pub async fn check(&self, token: &Token, device: &str) -> AppResult<bool> {
        let mut hw = self.try_hardware()?;
        hw.registry.ensure_found()?;
        self.devices.get(device)?;

        let Hardware {
            registry,
            sequencer,
            ..
        } = &mut *hw;
        let outcome = sequencer
            .check(registry)
            .instrument(info_span!("check", %token, device))
            .await;

        let present = self.conclude(token, "check", outcome)?.unwrap_or(false);
        self.present.store(present, Ordering::SeqCst);
        Ok(present)
    }

    /// Run every calibration stage for `device`.
    pub async fn calibrate(&self, token: &Token, device: &str) -> AppResult<bool> {
        let mut hw = self.try_hardware()?;
        hw.registry.ensure_found()?;
        self.devices.get(device)?;
        let settings = SweepSettings::from_snapshot(&self.secondary_params())?;

        let Hardware {
            registry,
            calibration,
            ..
        } = &mut *hw;
        let outcome = calibration
            .calibrate_all(registry, &settings)
            .instrument(info_span!("calibrate", %token, device))
            .await;

        Ok(self.conclude(token, "calibration", outcome)?.unwrap_or(false))
    }

    /// Run a single calibration stage.
    pub async fn calibrate_stage(&self, token: &Token, stage: CalibrationStage) -> AppResult<bool> {
        let mut hw = self.try_hardware()?;
        hw.registry.ensure_found()?;
        let settings = SweepSettings::from_snapshot(&self.secondary_params())?;

        let Hardware {
            registry,
            calibration,
            ..
        } = &mut *hw;
        let outcome = calibration
            .calibrate_stage(registry, stage, &settings)
            .instrument(info_span!("calibrate", %token, %stage))
            .await;

        Ok(self.conclude(token, "calibration", outcome)?.unwrap_or(false))
    }

    /// Run the measurement sequence for `device`.
    ///
    /// Returns `Ok(true)` once the new result is committed. A fault or a
    /// cancellation returns `Ok(false)` and leaves the previous result in place.
    pub async fn measure(&self, token: &Token, device: &str) -> AppResult<bool> {
        let mut hw = self.try_hardware()?;
        hw.registry.ensure_found()?;
        let primary = self.devices.get(device)?.clone();
        let secondary = self.secondary_params();
        let settings = SweepSettings::from_snapshot(&secondary)?;

        self.cancel.store(false, Ordering::SeqCst);
        let mut buffer = ResultBuffer::begin(device, secondary, primary);
        let events = &self.events;

        let Hardware {
            registry,
            sequencer,
            ..
        } = &mut *hw;
        let outcome = sequencer
            .measure(registry, &settings, &mut buffer, &self.cancel, |point| {
                let _ = events.send(BenchEvent::PointReady {
                    token: token.clone(),
                    point: *point,
                });
            })
            .instrument(info_span!("measure", %token, device))
            .await;

        if self.conclude(token, "measurement", outcome)?.is_none() {
            return Ok(false);
        }

        let result = buffer.commit();
        info!(%token, points = result.len(), "measurement committed");
        *self.result.write().unwrap_or_else(PoisonError::into_inner) = result;
        let _ = self.events.send(BenchEvent::ResultsChanged {
            token: token.clone(),
        });
        Ok(true)
    }

    /// Ask the running measurement to stop before its next iteration.
    pub fn cancel(&self) {
        info!("cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Per-instrument status lines. Waits for any running operation.
    pub async fn status(&self) -> Vec<String> {
        let hw = self.hardware.lock().await;
        hw.registry.status().collect()
    }

    /// Latest result of a calibration stage.
    pub async fn calibration_result(&self, stage: CalibrationStage) -> Option<CalibrationResult> {
        let hw = self.hardware.lock().await;
        hw.calibration.result(stage).cloned()
    }

    fn try_hardware(&self) -> AppResult<tokio::sync::MutexGuard<'_, Hardware>> {
        self.hardware.try_lock().map_err(|_| {
            warn!("hardware operation rejected, another one is running");
            BenchError::Busy
        })
    }

    /// Turn run-ending faults into `Ok(None)` plus a `RunFailed` event.
    fn conclude<T>(&self, token: &Token, what: &str, outcome: AppResult<T>) -> AppResult<Option<T>> {
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_transport() || matches!(e, BenchError::Cancelled) => {
                error!(%token, error = %e, "{} aborted", what);
                let _ = self.events.send(BenchEvent::RunFailed {
                    token: token.clone(),
                    reason: e.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Parameters and results
    // =========================================================================

    /// Apply a batch of secondary parameter changes atomically.
    pub fn on_secondary_changed(&self, changes: &ParameterSnapshot) -> AppResult<()> {
        let snapshot = {
            let mut store = self.params.write().unwrap_or_else(PoisonError::into_inner);
            store.apply(changes)?;
            store.snapshot()
        };
        let _ = self.events.send(BenchEvent::ParametersChanged { snapshot });
        Ok(())
    }

    /// Change one secondary parameter.
    pub fn set_secondary(&self, name: &str, value: f64) -> AppResult<()> {
        self.on_secondary_changed(&ParameterSnapshot::from([(name.to_string(), value)]))
    }

    /// Persist the secondary parameters to the configured file.
    pub fn save_configs(&self) -> AppResult<()> {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .save(&self.params_path)
    }

    /// Path used by `save_configs`.
    pub fn params_path(&self) -> &Path {
        &self.params_path
    }

    /// Current secondary parameter values.
    pub fn secondary_params(&self) -> ParameterSnapshot {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Copy of the parameter store, labels and ranges included.
    pub fn parameter_store(&self) -> SecondaryParameterStore {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last committed result.
    pub fn result(&self) -> MeasureResult {
        self.result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a complete result has been committed.
    pub fn has_result(&self) -> bool {
        self.result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_complete()
    }

    /// Known devices.
    pub fn devices(&self) -> &DeviceParams {
        &self.devices
    }

    /// Whether the last discovery found every instrument.
    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::SeqCst)
    }

    /// Whether the last check reported the device present.
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Subscribe to bench events.
    pub fn subscribe(&self) -> broadcast::Receiver<BenchEvent> {
        self.events.subscribe()
    }
}
