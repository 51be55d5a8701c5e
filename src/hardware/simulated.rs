//! Simulated Instruments
//!
//! Stand-ins for the analyzer and the source that need no hardware.
//! All simulated latency uses `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! A [`SimulatedInstrument`] keeps its state behind an `Arc`, so clones share a
//! single command log. Tests keep one clone and hand another to the registry;
//! after a run, the log shows exactly what the sequencer sent.
//!
//! Besides recording, the simulation:
//! - answers `*OPC?` with `1` and `*IDN?` with the model string
//! - tracks the output state (`OUTP ON`/`OUTP OFF`, reset by `*RST`)
//! - perturbs applied magnitude offsets with uniform noise, so that display
//!   corrections look like a real trace
//! - injects transport faults on demand

use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::error::{AppResult, BenchError};
use crate::hardware::capabilities::{
    ScpiInstrument, IDENTIFY_QUERY, OPERATION_COMPLETE_QUERY, RESET_COMMAND,
};
use crate::hardware::InstrumentRole;

#[derive(Debug, Default)]
struct SimState {
    log: Vec<String>,
    fail_on: Option<String>,
    output_enabled: bool,
    magnitude_offset_db: f64,
}

#[derive(Debug)]
struct SimShared {
    model: String,
    reachable: AtomicBool,
    latency: Duration,
    noise_db: f64,
    state: Mutex<SimState>,
}

/// Simulated SCPI instrument.
///
/// # Example
///
/// ```rust,ignore
/// let analyzer = SimulatedInstrument::new("SIM-PNA");
/// analyzer.fail_on("SENS1:FREQ:STAR");
/// // ... run a measurement ...
/// assert!(!analyzer.output_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedInstrument {
    role: InstrumentRole,
    address: String,
    shared: Arc<SimShared>,
}

impl SimulatedInstrument {
    /// Create a reachable simulated instrument with no latency.
    pub fn new(model: impl Into<String>) -> Self {
        Self::build(model.into(), Duration::ZERO, 0.0)
    }

    /// Create a simulated analyzer with ±4 dB offset noise.
    pub fn analyzer() -> Self {
        Self::build("SIM,Network Analyzer,0,1.0".into(), Duration::ZERO, 4.0)
    }

    /// Create a simulated power source.
    pub fn source() -> Self {
        Self::build("SIM,Power Source,0,1.0".into(), Duration::ZERO, 0.0)
    }

    fn build(model: String, latency: Duration, noise_db: f64) -> Self {
        Self {
            role: InstrumentRole::Analyzer,
            address: String::new(),
            shared: Arc::new(SimShared {
                model,
                reachable: AtomicBool::new(true),
                latency,
                noise_db,
                state: Mutex::new(SimState::default()),
            }),
        }
    }

    /// Add per-command latency. Must be called before the instrument is cloned.
    pub fn with_latency(self, latency: Duration) -> Self {
        Self::build(self.shared.model.clone(), latency, self.shared.noise_db)
    }

    /// Set offset noise amplitude in dB. Must be called before cloning.
    pub fn with_noise(self, noise_db: f64) -> Self {
        Self::build(self.shared.model.clone(), self.shared.latency, noise_db)
    }

    /// Bind a clone of this instrument to a role and address.
    ///
    /// The clone shares the command log and state with `self`.
    pub fn attach(&self, role: InstrumentRole, address: &str) -> Self {
        Self {
            role,
            address: address.to_string(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make discovery succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail every command or query that starts with `prefix`.
    pub fn fail_on(&self, prefix: impl Into<String>) {
        self.state().fail_on = Some(prefix.into());
    }

    /// Stop injecting faults.
    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    /// Every command and query received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Clear the command log.
    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Whether the simulated output is energized.
    pub fn output_enabled(&self) -> bool {
        self.state().output_enabled
    }

    /// Last applied magnitude offset, including simulated noise.
    pub fn magnitude_offset_db(&self) -> f64 {
        self.state().magnitude_offset_db
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(&self, command: &str) -> BenchError {
        BenchError::Transport {
            role: self.role,
            address: self.address.clone(),
            message: format!("simulated fault on '{}'", command),
        }
    }

    /// Record a command, apply its side effects and check fault injection.
    async fn receive(&self, command: &str) -> AppResult<()> {
        if !self.shared.latency.is_zero() {
            sleep(self.shared.latency).await;
        }

        let noise_db = self.shared.noise_db;
        let mut state = self.state();
        state.log.push(command.to_string());
        trace!(role = %self.role, command, "simulated instrument received");

        if let Some(prefix) = &state.fail_on {
            if command.starts_with(prefix.as_str()) {
                return Err(self.fault(command));
            }
        }

        match command {
            "OUTP ON" => state.output_enabled = true,
            "OUTP OFF" => state.output_enabled = false,
            RESET_COMMAND => {
                state.output_enabled = false;
                state.magnitude_offset_db = 0.0;
            }
            _ => {
                if let Some(value) = command.strip_prefix("CALC:OFFS:MAGN ") {
                    if let Ok(offset) = value.trim().parse::<f64>() {
                        let jitter = if noise_db > 0.0 {
                            rand::thread_rng().gen_range(-noise_db..=noise_db)
                        } else {
                            0.0
                        };
                        state.magnitude_offset_db = offset + jitter;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new("SIM,Instrument,0,1.0")
    }
}

#[async_trait]
impl ScpiInstrument for SimulatedInstrument {
    fn role(&self) -> InstrumentRole {
        self.role
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        self.receive(command).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.receive(command).await?;
        let response = match command {
            OPERATION_COMPLETE_QUERY => "1".to_string(),
            IDENTIFY_QUERY => self.shared.model.clone(),
            "OUTP?" => (if self.output_enabled() { "1" } else { "0" }).to_string(),
            _ => "0".to_string(),
        };
        Ok(response)
    }

    async fn find(&self) -> bool {
        let found = self.shared.reachable.load(Ordering::SeqCst);
        debug!(role = %self.role, address = %self.address, found, "simulated discovery");
        found
    }

    fn status(&self) -> String {
        if self.shared.reachable.load(Ordering::SeqCst) {
            format!("{} at {}: {} (simulated)", self.role, self.address, self.shared.model)
        } else {
            format!("{} at {}: not found (simulated)", self.role, self.address)
        }
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
