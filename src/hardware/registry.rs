//! Instrument Registry
//!
//! Maps bench roles to discovered instrument handles.
//!
//! - **InstrumentRole**: closed set of roles the measurement needs
//! - **DriverType**: how to build a handle for a role (real transport or simulation)
//! - **InstrumentRegistry**: performs discovery and owns the handles for the
//!   lifetime of a connection session
//!
//! Handles are reference counted so a teardown task can outlive the operation
//! that armed it. Such a task holds the registry's session lock until the
//! instruments are safe again; every sequence waits on that lock first.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use rf_bench::hardware::registry::{default_addresses, InstrumentRegistry};
//!
//! let mut registry = InstrumentRegistry::simulated();
//! let found = registry.connect(&default_addresses()).await;
//! for line in registry.status() {
//!     println!("{line}");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::error::{AppResult, BenchError};
use crate::hardware::capabilities::{ScpiInstrument, ScpiTransport};
use crate::hardware::instrument::{InstrumentHandle, RealInstrument};
use crate::hardware::simulated::SimulatedInstrument;

// =============================================================================
// Roles
// =============================================================================

/// Role an instrument plays on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentRole {
    /// Network analyzer sweeping the device under test
    Analyzer,
    /// Power supply biasing the device under test
    Source,
}

impl InstrumentRole {
    /// Every role the measurement requires.
    pub const ALL: [InstrumentRole; 2] = [InstrumentRole::Analyzer, InstrumentRole::Source];
}

impl std::fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentRole::Analyzer => write!(f, "Analyzer"),
            InstrumentRole::Source => write!(f, "Source"),
        }
    }
}

/// Resource address per role.
pub type AddressMap = BTreeMap<InstrumentRole, String>;

/// Built-in addresses used when nothing is configured.
pub fn default_addresses() -> AddressMap {
    BTreeMap::from([
        (InstrumentRole::Analyzer, "GPIB1::9::INSTR".to_string()),
        (InstrumentRole::Source, "GPIB1::4::INSTR".to_string()),
    ])
}

// =============================================================================
// Driver Types
// =============================================================================

/// How to instantiate the handle for a role.
#[derive(Clone)]
pub enum DriverType {
    /// Physical instrument behind an external transport
    Remote(Arc<dyn ScpiTransport>),
    /// Simulated instrument; the registry binds a clone sharing its state
    Simulated(SimulatedInstrument),
}

impl DriverType {
    fn instantiate(&self, role: InstrumentRole, address: &str) -> InstrumentHandle {
        match self {
            DriverType::Remote(transport) => {
                InstrumentHandle::Real(RealInstrument::new(role, address, Arc::clone(transport)))
            }
            DriverType::Simulated(sim) => InstrumentHandle::Simulated(sim.attach(role, address)),
        }
    }

    /// Short driver name for logs.
    pub fn driver_name(&self) -> &'static str {
        match self {
            DriverType::Remote(_) => "remote",
            DriverType::Simulated(_) => "simulated",
        }
    }
}

impl std::fmt::Debug for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.driver_name())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Central registry of bench instruments.
#[derive(Debug)]
pub struct InstrumentRegistry {
    drivers: BTreeMap<InstrumentRole, DriverType>,
    addresses: AddressMap,
    instruments: BTreeMap<InstrumentRole, Arc<InstrumentHandle>>,
    found: bool,
    session: Arc<Mutex<()>>,
}

impl InstrumentRegistry {
    /// Create a registry with no drivers.
    pub fn new() -> Self {
        Self {
            drivers: BTreeMap::new(),
            addresses: default_addresses(),
            instruments: BTreeMap::new(),
            found: false,
            session: Arc::new(Mutex::new(())),
        }
    }

    /// Registry with fresh simulated instruments for every role.
    pub fn simulated() -> Self {
        Self::new()
            .with_driver(
                InstrumentRole::Analyzer,
                DriverType::Simulated(SimulatedInstrument::analyzer()),
            )
            .with_driver(
                InstrumentRole::Source,
                DriverType::Simulated(SimulatedInstrument::source()),
            )
    }

    /// Set the driver used for `role`.
    pub fn with_driver(mut self, role: InstrumentRole, driver: DriverType) -> Self {
        self.drivers.insert(role, driver);
        self
    }

    /// Update addresses and run discovery for every role.
    ///
    /// Returns true only if every required role has a driver and its instrument
    /// answered. Never fails: missing instruments are reported through the
    /// return value and `status()`.
    pub async fn connect(&mut self, addresses: &AddressMap) -> bool {
        for (role, address) in addresses {
            self.addresses.insert(*role, address.clone());
        }
        info!(addresses = ?self.addresses, "searching for instruments");

        self.instruments.clear();
        let mut all_found = true;
        for role in InstrumentRole::ALL {
            let Some(driver) = self.drivers.get(&role) else {
                warn!(%role, "no driver configured");
                all_found = false;
                continue;
            };
            let address = self.addresses.get(&role).cloned().unwrap_or_default();
            let handle = driver.instantiate(role, &address);
            let found = handle.find().await;
            info!(%role, %address, driver = driver.driver_name(), found, "discovery");
            all_found &= found;
            self.instruments.insert(role, Arc::new(handle));
        }

        self.found = all_found;
        all_found
    }

    /// Drop every handle and forget the discovery result.
    pub fn disconnect(&mut self) {
        if !self.instruments.is_empty() {
            info!("disconnecting instruments");
        }
        self.instruments.clear();
        self.found = false;
    }

    /// Whether the last discovery found every instrument.
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Fail with `NotConnected` unless discovery succeeded.
    pub fn ensure_found(&self) -> AppResult<()> {
        if self.found {
            Ok(())
        } else {
            Err(BenchError::NotConnected)
        }
    }

    /// Handle for `role`.
    pub fn get(&self, role: InstrumentRole) -> AppResult<&InstrumentHandle> {
        self.shared(role).map(|handle| &**handle)
    }

    /// Reference-counted handle for `role`, for work that must outlive a borrow.
    pub fn shared(&self, role: InstrumentRole) -> AppResult<&Arc<InstrumentHandle>> {
        self.instruments
            .get(&role)
            .ok_or(BenchError::InstrumentMissing(role))
    }

    /// Exclusive session with the instruments.
    ///
    /// Waits while a teardown left behind by an abandoned run is in flight.
    pub async fn session(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.session).lock_owned().await
    }

    /// Current addresses, including defaults for roles never overridden.
    pub fn addresses(&self) -> &AddressMap {
        &self.addresses
    }

    /// Per-instrument status lines, computed as the iterator is consumed.
    pub fn status(&self) -> impl Iterator<Item = String> + '_ {
        self.instruments.values().map(|handle| handle.status())
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
