//! Instrument handles.
//!
//! [`InstrumentHandle`] is the tagged variant the registry owns: either a
//! [`RealInstrument`] driving an external [`ScpiTransport`], or a
//! [`SimulatedInstrument`]. Which one is picked at construction time; nothing
//! downstream checks a global "mock mode".

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, trace, warn};

use crate::error::{AppResult, BenchError};
use crate::hardware::capabilities::{ScpiInstrument, ScpiTransport};
use crate::hardware::simulated::SimulatedInstrument;
use crate::hardware::InstrumentRole;

/// Instrument reached through a physical transport.
pub struct RealInstrument {
    role: InstrumentRole,
    address: String,
    transport: Arc<dyn ScpiTransport>,
    /// Identification string from the last successful discovery
    identity: RwLock<Option<String>>,
}

impl RealInstrument {
    /// Create a handle for `role` at `address`. No I/O happens until `find`.
    pub fn new(role: InstrumentRole, address: &str, transport: Arc<dyn ScpiTransport>) -> Self {
        Self {
            role,
            address: address.to_string(),
            transport,
            identity: RwLock::new(None),
        }
    }

    fn fault(&self, err: anyhow::Error) -> BenchError {
        BenchError::Transport {
            role: self.role,
            address: self.address.clone(),
            message: format!("{:#}", err),
        }
    }
}

impl std::fmt::Debug for RealInstrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealInstrument")
            .field("role", &self.role)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ScpiInstrument for RealInstrument {
    fn role(&self) -> InstrumentRole {
        self.role
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        trace!(role = %self.role, command, "send");
        self.transport
            .write(command)
            .await
            .map_err(|e| self.fault(e))
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        trace!(role = %self.role, command, "query");
        let response = self
            .transport
            .query(command)
            .await
            .map_err(|e| self.fault(e))?;
        Ok(response.trim().to_string())
    }

    async fn find(&self) -> bool {
        let found = match self.transport.open(&self.address).await {
            Ok(idn) => {
                info!(role = %self.role, address = %self.address, idn = %idn.trim(), "instrument found");
                Some(idn.trim().to_string())
            }
            Err(e) => {
                warn!(role = %self.role, address = %self.address, error = %e, "instrument not found");
                None
            }
        };
        let is_found = found.is_some();
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = found;
        is_found
    }

    fn status(&self) -> String {
        match &*self.identity.read().unwrap_or_else(PoisonError::into_inner) {
            Some(idn) => format!("{} at {}: {}", self.role, self.address, idn),
            None => format!("{} at {}: not found", self.role, self.address),
        }
    }
}

/// Instrument handle: real or simulated.
#[derive(Debug)]
pub enum InstrumentHandle {
    /// Backed by a physical transport
    Real(RealInstrument),
    /// Backed by the in-process simulation
    Simulated(SimulatedInstrument),
}

impl InstrumentHandle {
    fn inner(&self) -> &dyn ScpiInstrument {
        match self {
            InstrumentHandle::Real(real) => real,
            InstrumentHandle::Simulated(sim) => sim,
        }
    }

    /// The simulated instrument, if this handle is simulated.
    pub fn as_simulated(&self) -> Option<&SimulatedInstrument> {
        match self {
            InstrumentHandle::Simulated(sim) => Some(sim),
            InstrumentHandle::Real(_) => None,
        }
    }
}

#[async_trait]
impl ScpiInstrument for InstrumentHandle {
    fn role(&self) -> InstrumentRole {
        self.inner().role()
    }

    fn address(&self) -> &str {
        self.inner().address()
    }

    async fn send(&self, command: &str) -> AppResult<()> {
        self.inner().send(command).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        let response = self.inner().query(command).await?;
        debug!(role = %self.role(), command, response = %response, "query answered");
        Ok(response)
    }

    async fn find(&self) -> bool {
        self.inner().find().await
    }

    fn status(&self) -> String {
        self.inner().status()
    }

    fn is_simulated(&self) -> bool {
        self.inner().is_simulated()
    }
}
