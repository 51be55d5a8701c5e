//! Instrument Capabilities
//!
//! Two traits split the hardware seam:
//!
//! - [`ScpiTransport`] is the raw byte-level link to one instrument (GPIB, VISA,
//!   LAN socket). Its implementations live outside this crate; the bench only
//!   needs to open a session, write a command and run a query.
//! - [`ScpiInstrument`] is what the sequencer talks to: a role-tagged handle
//!   that composes SCPI commands, reports discovery, and maps transport failures
//!   into [`BenchError::Transport`].
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Treats commands as opaque ASCII strings; nothing here parses them
//!
//! # Example
//!
//! ```rust,ignore
//! async fn preset<I: ScpiInstrument>(analyzer: &I) -> AppResult<()> {
//!     analyzer.send("SYST:PRES").await?;
//!     analyzer.wait_complete().await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::error::AppResult;
use crate::hardware::InstrumentRole;

/// SCPI query that blocks until all pending operations have finished.
pub const OPERATION_COMPLETE_QUERY: &str = "*OPC?";
/// SCPI identification query.
pub const IDENTIFY_QUERY: &str = "*IDN?";
/// SCPI instrument reset.
pub const RESET_COMMAND: &str = "*RST";

/// Transport: Raw SCPI Link
///
/// A session with one physical instrument.
///
/// # Contract
/// - `open` establishes the session and returns the instrument's
///   identification string; an error means the instrument was not found
/// - `write` is fire-and-forget
/// - `query` blocks until the instrument answers
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Open a session to `address` and return the `*IDN?` response.
    async fn open(&self, address: &str) -> Result<String>;

    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query command and return the response.
    async fn query(&self, command: &str) -> Result<String>;
}

/// Capability: SCPI Instrument
///
/// A discovered instrument playing one [`InstrumentRole`] on the bench.
///
/// # Contract
/// - `find` never fails: a missing instrument yields `false`
/// - `send`/`query` failures surface as `BenchError::Transport`
/// - `status` is a human-readable one-liner, refreshed by `find`
#[async_trait]
pub trait ScpiInstrument: Send + Sync {
    /// Role this instrument plays on the bench.
    fn role(&self) -> InstrumentRole;

    /// Resource address (e.g. `GPIB1::9::INSTR`).
    fn address(&self) -> &str;

    /// Send a command.
    async fn send(&self, command: &str) -> AppResult<()>;

    /// Send a query and return the trimmed response.
    async fn query(&self, command: &str) -> AppResult<String>;

    /// Attempt discovery at the configured address.
    async fn find(&self) -> bool;

    /// Current status line.
    fn status(&self) -> String;

    /// True when the instrument is simulated; settle delays are skipped.
    fn is_simulated(&self) -> bool {
        false
    }

    /// Block until the instrument acknowledges operation complete.
    async fn wait_complete(&self) -> AppResult<()> {
        self.query(OPERATION_COMPLETE_QUERY).await.map(|_| ())
    }
}
