//! Bench Hardware
//!
//! Capability traits, the real/simulated instrument variants, and the
//! registry that discovers them.

pub mod capabilities;
pub mod instrument;
pub mod registry;
pub mod simulated;

pub use capabilities::{ScpiInstrument, ScpiTransport};
pub use instrument::{InstrumentHandle, RealInstrument};
pub use registry::{default_addresses, AddressMap, DriverType, InstrumentRegistry, InstrumentRole};
pub use simulated::SimulatedInstrument;
