//! # RF Bench Core Library
//!
//! This crate drives an RF device-characterization bench: a network analyzer
//! and a programmable power source, coordinated through discovery, reset,
//! three-stage calibration and a multi-point sweep measurement.
//!
//! ## Crate Structure
//!
//! - **`orchestrator`**: The `Orchestrator` facade. Serializes hardware
//!   operations, routes parameter changes into the store and broadcasts
//!   `BenchEvent`s to observers.
//! - **`hardware`**: Instrument roles, the `ScpiInstrument` capability, real
//!   and simulated instrument variants, and the `InstrumentRegistry`.
//! - **`sequencer`**: The `MeasurementSequencer` state machine and the
//!   `SequenceConfig` sweep pattern.
//! - **`calibration`**: LO/RF/Mod calibration stages.
//! - **`parameter`**: Secondary parameters with ranges and flat-file
//!   persistence, plus per-device primary parameters.
//! - **`result`**: Measurement points, results and the transactional
//!   `ResultBuffer`.
//! - **`scpi`**: Command strings sent to the instruments.
//! - **`units`**: GHz/mA conversions.
//! - **`events`**: Correlation tokens and event types.
//! - **`config`**: Layered Figment configuration.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The `BenchError` enum.

pub mod calibration;
pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod logging;
pub mod orchestrator;
pub mod parameter;
pub mod result;
pub mod scpi;
pub mod sequencer;
pub mod units;

pub use error::{AppResult, BenchError};
pub use events::{BenchEvent, Token};
pub use orchestrator::Orchestrator;
