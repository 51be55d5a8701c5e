//! Measurement results.
//!
//! A run writes into a [`ResultBuffer`]; only a fully successful run turns the
//! buffer into a committed [`MeasureResult`]. A run that fails or is cancelled
//! drops its buffer, so the previous successful result survives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parameter::{ParameterSnapshot, PrimaryParams};

/// One sweep sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurePoint {
    /// Iteration index within the run
    pub index: usize,
    /// Analyzer source power requested for this iteration, dBm
    pub power_dbm: f64,
}

/// Aggregate result of a measurement run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasureResult {
    /// Device the run measured
    pub device: String,
    /// Secondary parameters in effect for the run
    pub secondary: ParameterSnapshot,
    /// Primary parameters of the device
    pub primary: PrimaryParams,
    /// Samples in acquisition order
    pub points: Vec<MeasurePoint>,
    /// When the run was committed
    pub completed_at: Option<DateTime<Utc>>,
}

impl MeasureResult {
    /// True once a run has been committed into this result.
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no samples were collected.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Requested powers in acquisition order.
    pub fn powers(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.power_dbm)
    }
}

/// Append-only accumulator for an in-progress run.
#[derive(Debug)]
pub struct ResultBuffer {
    pending: MeasureResult,
}

impl ResultBuffer {
    /// Open a buffer holding the parameter snapshots for the run.
    pub fn begin(device: &str, secondary: ParameterSnapshot, primary: PrimaryParams) -> Self {
        Self {
            pending: MeasureResult {
                device: device.to_string(),
                secondary,
                primary,
                points: Vec::new(),
                completed_at: None,
            },
        }
    }

    /// Append a sample and return it.
    pub fn push(&mut self, power_dbm: f64) -> MeasurePoint {
        let point = MeasurePoint {
            index: self.pending.points.len(),
            power_dbm,
        };
        self.pending.points.push(point);
        point
    }

    /// Samples collected so far.
    pub fn points(&self) -> &[MeasurePoint] {
        &self.pending.points
    }

    /// Seal the buffer into a complete result.
    pub fn commit(self) -> MeasureResult {
        MeasureResult {
            completed_at: Some(Utc::now()),
            ..self.pending
        }
    }
}
