//! Correlation tokens and observer notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::parameter::ParameterSnapshot;
use crate::result::MeasurePoint;

/// Opaque caller-supplied correlation identifier.
///
/// The bench never interprets a token; it only echoes it back in events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    /// Wrap a caller-chosen identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Token {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notification broadcast to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum BenchEvent {
    /// A sample was recorded during a run
    PointReady {
        /// Token of the run
        token: Token,
        /// The sample
        point: MeasurePoint,
    },
    /// A run completed and its result was committed
    ResultsChanged {
        /// Token of the run
        token: Token,
    },
    /// A run or calibration ended with a fault; the previous result stands
    RunFailed {
        /// Token of the run
        token: Token,
        /// Error description
        reason: String,
    },
    /// Secondary parameters were changed
    ParametersChanged {
        /// New values
        snapshot: ParameterSnapshot,
    },
}
