//! Secondary and primary measurement parameters.
//!
//! Secondary parameters are the operator-adjustable settings that bound a
//! measurement (frequency range, input power, sweep points, supply limits).
//! Each one carries a label, a `[start, end]` range with a step, its current
//! value and a display unit suffix.
//!
//! # Range policy
//!
//! - `set()` and `apply()` reject out-of-range values with
//!   [`BenchError::ParameterOutOfRange`]; `apply()` validates the whole batch
//!   before writing anything.
//! - `load()` clamps persisted values into range and logs a warning, so that a
//!   hand-edited file never leaves the store in an invalid state.
//!
//! # Persistence
//!
//! The persisted form is a flat `name = value` text file. A missing or
//! unreadable file is not an error: the built-in defaults stay in place.
//!
//! ```rust,ignore
//! let mut store = SecondaryParameterStore::with_defaults();
//! store.load("params.ini");
//! store.set("f_min", 2.5)?;
//! store.save("params.ini")?;
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{AppResult, BenchError};

/// Well-known secondary parameter names.
pub mod names {
    /// Analyzer sweep point count
    pub const SWEEP_POINTS: &str = "sweep_points";
    /// Sweep start frequency, GHz
    pub const F_MIN: &str = "f_min";
    /// Sweep stop frequency, GHz
    pub const F_MAX: &str = "f_max";
    /// Analyzer source power, dBm
    pub const P_IN: &str = "p_in";
    /// Supply voltage, V
    pub const SRC_U: &str = "src_u";
    /// Supply current limit, mA
    pub const SRC_I_MAX: &str = "src_i_max";
}

/// Flat name → value view of a parameter set.
pub type ParameterSnapshot = IndexMap<String, f64>;

/// Primary parameters of one device (e.g. target frequency `F`).
pub type PrimaryParams = IndexMap<String, f64>;

// =============================================================================
// SecondaryParameter
// =============================================================================

/// Allowed range of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    /// Lower bound (inclusive)
    pub start: f64,
    /// Upper bound (inclusive)
    pub end: f64,
    /// UI increment
    pub step: f64,
}

impl ParameterRange {
    /// Whether `value` lies within `[start, end]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && value <= self.end
    }

    /// Clamp `value` into `[start, end]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.start, self.end)
    }
}

/// One operator-adjustable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryParameter {
    /// Display label, e.g. `Fmin=`
    pub label: String,
    /// Allowed range
    pub range: ParameterRange,
    /// Current value
    pub value: f64,
    /// Unit suffix for display, e.g. ` GHz`
    pub suffix: String,
}

impl SecondaryParameter {
    /// Build a parameter.
    pub fn new(
        label: impl Into<String>,
        start: f64,
        end: f64,
        step: f64,
        value: f64,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            range: ParameterRange { start, end, step },
            value,
            suffix: suffix.into(),
        }
    }
}

impl std::fmt::Display for SecondaryParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.label, self.value, self.suffix)
    }
}

/// Built-in secondary parameter set.
pub fn default_secondary_params() -> IndexMap<String, SecondaryParameter> {
    IndexMap::from([
        (
            names::SWEEP_POINTS.to_string(),
            SecondaryParameter::new("Sweep points=", 101.0, 1001.0, 10.0, 401.0, ""),
        ),
        (
            names::F_MIN.to_string(),
            SecondaryParameter::new("Fmin=", 1.0, 4.0, 0.5, 1.0, " GHz"),
        ),
        (
            names::F_MAX.to_string(),
            SecondaryParameter::new("Fmax=", 1.0, 4.0, 0.5, 2.0, " GHz"),
        ),
        (
            names::P_IN.to_string(),
            SecondaryParameter::new("Pin=", -60.0, 0.0, 1.0, -20.0, " dBm"),
        ),
        (
            names::SRC_U.to_string(),
            SecondaryParameter::new("Usrc=", 3.0, 3.5, 0.1, 3.3, " V"),
        ),
        (
            names::SRC_I_MAX.to_string(),
            SecondaryParameter::new("Isrc max=", 10.0, 80.0, 1.0, 60.0, " mA"),
        ),
    ])
}

// =============================================================================
// SecondaryParameterStore
// =============================================================================

/// Ordered store of named secondary parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryParameterStore {
    params: IndexMap<String, SecondaryParameter>,
}

impl SecondaryParameterStore {
    /// Store holding exactly `required`.
    pub fn new(required: IndexMap<String, SecondaryParameter>) -> Self {
        Self { params: required }
    }

    /// Store holding the built-in defaults.
    pub fn with_defaults() -> Self {
        Self::new(default_secondary_params())
    }

    /// Defaults merged with whatever `path` provides.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut store = Self::with_defaults();
        store.load(path);
        store
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> AppResult<f64> {
        self.params
            .get(name)
            .map(|p| p.value)
            .ok_or_else(|| BenchError::UnknownParameter(name.to_string()))
    }

    /// Full parameter description.
    pub fn parameter(&self, name: &str) -> Option<&SecondaryParameter> {
        self.params.get(name)
    }

    /// Parameters in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecondaryParameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Name → value mapping in definition order.
    pub fn snapshot(&self) -> ParameterSnapshot {
        self.params
            .iter()
            .map(|(name, p)| (name.clone(), p.value))
            .collect()
    }

    fn validate(&self, name: &str, value: f64) -> AppResult<()> {
        let param = self
            .params
            .get(name)
            .ok_or_else(|| BenchError::UnknownParameter(name.to_string()))?;
        if !value.is_finite() || !param.range.contains(value) {
            return Err(BenchError::ParameterOutOfRange {
                name: name.to_string(),
                value,
                start: param.range.start,
                end: param.range.end,
            });
        }
        Ok(())
    }

    /// Set one value; rejects unknown names and out-of-range values.
    pub fn set(&mut self, name: &str, value: f64) -> AppResult<()> {
        self.validate(name, value)?;
        if let Some(param) = self.params.get_mut(name) {
            debug!(name, old = param.value, new = value, "parameter changed");
            param.value = value;
        }
        Ok(())
    }

    /// Apply a batch of changes. Nothing is written unless every entry is valid.
    pub fn apply(&mut self, changes: &ParameterSnapshot) -> AppResult<()> {
        for (name, value) in changes {
            self.validate(name, *value)?;
        }
        for (name, value) in changes {
            self.set(name, *value)?;
        }
        Ok(())
    }

    /// Merge persisted values from `path` over the current values.
    ///
    /// Returns true if the file was read. Missing or unparseable files leave
    /// the store untouched; bad entries are skipped individually.
    pub fn load(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "parameter file unavailable, using defaults");
                return false;
            }
        };
        let table: IndexMap<String, toml::Value> = match toml::from_str(&text) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "parameter file unreadable, using defaults");
                return false;
            }
        };

        for (name, raw) in table {
            let Some(param) = self.params.get_mut(&name) else {
                warn!(name, "ignoring unknown persisted parameter");
                continue;
            };
            let value = match raw {
                toml::Value::Float(v) => v,
                toml::Value::Integer(v) => v as f64,
                other => {
                    warn!(name, value = %other, "ignoring non-numeric persisted parameter");
                    continue;
                }
            };
            if !value.is_finite() {
                warn!(name, value, "ignoring non-finite persisted parameter");
                continue;
            }
            let clamped = param.range.clamp(value);
            if clamped != value {
                warn!(name, value, clamped, "persisted parameter out of range, clamped");
            }
            param.value = clamped;
        }
        info!(path = %path.display(), "loaded secondary parameters");
        true
    }

    /// Write the current name → value mapping to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let text = toml::to_string(&self.snapshot())?;
        std::fs::write(path, text)?;
        info!(path = %path.display(), "saved secondary parameters");
        Ok(())
    }
}

impl Default for SecondaryParameterStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// =============================================================================
// DeviceParams
// =============================================================================

/// Primary parameters per device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    devices: IndexMap<String, PrimaryParams>,
}

impl DeviceParams {
    /// Build from an explicit mapping.
    pub fn new(devices: IndexMap<String, PrimaryParams>) -> Self {
        Self { devices }
    }

    /// Primary parameters of `device`.
    pub fn get(&self, device: &str) -> AppResult<&PrimaryParams> {
        self.devices
            .get(device)
            .ok_or_else(|| BenchError::UnknownDevice(device.to_string()))
    }

    /// Known device names.
    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self::new(IndexMap::from([(
            "receiver".to_string(),
            IndexMap::from([("F".to_string(), 1.0)]),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    #[test]
    fn test_defaults_in_order() {
        let store = SecondaryParameterStore::with_defaults();
        let names: Vec<&str> = store.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["sweep_points", "f_min", "f_max", "p_in", "src_u", "src_i_max"]
        );
        assert_eq!(store.get(names::SRC_I_MAX).unwrap(), 60.0);
        assert_eq!(
            store.parameter(names::F_MIN).unwrap().to_string(),
            "Fmin=1 GHz"
        );
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let mut store = SecondaryParameterStore::with_defaults();
        store.set(names::F_MIN, 2.5).unwrap();
        assert_eq!(store.get(names::F_MIN).unwrap(), 2.5);

        let err = store.set(names::F_MIN, 9.0).unwrap_err();
        assert!(matches!(err, BenchError::ParameterOutOfRange { .. }));
        assert_eq!(store.get(names::F_MIN).unwrap(), 2.5);

        assert!(store.set(names::F_MIN, f64::NAN).is_err());
        assert!(matches!(
            store.set("bogus", 1.0),
            Err(BenchError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let mut store = SecondaryParameterStore::with_defaults();
        let changes = ParameterSnapshot::from([
            ("f_min".to_string(), 1.5),
            ("p_in".to_string(), 10.0),
        ]);
        assert!(store.apply(&changes).is_err());
        assert_eq!(store.get(names::F_MIN).unwrap(), 1.0);

        let changes = ParameterSnapshot::from([
            ("f_min".to_string(), 1.5),
            ("p_in".to_string(), -10.0),
        ]);
        store.apply(&changes).unwrap();
        assert_eq!(store.get(names::P_IN).unwrap(), -10.0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.ini");

        let mut store = SecondaryParameterStore::with_defaults();
        store.set(names::F_MIN, 2.5).unwrap();
        store.set(names::SRC_U, 3.1).unwrap();
        store.set(names::SWEEP_POINTS, 201.0).unwrap();
        store.save(&path).unwrap();

        let loaded = SecondaryParameterStore::from_file(&path);
        assert_eq!(loaded.snapshot(), store.snapshot());
    }

    #[test]
    fn test_saved_file_is_flat_key_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.ini");
        SecondaryParameterStore::with_defaults().save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().any(|l| l == "f_min = 1.0"));
        assert!(text.lines().all(|l| l.contains(" = ")));
    }

    #[traced_test]
    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let store = SecondaryParameterStore::from_file(dir.path().join("absent.ini"));
        assert_eq!(store, SecondaryParameterStore::with_defaults());
        assert!(logs_contain("using defaults"));
    }

    #[test]
    fn test_load_merges_and_clamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.ini");
        std::fs::write(&path, "f_max = 3\np_in = -90.0\nunknown = 1.0\nsrc_u = \"x\"\n").unwrap();

        let mut store = SecondaryParameterStore::with_defaults();
        assert!(store.load(&path));
        assert_eq!(store.get(names::F_MAX).unwrap(), 3.0);
        assert_eq!(store.get(names::P_IN).unwrap(), -60.0);
        assert_eq!(store.get(names::SRC_U).unwrap(), 3.3);
        assert_eq!(store.get(names::F_MIN).unwrap(), 1.0);
    }

    #[traced_test]
    #[test]
    fn test_load_skips_non_finite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.ini");
        std::fs::write(&path, "f_min = nan\np_in = nan\nf_max = inf\nsrc_u = 3.1\n").unwrap();

        let mut store = SecondaryParameterStore::with_defaults();
        assert!(store.load(&path));
        assert_eq!(store.get(names::F_MIN).unwrap(), 1.0);
        assert_eq!(store.get(names::P_IN).unwrap(), -20.0);
        assert_eq!(store.get(names::F_MAX).unwrap(), 2.0);
        assert_eq!(store.get(names::SRC_U).unwrap(), 3.1);
        assert!(store.iter().all(|(_, p)| p.value.is_finite()));
        assert!(logs_contain("non-finite"));
    }

    #[test]
    fn test_garbage_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.ini");
        std::fs::write(&path, "{{ not a mapping").unwrap();

        let mut store = SecondaryParameterStore::with_defaults();
        assert!(!store.load(&path));
        assert_eq!(store, SecondaryParameterStore::with_defaults());
    }

    #[test]
    fn test_device_params() {
        let devices = DeviceParams::default();
        assert_eq!(devices.get("receiver").unwrap()["F"], 1.0);
        assert_eq!(devices.devices().collect::<Vec<_>>(), vec!["receiver"]);
        assert!(matches!(
            devices.get("transmitter"),
            Err(BenchError::UnknownDevice(_))
        ));
    }
}
