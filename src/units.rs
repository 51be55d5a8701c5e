//! Unit conversions between operator-facing values and instrument units.
//!
//! Operators enter frequencies in GHz and currents in mA; the analyzer and the
//! source expect Hz and A.

/// Hz per GHz.
pub const GIGA: f64 = 1_000_000_000.0;
/// mA per A.
pub const KILO: f64 = 1_000.0;

/// Convert a frequency in GHz to Hz.
pub fn ghz_to_hz(ghz: f64) -> f64 {
    ghz * GIGA
}

/// Convert a current in mA to A.
///
/// Divides rather than multiplying by `1e-3` so that whole milliamp values map
/// to the nearest representable amp value (60 mA → 0.06 A, not 0.060000000000000005).
pub fn ma_to_a(ma: f64) -> f64 {
    ma / KILO
}
