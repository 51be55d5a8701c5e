//! SCPI command builders for the analyzer and the source.
//!
//! Commands are plain ASCII strings; numeric arguments use Rust's shortest
//! round-trip float formatting (`2.5e9` → `2500000000`, `0.06` → `0.06`).

/// Return the analyzer to its preset state.
pub const SYSTEM_PRESET: &str = "SYST:PRES";
/// Clear the analyzer's default measurement window setup.
pub const FACTORY_PRESET: &str = "SYSTem:FPRESet";
/// Define the one-port reflection trace.
pub const DEFINE_S11_TRACE: &str = "CALC1:PAR:DEF:EXT \"CH1_S11\",S11";
/// Turn on the first display window.
pub const DISPLAY_WINDOW_ON: &str = "DISPlay:WINDow1:STATe ON";
/// Feed the S11 trace into the first display window.
pub const DISPLAY_FEED_S11: &str = "DISPlay:WINDow1:TRACe1:FEED 'CH1_S11'";
/// Continuous sweep mode.
pub const SWEEP_CONTINUOUS: &str = "SENS1:SWE:MODE CONT";
/// ASCII data transfer.
pub const FORMAT_ASCII: &str = "FORM:DATA ASCII";
/// Select the S11 trace as the active measurement.
pub const SELECT_S11_TRACE: &str = "CALC1:PAR:SEL \"CH1_S11\"";
/// Auto-scale the active trace's Y axis.
pub const AUTOSCALE: &str = "DISP:WIND:TRAC:Y:AUTO";

/// Select the source's first output channel.
pub const SELECT_OUTPUT_1: &str = "INST:SEL OUTP1";
/// Energize the source output.
pub const OUTPUT_ON: &str = "OUTP ON";
/// De-energize the source output.
pub const OUTPUT_OFF: &str = "OUTP OFF";

/// Analyzer source power in dBm.
pub fn source_power(dbm: f64) -> String {
    format!("SOUR1:POW1 {}dbm", dbm)
}

/// Analyzer sweep point count.
pub fn sweep_points(points: u32) -> String {
    format!("SENS1:SWE:POIN {}", points)
}

/// Sweep start frequency in Hz.
pub fn start_frequency(hz: f64) -> String {
    format!("SENS1:FREQ:STAR {}Hz", hz)
}

/// Sweep stop frequency in Hz.
pub fn stop_frequency(hz: f64) -> String {
    format!("SENS1:FREQ:STOP {}Hz", hz)
}

/// Trace magnitude offset in dB.
pub fn magnitude_offset(db: f64) -> String {
    format!("CALC:OFFS:MAGN {}", db)
}

/// Trace magnitude slope in dB/GHz.
pub fn magnitude_slope(slope: f64) -> String {
    format!("CALC:OFFS:MAGN:SLOP {}", slope)
}

/// Source voltage and current limit.
pub fn apply(volts: f64, amps: f64) -> String {
    format!("APPLY {}V,{}A", volts, amps)
}
