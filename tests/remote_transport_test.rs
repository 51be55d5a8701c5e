//! Real instrument variant driven through a scripted transport.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rf_bench::hardware::{
    default_addresses, DriverType, InstrumentRegistry, InstrumentRole, ScpiTransport,
};
use rf_bench::parameter::SecondaryParameterStore;
use rf_bench::sequencer::SequenceConfig;
use rf_bench::{Orchestrator, Token};
use std::sync::{Arc, Mutex};

/// Transport that records traffic and answers like a cooperative instrument.
#[derive(Default)]
struct ScriptedTransport {
    idn: String,
    reachable: bool,
    broken_after: Option<usize>,
    log: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(idn: &str) -> Arc<Self> {
        Arc::new(Self {
            idn: idn.to_string(),
            reachable: true,
            ..Default::default()
        })
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, line: String) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if self.broken_after.is_some_and(|n| log.len() >= n) {
            return Err(anyhow!("bus timeout"));
        }
        log.push(line);
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for ScriptedTransport {
    async fn open(&self, address: &str) -> Result<String> {
        if self.reachable {
            Ok(format!("{}\n", self.idn))
        } else {
            Err(anyhow!("no listener at {}", address))
        }
    }

    async fn write(&self, command: &str) -> Result<()> {
        self.record(command.to_string())
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.record(command.to_string())?;
        Ok(if command == "*OPC?" { "1\n" } else { "0\n" }.to_string())
    }
}

fn fast_sequence(pattern: Vec<f64>) -> SequenceConfig {
    SequenceConfig {
        power_pattern_dbm: pattern,
        trigger_settle_ms: 0,
        power_settle_ms: 0,
        correction_settle_ms: 0,
        ..Default::default()
    }
}

fn bench(
    analyzer: Arc<ScriptedTransport>,
    source: Arc<ScriptedTransport>,
    sequence: SequenceConfig,
) -> (Orchestrator, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let registry = InstrumentRegistry::new()
        .with_driver(InstrumentRole::Analyzer, DriverType::Remote(analyzer))
        .with_driver(InstrumentRole::Source, DriverType::Remote(source));
    let bench = Orchestrator::new(
        registry,
        SecondaryParameterStore::with_defaults(),
        dir.path().join("params.ini"),
        sequence,
    );
    (bench, dir)
}

#[tokio::test]
async fn full_command_sequence() {
    let analyzer = ScriptedTransport::new("ACME,PNA-X,1234,A.01");
    let source = ScriptedTransport::new("ACME,E3631A,99,2.1");
    let (bench, _dir) = bench(
        analyzer.clone(),
        source.clone(),
        fast_sequence(vec![-10.0, -11.0]),
    );

    assert!(bench.connect(&default_addresses()).await);
    assert!(bench.measure(&Token::from("real"), "receiver").await.unwrap());

    let expected_analyzer = vec![
        "SYST:PRES",
        "*OPC?",
        "SYSTem:FPRESet",
        "CALC1:PAR:DEF:EXT \"CH1_S11\",S11",
        "DISPlay:WINDow1:STATe ON",
        "DISPlay:WINDow1:TRACe1:FEED 'CH1_S11'",
        "SOUR1:POW1 -20dbm",
        "SENS1:SWE:POIN 401",
        "SENS1:FREQ:STAR 1000000000Hz",
        "SENS1:FREQ:STOP 2000000000Hz",
        "SENS1:SWE:MODE CONT",
        "FORM:DATA ASCII",
        "CALC1:PAR:SEL \"CH1_S11\"",
        "*OPC?",
        "SOUR1:POW1 -10dbm",
        "CALC:OFFS:MAGN 0",
        "CALC:OFFS:MAGN:SLOP 0",
        "DISP:WIND:TRAC:Y:AUTO",
        "CALC1:PAR:SEL \"CH1_S11\"",
        "*OPC?",
        "SOUR1:POW1 -11dbm",
        "CALC:OFFS:MAGN 0",
        "CALC:OFFS:MAGN:SLOP 0",
        "DISP:WIND:TRAC:Y:AUTO",
        "SYST:PRES",
    ];
    assert_eq!(analyzer.log(), expected_analyzer);
    assert_eq!(
        source.log(),
        vec!["INST:SEL OUTP1", "APPLY 3.3V,0.06A", "OUTP ON", "OUTP OFF"]
    );

    let result = bench.result();
    assert_eq!(result.powers().collect::<Vec<_>>(), vec![-10.0, -11.0]);

    let status = bench.status().await;
    assert!(status.iter().any(|s| s.contains("PNA-X")));
    assert!(status.iter().any(|s| s.contains("E3631A")));
}

#[tokio::test]
async fn unreachable_source_fails_discovery() {
    let analyzer = ScriptedTransport::new("ACME,PNA-X,1234,A.01");
    let source = Arc::new(ScriptedTransport {
        reachable: false,
        ..Default::default()
    });
    let (bench, _dir) = bench(analyzer.clone(), source.clone(), fast_sequence(vec![-10.0]));

    assert!(!bench.connect(&default_addresses()).await);
    assert!(bench.measure(&Token::from("x"), "receiver").await.is_err());
    assert!(analyzer.log().is_empty());
    assert!(source.log().is_empty());
    assert!(bench
        .status()
        .await
        .iter()
        .any(|s| s.contains("not found")));
}

#[tokio::test]
async fn bus_fault_mid_sweep_still_switches_output_off() {
    let analyzer = Arc::new(ScriptedTransport {
        idn: "ACME,PNA-X,1234,A.01".to_string(),
        reachable: true,
        broken_after: Some(15),
        ..Default::default()
    });
    let source = ScriptedTransport::new("ACME,E3631A,99,2.1");
    let (bench, _dir) = bench(
        analyzer.clone(),
        source.clone(),
        fast_sequence(SequenceConfig::alternating(-15.0, -16.0, 4)),
    );

    assert!(bench.connect(&default_addresses()).await);
    assert!(!bench.measure(&Token::from("bus"), "receiver").await.unwrap());

    assert!(!bench.has_result());
    assert_eq!(source.log().last().map(String::as_str), Some("OUTP OFF"));
    assert_eq!(analyzer.log().len(), 15);
}
