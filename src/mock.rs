//! Simulated network analyzer for testing
//!
//! [`MockVna`] implements [`ScpiTransport`] without requiring physical hardware.
//! It provides:
//! - Named traces with configurable complex samples
//! - The status byte / error queue behaviour the driver relies on
//! - ASCII and binary (`REAL,32` / `REAL,64`) data replies
//! - One-shot failure injection
//! - Command logging for test verification

use crate::error::{Result, VnaError};
use crate::scpi::{encode_definite_block, ScpiTransport};
use crate::trace::DataFormat;
use async_trait::async_trait;
use num_complex::Complex64;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Status byte bit set while the error queue is not empty.
const STB_ERROR_QUEUE: u8 = 0x04;

const DEFAULT_BANDWIDTH_HZ: f64 = 10_000.0;
const START_FREQUENCY_HZ: f64 = 1.0e9;
const STOP_FREQUENCY_HZ: f64 = 2.0e9;

enum Reply {
    Line(String),
    Block(Vec<u8>),
}

struct MockState {
    identity: String,
    traces: Vec<(String, Vec<Complex64>)>,
    selected: Option<String>,
    status_byte: u8,
    errors: VecDeque<String>,
    data_format: DataFormat,
    continuous: bool,
    sweeps: u32,
    bandwidth_hz: f64,
    log: Vec<String>,
    closed: bool,
}

/// Simulated analyzer speaking the subset of SCPI used by [`crate::Vna`].
///
/// # Example
///
/// ```
/// use vna_scpi::mock::MockVna;
/// use vna_scpi::scpi::ScpiTransport;
///
/// # tokio_test::block_on(async {
/// let vna = MockVna::new();
/// assert!(vna.query("*IDN?").await.unwrap().contains("MOCK"));
/// assert_eq!(vna.command_log(), vec!["*IDN?"]);
/// # })
/// ```
pub struct MockVna {
    state: Mutex<MockState>,
    should_fail_next: AtomicBool,
}

impl MockVna {
    /// Create a simulated analyzer with a single 11-point trace named `Trc1`.
    pub fn new() -> Self {
        let samples = (0..11)
            .map(|i| Complex64::from_polar(1.0 / (1.0 + i as f64), -0.1 * i as f64))
            .collect();
        Self::empty().with_trace("Trc1", samples)
    }

    /// Create a simulated analyzer without any traces.
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(MockState {
                identity: "Rohde-Schwarz,ZNB8-4Port,MOCK,3.45".to_string(),
                traces: Vec::new(),
                selected: None,
                status_byte: 0,
                errors: VecDeque::new(),
                data_format: DataFormat::Ascii,
                continuous: true,
                sweeps: 0,
                bandwidth_hz: DEFAULT_BANDWIDTH_HZ,
                log: Vec::new(),
                closed: false,
            }),
            should_fail_next: AtomicBool::new(false),
        }
    }

    /// Add (or replace) a named trace.
    pub fn with_trace(self, name: &str, samples: Vec<Complex64>) -> Self {
        {
            let mut state = self.lock();
            match state.traces.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = samples,
                None => state.traces.push((name.to_string(), samples)),
            }
        }
        self
    }

    /// Override the `*IDN?` reply.
    pub fn with_identity(self, identity: &str) -> Self {
        self.lock().identity = identity.to_string();
        self
    }

    /// Make the next operation fail as if the connection dropped.
    pub fn fail_next(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Every command and query received, in order.
    pub fn command_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Clear the command log.
    pub fn clear_command_log(&self) {
        self.lock().log.clear();
    }

    /// Currently selected trace.
    pub fn selected_trace(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    /// Number of single sweeps triggered.
    pub fn sweep_count(&self) -> u32 {
        self.lock().sweeps
    }

    /// Whether continuous sweep mode is on.
    pub fn is_continuous(&self) -> bool {
        self.lock().continuous
    }

    /// Current measurement bandwidth.
    pub fn bandwidth_hz(&self) -> f64 {
        self.lock().bandwidth_hz
    }

    /// Active wire format.
    pub fn data_format(&self) -> DataFormat {
        self.lock().data_format
    }

    /// Whether [`ScpiTransport::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<()> {
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(VnaError::ConnectionClosed);
        }
        if self.lock().closed {
            return Err(VnaError::ConnectionClosed);
        }
        Ok(())
    }

    fn handle(&self, command: &str) -> Result<Option<Reply>> {
        self.check_available()?;

        let mut state = self.lock();
        state.log.push(command.to_string());

        let (header, args) = match command.trim().split_once(char::is_whitespace) {
            Some((h, a)) => (h, a.trim()),
            None => (command.trim(), ""),
        };

        if header.ends_with('?') {
            state.query(header, args, command).map(Some)
        } else {
            state.command(header, args);
            Ok(None)
        }
    }
}

impl Default for MockVna {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn push_error(&mut self, code: i32, message: &str) {
        self.errors.push_back(format!("{},\"{}\"", code, message));
        self.status_byte |= STB_ERROR_QUEUE;
    }

    fn command(&mut self, header: &str, args: &str) {
        if header.eq_ignore_ascii_case("*CLS") {
            self.status_byte = 0;
            self.errors.clear();
        } else if header.eq_ignore_ascii_case("*RST") {
            self.selected = None;
            self.data_format = DataFormat::Ascii;
            self.continuous = true;
            self.bandwidth_hz = DEFAULT_BANDWIDTH_HZ;
        } else if header_matches(header, "FORMat:DATA") {
            match args.to_uppercase().replace(' ', "").as_str() {
                "ASC" | "ASCII" | "ASC,0" | "ASCII,0" => self.data_format = DataFormat::Ascii,
                "REAL,32" => self.data_format = DataFormat::Real32,
                "REAL,64" => self.data_format = DataFormat::Real64,
                _ => self.push_error(-224, "Illegal parameter value"),
            }
        } else if header_matches(header, "FORMat:BORDer") {
            // Only little-endian output is simulated
            if !matches!(args.to_uppercase().as_str(), "SWAP" | "SWAPPED") {
                self.push_error(-224, "Illegal parameter value");
            }
        } else if header_matches(header, "CALCulate:PARameter:SELect") {
            let name = args.trim_matches(|c| c == '"' || c == '\'');
            if self.traces.iter().any(|(n, _)| n == name) {
                self.selected = Some(name.to_string());
            } else {
                self.push_error(-114, &format!("Header suffix out of range; trace {} not found", name));
            }
        } else if header_matches(header, "INITiate:CONTinuous") {
            match args.to_uppercase().as_str() {
                "ON" | "1" => self.continuous = true,
                "OFF" | "0" => self.continuous = false,
                _ => self.push_error(-224, "Illegal parameter value"),
            }
        } else if header_matches(header, "INITiate:IMMediate") || header_matches(header, "INITiate") {
            self.sweeps += 1;
        } else if header_matches(header, "SENSe:BANDwidth") {
            match args.parse::<f64>() {
                Ok(hz) => self.bandwidth_hz = hz,
                Err(_) => self.push_error(-104, "Data type error"),
            }
        } else {
            self.push_error(-113, "Undefined header");
        }
    }

    fn query(&mut self, header: &str, args: &str, command: &str) -> Result<Reply> {
        if header.eq_ignore_ascii_case("*IDN?") {
            line(self.identity.clone())
        } else if header.eq_ignore_ascii_case("*STB?") {
            line(self.status_byte.to_string())
        } else if header.eq_ignore_ascii_case("*OPC?") {
            line("1".to_string())
        } else if header_matches(header, "SYSTem:ERRor:NEXT?") || header_matches(header, "SYSTem:ERRor?") {
            let next = self.errors.pop_front();
            if self.errors.is_empty() {
                self.status_byte &= !STB_ERROR_QUEUE;
            }
            line(next.unwrap_or_else(|| "0,\"No error\"".to_string()))
        } else if header_matches(header, "CALCulate:DATA?") && args.eq_ignore_ascii_case("SDATA") {
            let values: Vec<f64> = match self.selected_samples() {
                Some(samples) => samples.iter().flat_map(|z| [z.re, z.im]).collect(),
                None => {
                    self.push_error(-221, "Settings conflict; no trace selected");
                    return Err(self.no_reply(command));
                }
            };
            self.encode(&values)
        } else if header_matches(header, "CALCulate:DATA:STIMulus?") {
            let points = match self.selected_samples() {
                Some(samples) => samples.len(),
                None => {
                    self.push_error(-221, "Settings conflict; no trace selected");
                    return Err(self.no_reply(command));
                }
            };
            self.encode(&linear_sweep(points))
        } else if header_matches(header, "CONFigure:TRACe:CATalog?") {
            let catalog = self
                .traces
                .iter()
                .enumerate()
                .map(|(i, (name, _))| format!("{},{}", i + 1, name))
                .collect::<Vec<_>>()
                .join(",");
            line(format!("'{}'", catalog))
        } else if header_matches(header, "SENSe:BANDwidth?") {
            line(self.bandwidth_hz.to_string())
        } else {
            // A real instrument stays silent on an unknown query
            self.push_error(-113, "Undefined header");
            Err(self.no_reply(command))
        }
    }

    fn selected_samples(&self) -> Option<&[Complex64]> {
        let selected = self.selected.as_deref()?;
        self.traces
            .iter()
            .find(|(name, _)| name == selected)
            .map(|(_, samples)| samples.as_slice())
    }

    fn encode(&self, values: &[f64]) -> Result<Reply> {
        match self.data_format {
            DataFormat::Ascii => line(
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            DataFormat::Real32 => {
                let payload: Vec<u8> = values
                    .iter()
                    .flat_map(|v| (*v as f32).to_le_bytes())
                    .collect();
                Ok(Reply::Block(encode_definite_block(&payload)?))
            }
            DataFormat::Real64 => {
                let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                Ok(Reply::Block(encode_definite_block(&payload)?))
            }
        }
    }

    fn no_reply(&self, command: &str) -> VnaError {
        VnaError::Timeout {
            command: command.to_string(),
            timeout: Duration::ZERO,
        }
    }
}

fn line(reply: String) -> Result<Reply> {
    Ok(Reply::Line(reply))
}

fn linear_sweep(points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![START_FREQUENCY_HZ],
        n => {
            let step = (STOP_FREQUENCY_HZ - START_FREQUENCY_HZ) / (n - 1) as f64;
            (0..n).map(|i| START_FREQUENCY_HZ + step * i as f64).collect()
        }
    }
}

/// Match a SCPI header against a pattern like `CALCulate:PARameter:SELect`.
///
/// Each node may be given in short form (the uppercase part) or long form, in
/// any case, with an optional numeric suffix.
pub(crate) fn header_matches(header: &str, pattern: &str) -> bool {
    let header = header.trim_start_matches(':');
    let (header, header_q) = strip_query(header);
    let (pattern, pattern_q) = strip_query(pattern);
    if header_q != pattern_q {
        return false;
    }

    let nodes: Vec<&str> = header.split(':').collect();
    let pattern_nodes: Vec<&str> = pattern.split(':').collect();
    nodes.len() == pattern_nodes.len()
        && nodes
            .iter()
            .zip(&pattern_nodes)
            .all(|(node, pat)| node_matches(node, pat))
}

fn strip_query(s: &str) -> (&str, bool) {
    match s.strip_suffix('?') {
        Some(rest) => (rest, true),
        None => (s, false),
    }
}

fn node_matches(node: &str, pattern: &str) -> bool {
    let name = node.trim_end_matches(|c: char| c.is_ascii_digit());
    if name.is_empty() {
        return false;
    }
    let long = pattern.to_ascii_uppercase();
    let short: String = pattern.chars().filter(|c| !c.is_ascii_lowercase()).collect();
    let name = name.to_ascii_uppercase();
    name == long || name == short
}

#[async_trait]
impl ScpiTransport for MockVna {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("Mock SCPI write: {}", command);
        // Queries sent via write() leave their reply unread, like on a real socket
        self.handle(command)?;
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        tracing::debug!("Mock SCPI query: {}", command);
        match self.handle(command)? {
            Some(Reply::Line(reply)) => Ok(reply),
            Some(Reply::Block(_)) => Err(VnaError::parse(format!(
                "'{}' returned a binary block",
                command
            ))),
            None => Err(VnaError::Timeout {
                command: command.to_string(),
                timeout: Duration::ZERO,
            }),
        }
    }

    async fn query_block(&self, command: &str) -> Result<Vec<u8>> {
        tracing::debug!("Mock SCPI block query: {}", command);
        match self.handle(command)? {
            Some(Reply::Block(block)) => {
                crate::scpi::parse_definite_block(&block).map(<[u8]>::to_vec)
            }
            Some(Reply::Line(reply)) => Err(VnaError::parse(format!(
                "expected a binary block, got '{}'",
                reply
            ))),
            None => Err(VnaError::Timeout {
                command: command.to_string(),
                timeout: Duration::ZERO,
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_matching() {
        assert!(header_matches("CALC:PAR:SEL", "CALCulate:PARameter:SELect"));
        assert!(header_matches("calculate1:parameter:select", "CALCulate:PARameter:SELect"));
        assert!(header_matches("FORMat:DATA", "FORMat:DATA"));
        assert!(header_matches("CALCulate:DATa?", "CALCulate:DATA?"));
        assert!(header_matches(":SYST:ERR:NEXT?", "SYSTem:ERRor:NEXT?"));
        assert!(!header_matches("CALC:DATA", "CALCulate:DATA?"));
        assert!(!header_matches("CALCU:DATA?", "CALCulate:DATA?"));
        assert!(!header_matches("CALC:DATA:STIM?", "CALCulate:DATA?"));
    }

    #[tokio::test]
    async fn test_identity_and_log() {
        let vna = MockVna::new().with_identity("ACME,VNA,1,1.0");
        assert_eq!(vna.query("*IDN?").await.unwrap(), "ACME,VNA,1,1.0");
        vna.write("*CLS").await.unwrap();
        assert_eq!(vna.command_log(), vec!["*IDN?", "*CLS"]);

        vna.clear_command_log();
        assert!(vna.command_log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_trace_sets_status_and_queues_error() {
        let vna = MockVna::new();
        vna.write("CALC:PAR:SEL \"Nope\"").await.unwrap();
        assert_eq!(vna.query("*STB?").await.unwrap(), "4");

        let error = vna.query("SYST:ERR:NEXT?").await.unwrap();
        assert!(error.starts_with("-114,"));
        assert!(error.contains("Nope"));
        assert_eq!(vna.query("*STB?").await.unwrap(), "0");
        assert_eq!(vna.query("SYST:ERR:NEXT?").await.unwrap(), "0,\"No error\"");
    }

    #[tokio::test]
    async fn test_ascii_trace_data() {
        let vna = MockVna::empty().with_trace(
            "S21",
            vec![Complex64::new(0.5, -0.25), Complex64::new(1.0, 0.0)],
        );
        vna.write("CALC:PAR:SEL 'S21'").await.unwrap();
        assert_eq!(vna.selected_trace().as_deref(), Some("S21"));
        assert_eq!(
            vna.query("CALCulate:DATa? Sdata").await.unwrap(),
            "0.5,-0.25,1,0"
        );
        assert_eq!(
            vna.query("CALC1:DATA:STIM?").await.unwrap(),
            "1000000000,2000000000"
        );
    }

    #[tokio::test]
    async fn test_binary_trace_data() {
        let vna = MockVna::empty().with_trace("Trc1", vec![Complex64::new(0.5, 2.0)]);
        vna.write("FORMat:DATA REAL,64").await.unwrap();
        vna.write("CALC:PAR:SEL \"Trc1\"").await.unwrap();
        assert_eq!(vna.data_format(), DataFormat::Real64);

        let payload = vna.query_block("CALC:DATA? SDATA").await.unwrap();
        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[..8], &0.5f64.to_le_bytes());

        // Line queries refuse block replies
        assert!(vna.query("CALC:DATA? SDATA").await.is_err());
    }

    #[tokio::test]
    async fn test_data_without_selection_times_out() {
        let vna = MockVna::new();
        let result = vna.query("CALC:DATA? SDATA").await;
        assert!(matches!(result, Err(VnaError::Timeout { .. })));
        assert_eq!(vna.query("*STB?").await.unwrap(), "4");
    }

    #[tokio::test]
    async fn test_sweep_and_bandwidth_state() {
        let vna = MockVna::new();
        vna.write("INIT1:CONT OFF").await.unwrap();
        vna.write("INIT1:IMM").await.unwrap();
        vna.write("SENS1:BAND 1000").await.unwrap();
        assert!(!vna.is_continuous());
        assert_eq!(vna.sweep_count(), 1);
        assert_eq!(vna.bandwidth_hz(), 1000.0);

        vna.write("*RST").await.unwrap();
        assert!(vna.is_continuous());
        assert_eq!(vna.bandwidth_hz(), DEFAULT_BANDWIDTH_HZ);
    }

    #[tokio::test]
    async fn test_catalog() {
        let vna = MockVna::new().with_trace("Trc2", vec![]);
        assert_eq!(
            vna.query("CONF:TRAC:CAT?").await.unwrap(),
            "'1,Trc1,2,Trc2'"
        );
    }

    #[tokio::test]
    async fn test_failure_is_one_shot() {
        let vna = MockVna::new();
        vna.fail_next();
        assert!(matches!(
            vna.query("*IDN?").await,
            Err(VnaError::ConnectionClosed)
        ));
        assert!(vna.query("*IDN?").await.is_ok());
        // The failed call never reached the instrument
        assert_eq!(vna.command_log(), vec!["*IDN?"]);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_commands() {
        let vna = MockVna::new();
        vna.close().await.unwrap();
        assert!(vna.is_closed());
        assert!(vna.write("*CLS").await.is_err());
    }

    #[test]
    fn test_linear_sweep() {
        assert!(linear_sweep(0).is_empty());
        assert_eq!(linear_sweep(1), vec![START_FREQUENCY_HZ]);
        assert_eq!(linear_sweep(3), vec![1.0e9, 1.5e9, 2.0e9]);
    }
}
