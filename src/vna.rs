//! Vector Network Analyzer Driver
//!
//! Driver for Rohde & Schwarz ZNB-family analyzers (and SCPI-compatible
//! instruments) reached over a raw socket.
//!
//! Protocol Overview:
//! - Transport: TCP, port 5025 (`TCPIP::<host>::5025::SOCKET`)
//! - Terminator: LF (`\n`) in both directions by default
//! - Every write is followed by a `*STB?` check; a non-zero status byte pulls
//!   the next entry of the error queue (`SYSTem:ERRor:NEXT?`) and clears it (`*CLS`)
//! - Trace data: `CALCulate:DATa? SDATa` returns interleaved real/imaginary pairs
//!
//! # Example Usage
//!
//! ```no_run
//! use vna_scpi::{TraceFormat, Vna, VnaConfig};
//!
//! #[tokio::main]
//! async fn main() -> vna_scpi::Result<()> {
//!     let vna = Vna::connect("TCPIP::192.168.29.103::5025::SOCKET", VnaConfig::default()).await?;
//!     println!("{}", vna.query("*IDN?").await?);
//!
//!     vna.single_sweep().await?;
//!     let traces = vna.get_traces(&["Trc1"], TraceFormat::DbPhase).await?;
//!     println!("{:?}", traces);
//!
//!     vna.close().await
//! }
//! ```

use crate::config::VnaConfig;
use crate::error::{Result, VnaError};
use crate::resource::ResourceAddress;
use crate::scpi::{ScpiTransport, TcpScpiClient};
use crate::trace::{decode_real_block, parse_ascii_values, to_complex, TraceData, TraceFormat};

/// Identifier of this driver.
pub const DRIVER_ID: &str = "rs.vna.znb.v1";

/// Channel addressed by channel-scoped commands.
pub const DEFAULT_CHANNEL: u32 = 1;

/// Minimum measurement bandwidth in Hertz.
pub const MIN_BANDWIDTH_HZ: f64 = 1.0;

/// Maximum measurement bandwidth in Hertz.
pub const MAX_BANDWIDTH_HZ: f64 = 1_000_000.0;

/// An open session to one analyzer.
///
/// The session owns its transport; dropping it closes the connection.
pub struct Vna {
    transport: Box<dyn ScpiTransport>,
    config: VnaConfig,
    address: String,
    identity: String,
}

impl Vna {
    /// Open a session to the analyzer at `address` (a VISA resource string).
    ///
    /// Clears the status registers, reads the identity string and selects the
    /// configured data format. Any failure is reported as [`VnaError::Connect`].
    pub async fn connect(address: &str, config: VnaConfig) -> Result<Self> {
        tracing::info!("connecting to '{}'", address);

        let transport = async {
            config.validate()?;
            let resource: ResourceAddress = address.parse()?;
            let socket_addr = resource.socket_addr()?;
            TcpScpiClient::connect(&socket_addr, &config).await
        }
        .await
        .map_err(|e| connect_error(address, e))?;

        Self::with_transport(address, Box::new(transport), config).await
    }

    /// Open a session over an already established transport.
    ///
    /// `address` is only used for logging and error reporting.
    pub async fn with_transport(
        address: &str,
        transport: Box<dyn ScpiTransport>,
        config: VnaConfig,
    ) -> Result<Self> {
        let mut vna = Self {
            transport,
            config,
            address: address.to_string(),
            identity: String::new(),
        };

        vna.identity = vna
            .handshake()
            .await
            .map_err(|e| connect_error(address, e))?;

        tracing::info!("connection established! {}", vna.identity);
        Ok(vna)
    }

    async fn handshake(&self) -> Result<String> {
        self.write("*CLS").await?;
        let identity = self.query("*IDN?").await?.trim().to_string();
        self.apply_data_format().await?;
        Ok(identity)
    }

    async fn apply_data_format(&self) -> Result<()> {
        self.write(self.config.data_format.command()).await?;
        if self.config.data_format.width().is_some() {
            self.write("FORMat:BORDer SWAPped").await?;
        }
        Ok(())
    }

    /// Identity string reported by `*IDN?` when the session was opened.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Address the session was opened with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Session parameters.
    pub fn config(&self) -> &VnaConfig {
        &self.config
    }

    /// Send a SCPI command and check the instrument accepted it.
    ///
    /// # Errors
    /// Returns [`VnaError::CommandFailed`] carrying the instrument's error
    /// message if the status byte is non-zero afterwards.
    pub async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("[write]: {}", command);
        self.transport.write(command).await?;

        match self.error_status().await? {
            Some(detail) => Err(VnaError::CommandFailed {
                command: command.to_string(),
                detail,
            }),
            None => Ok(()),
        }
    }

    /// Send a SCPI query and return the reply.
    pub async fn query(&self, command: &str) -> Result<String> {
        tracing::debug!("[query]: {}", command);
        self.transport.query(command).await
    }

    /// Check the status byte for a pending error.
    ///
    /// Returns the next error-queue entry when the status byte is non-zero.
    /// The status registers are cleared afterwards in either case.
    pub async fn error_status(&self) -> Result<Option<String>> {
        let stb = self.transport.query("*STB?").await?;
        let stb: i64 = stb
            .trim()
            .parse()
            .map_err(|_| VnaError::parse(format!("invalid status byte '{}'", stb)))?;

        if stb == 0 {
            return Ok(None);
        }

        let message = self.transport.query("SYSTem:ERRor:NEXT?").await;
        // Clear unconditionally; sent raw so it cannot recurse into another status check
        let cleared = self.transport.write("*CLS").await;

        let message = message?;
        cleared?;
        tracing::error!("command failure: {}", message);
        Ok(Some(message))
    }

    /// Reset the instrument to default values.
    ///
    /// The configured data format is selected again since `*RST` reverts it to ASCII.
    pub async fn reset(&self) -> Result<()> {
        self.write("*RST").await?;
        self.apply_data_format().await
    }

    /// Make `trace` the active trace for subsequent trace-scoped queries.
    pub async fn select_trace(&self, trace: &str) -> Result<()> {
        self.write(&format!("CALC:PARameter:SEL \"{}\"", trace))
            .await
    }

    /// Fetch one trace in the requested representation.
    pub async fn get_data(&self, trace: &str, format: TraceFormat) -> Result<TraceData> {
        self.select_trace(trace).await?;
        let values = self.read_values("CALCulate:DATa? Sdata").await?;
        let samples = to_complex(&values)?;
        tracing::debug!(trace, points = samples.len(), %format, "trace data received");
        Ok(TraceData::from_complex(trace, &samples, format))
    }

    /// Fetch several traces, in order.
    pub async fn get_traces<S: AsRef<str>>(
        &self,
        traces: &[S],
        format: TraceFormat,
    ) -> Result<Vec<TraceData>> {
        let mut data = Vec::with_capacity(traces.len());
        for trace in traces {
            data.push(self.get_data(trace.as_ref(), format).await?);
        }
        Ok(data)
    }

    /// Stimulus values (Hz) of `trace`.
    pub async fn frequencies(&self, trace: &str) -> Result<Vec<f64>> {
        self.select_trace(trace).await?;
        self.read_values(&format!("CALCulate{}:DATA:STIMulus?", DEFAULT_CHANNEL))
            .await
    }

    /// Fetch one trace together with its stimulus values.
    pub async fn get_data_with_frequencies(
        &self,
        trace: &str,
        format: TraceFormat,
    ) -> Result<TraceData> {
        let data = self.get_data(trace, format).await?;
        let frequencies = self.frequencies(trace).await?;
        data.with_frequencies(frequencies)
    }

    /// List the traces defined on the instrument as `(number, name)` pairs.
    pub async fn trace_catalog(&self) -> Result<Vec<(u32, String)>> {
        let reply = self.query("CONFigure:TRACe:CATalog?").await?;
        parse_catalog(&reply)
    }

    /// Trigger a single sweep and wait for it to complete.
    ///
    /// The wait on `*OPC?` is bounded by `sweep_timeout_ms` rather than the
    /// ordinary reply timeout.
    pub async fn single_sweep(&self) -> Result<()> {
        self.set_continuous(false).await?;
        self.write(&format!("INITiate{}:IMMediate", DEFAULT_CHANNEL))
            .await?;

        tracing::debug!("[query]: *OPC?");
        let done = self
            .transport
            .query_with_timeout("*OPC?", self.config.sweep_timeout())
            .await?;
        if done.trim() != "1" {
            return Err(VnaError::parse(format!(
                "unexpected *OPC? reply '{}'",
                done
            )));
        }
        tracing::debug!("sweep complete");
        Ok(())
    }

    /// Switch continuous sweeping on or off.
    pub async fn set_continuous(&self, on: bool) -> Result<()> {
        let state = if on { "ON" } else { "OFF" };
        self.write(&format!("INITiate{}:CONTinuous {}", DEFAULT_CHANNEL, state))
            .await
    }

    /// Set the measurement (IF) bandwidth.
    ///
    /// # Errors
    /// Returns [`VnaError::OutOfRange`] unless
    /// `MIN_BANDWIDTH_HZ <= hz <= MAX_BANDWIDTH_HZ`.
    pub async fn set_bandwidth(&self, hz: f64) -> Result<()> {
        if !(MIN_BANDWIDTH_HZ..=MAX_BANDWIDTH_HZ).contains(&hz) {
            return Err(VnaError::OutOfRange {
                name: "bandwidth",
                value: hz,
                min: MIN_BANDWIDTH_HZ,
                max: MAX_BANDWIDTH_HZ,
            });
        }
        self.write(&format!("SENSe{}:BANDwidth {}", DEFAULT_CHANNEL, hz))
            .await
    }

    /// Close the session.
    pub async fn close(self) -> Result<()> {
        self.transport.close().await?;
        tracing::info!("connection to '{}' closed", self.address);
        Ok(())
    }

    async fn read_values(&self, command: &str) -> Result<Vec<f64>> {
        match self.config.data_format.width() {
            None => parse_ascii_values(&self.query(command).await?),
            Some(width) => {
                tracing::debug!("[query]: {}", command);
                let payload = self.transport.query_block(command).await?;
                decode_real_block(&payload, width)
            }
        }
    }
}

fn connect_error(address: &str, source: VnaError) -> VnaError {
    VnaError::Connect {
        address: address.to_string(),
        source: Box::new(source),
    }
}

/// Parse a `'1,Trc1,2,Trc2'` catalog reply.
fn parse_catalog(reply: &str) -> Result<Vec<(u32, String)>> {
    let inner = reply.trim().trim_matches(|c| c == '\'' || c == '"');
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let fields: Vec<&str> = inner.split(',').map(str::trim).collect();
    if fields.len() % 2 != 0 {
        return Err(VnaError::parse(format!(
            "trace catalog has an odd number of fields: '{}'",
            reply
        )));
    }

    fields
        .chunks_exact(2)
        .map(|pair| {
            let number = pair[0].parse::<u32>().map_err(|_| {
                VnaError::parse(format!("invalid trace number '{}' in catalog", pair[0]))
            })?;
            Ok((number, pair[1].to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockVna;
    use crate::trace::DataFormat;
    use num_complex::Complex64;
    use std::sync::Arc;
    use tracing_test::traced_test;

    async fn open(mock: MockVna, config: VnaConfig) -> (Vna, Arc<MockVna>) {
        let mock = Arc::new(mock);
        let vna = Vna::with_transport("mock", Box::new(mock.clone()), config)
            .await
            .unwrap();
        mock.clear_command_log();
        (vna, mock)
    }

    #[tokio::test]
    async fn test_handshake_sequence() {
        let mock = Arc::new(MockVna::new());
        let vna = Vna::with_transport("mock", Box::new(mock.clone()), VnaConfig::default())
            .await
            .unwrap();

        assert!(vna.identity().contains("ZNB8"));
        assert_eq!(
            mock.command_log(),
            vec!["*CLS", "*STB?", "*IDN?", "FORMat:DATA ASCii", "*STB?"]
        );
    }

    #[tokio::test]
    async fn test_binary_handshake_sets_byte_order() {
        let config = VnaConfig {
            data_format: DataFormat::Real64,
            ..Default::default()
        };
        let mock = Arc::new(MockVna::new());
        Vna::with_transport("mock", Box::new(mock.clone()), config)
            .await
            .unwrap();

        let log = mock.command_log();
        assert!(log.contains(&"FORMat:DATA REAL,64".to_string()));
        assert!(log.contains(&"FORMat:BORDer SWAPped".to_string()));
        assert_eq!(mock.data_format(), DataFormat::Real64);
    }

    #[tokio::test]
    async fn test_handshake_failure_is_connect_error() {
        let mock = MockVna::new();
        mock.fail_next();
        let result = Vna::with_transport("mock", Box::new(mock), VnaConfig::default()).await;
        match result {
            Err(VnaError::Connect { address, source }) => {
                assert_eq!(address, "mock");
                assert!(matches!(*source, VnaError::ConnectionClosed));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("handshake should fail"),
        }
    }

    #[tokio::test]
    async fn test_failed_write_reports_instrument_error_and_clears() {
        let (vna, mock) = open(MockVna::new(), VnaConfig::default()).await;

        let err = vna.write("BOGUS:COMMand 1").await.unwrap_err();
        match err {
            VnaError::CommandFailed { command, detail } => {
                assert_eq!(command, "BOGUS:COMMand 1");
                assert!(detail.contains("Undefined header"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(
            mock.command_log(),
            vec!["BOGUS:COMMand 1", "*STB?", "SYSTem:ERRor:NEXT?", "*CLS"]
        );
        assert_eq!(vna.error_status().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_data_db_phase() {
        let mock = MockVna::empty().with_trace(
            "Trc1",
            vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.1)],
        );
        let (vna, mock) = open(mock, VnaConfig::default()).await;

        let data = vna.get_data("Trc1", TraceFormat::DbPhase).await.unwrap();
        assert_eq!(data.name, "Trc1");
        assert_eq!(data.len(), 2);
        assert!(data.first[0].abs() < 1e-9);
        assert!((data.first[1] + 20.0).abs() < 1e-9);
        assert!((data.second[1] - std::f64::consts::FRAC_PI_2).abs() < 1e-9);

        assert_eq!(
            mock.command_log(),
            vec!["CALC:PARameter:SEL \"Trc1\"", "*STB?", "CALCulate:DATa? Sdata"]
        );
    }

    #[tokio::test]
    async fn test_get_data_binary_matches_ascii() {
        let samples = vec![Complex64::new(0.25, -0.5), Complex64::new(-1.0, 2.0)];

        let (ascii, _) = open(
            MockVna::empty().with_trace("Trc1", samples.clone()),
            VnaConfig::default(),
        )
        .await;
        let (binary, _) = open(
            MockVna::empty().with_trace("Trc1", samples),
            VnaConfig {
                data_format: DataFormat::Real64,
                ..Default::default()
            },
        )
        .await;

        let a = ascii.get_data("Trc1", TraceFormat::RealImag).await.unwrap();
        let b = binary.get_data("Trc1", TraceFormat::RealImag).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(b.first, vec![0.25, -1.0]);
    }

    #[tokio::test]
    async fn test_get_traces_preserves_order() {
        let mock = MockVna::new()
            .with_trace("Trc2", vec![Complex64::new(2.0, 0.0)])
            .with_trace("Trc3", vec![Complex64::new(3.0, 0.0)]);
        let (vna, _) = open(mock, VnaConfig::default()).await;

        let traces = vna
            .get_traces(&["Trc3", "Trc2"], TraceFormat::RealImag)
            .await
            .unwrap();
        let names: Vec<&str> = traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Trc3", "Trc2"]);
        assert_eq!(traces[0].first, vec![3.0]);
    }

    #[tokio::test]
    async fn test_unknown_trace_fails_on_selection() {
        let (vna, _) = open(MockVna::new(), VnaConfig::default()).await;
        let err = vna.get_data("Missing", TraceFormat::DbPhase).await.unwrap_err();
        assert!(matches!(err, VnaError::CommandFailed { .. }));
        assert!(err.to_string().contains("Missing"));
    }

    #[tokio::test]
    async fn test_get_data_with_frequencies() {
        let (vna, _) = open(MockVna::new(), VnaConfig::default()).await;
        let data = vna
            .get_data_with_frequencies("Trc1", TraceFormat::AmpPhase)
            .await
            .unwrap();
        let frequencies = data.frequencies.as_ref().unwrap();
        assert_eq!(frequencies.len(), data.len());
        assert_eq!(frequencies[0], 1.0e9);
        assert_eq!(frequencies[frequencies.len() - 1], 2.0e9);
    }

    #[tokio::test]
    async fn test_single_sweep() {
        let (vna, mock) = open(MockVna::new(), VnaConfig::default()).await;
        vna.single_sweep().await.unwrap();

        assert_eq!(mock.sweep_count(), 1);
        assert!(!mock.is_continuous());
        assert_eq!(
            mock.command_log(),
            vec![
                "INITiate1:CONTinuous OFF",
                "*STB?",
                "INITiate1:IMMediate",
                "*STB?",
                "*OPC?"
            ]
        );
    }

    #[tokio::test]
    async fn test_bandwidth_range() {
        let (vna, mock) = open(MockVna::new(), VnaConfig::default()).await;

        vna.set_bandwidth(1000.0).await.unwrap();
        assert_eq!(mock.bandwidth_hz(), 1000.0);
        vna.set_bandwidth(MIN_BANDWIDTH_HZ).await.unwrap();
        vna.set_bandwidth(MAX_BANDWIDTH_HZ).await.unwrap();

        mock.clear_command_log();
        assert!(matches!(
            vna.set_bandwidth(0.5).await,
            Err(VnaError::OutOfRange { .. })
        ));
        assert!(vna.set_bandwidth(2.0e6).await.is_err());
        // Rejected values never reach the instrument
        assert!(mock.command_log().is_empty());
    }

    #[tokio::test]
    async fn test_reset_reapplies_binary_format() {
        let config = VnaConfig {
            data_format: DataFormat::Real32,
            ..Default::default()
        };
        let (vna, mock) = open(MockVna::new(), config).await;
        vna.reset().await.unwrap();
        assert_eq!(mock.data_format(), DataFormat::Real32);
        assert_eq!(mock.command_log()[0], "*RST");
    }

    #[tokio::test]
    async fn test_trace_catalog() {
        let (vna, _) = open(MockVna::new().with_trace("S21", vec![]), VnaConfig::default()).await;
        let catalog = vna.trace_catalog().await.unwrap();
        assert_eq!(catalog, vec![(1, "Trc1".to_string()), (2, "S21".to_string())]);
    }

    #[test]
    fn test_parse_catalog() {
        assert!(parse_catalog("''").unwrap().is_empty());
        assert_eq!(
            parse_catalog("\"1,Trc1\"").unwrap(),
            vec![(1, "Trc1".to_string())]
        );
        assert!(parse_catalog("'1,Trc1,2'").is_err());
        assert!(parse_catalog("'x,Trc1'").is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_command_failure_is_logged() {
        let (vna, _) = open(MockVna::new(), VnaConfig::default()).await;
        assert!(vna.write("BOGUS:COMMand 1").await.is_err());
        assert!(logs_contain("[write]: BOGUS:COMMand 1"));
        assert!(logs_contain("command failure"));
    }

    #[tokio::test]
    async fn test_close_closes_transport() {
        let (vna, mock) = open(MockVna::new(), VnaConfig::default()).await;
        vna.close().await.unwrap();
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        let err = Vna::connect("GPIB0::1::INSTR", VnaConfig::default())
            .await
            .err()
            .unwrap();
        match err {
            VnaError::Connect { source, .. } => {
                assert!(matches!(*source, VnaError::InvalidAddress { .. }))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_rejects_vxi11() {
        let err = Vna::connect("TCPIP0::127.0.0.1::inst0::INSTR", VnaConfig::default())
            .await
            .err()
            .unwrap();
        match err {
            VnaError::Connect { source, .. } => {
                assert!(matches!(*source, VnaError::UnsupportedProtocol(_)))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
