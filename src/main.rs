//! CLI Entry Point for vna-trace
//!
//! Connects to a network analyzer, prints its identity and fetches trace data.
//!
//! # Usage
//!
//! Fetch the default trace from the configured analyzer:
//! ```bash
//! vna-trace --address TCPIP::192.168.29.103::5025::SOCKET
//! ```
//!
//! Trigger a sweep, fetch two traces with their stimulus and save them:
//! ```bash
//! vna-trace --sweep --trace Trc1 --trace Trc2 --frequencies --output traces.csv
//! ```
//!
//! Try it without hardware:
//! ```bash
//! vna-trace --mock --format real-imag --json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use vna_scpi::config::{AppConfig, DEFAULT_CONFIG_PATH};
use vna_scpi::logging::{self, OutputFormat};
use vna_scpi::mock::MockVna;
use vna_scpi::{export, DataFormat, TraceData, TraceFormat, Vna};

#[derive(Parser)]
#[command(name = "vna-trace")]
#[command(about = "Fetch trace data from a network analyzer over SCPI", long_about = None)]
struct Cli {
    /// Settings file (missing file is ignored)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// VISA resource string, e.g. TCPIP::192.168.29.103::5025::SOCKET
    #[arg(long)]
    address: Option<String>,

    /// Trace to fetch (repeatable)
    #[arg(long = "trace")]
    traces: Vec<String>,

    /// real-imag, db-phase or amp-phase
    #[arg(long)]
    format: Option<String>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Wire encoding of trace data: ascii, real32 or real64
    #[arg(long)]
    data_format: Option<String>,

    /// Reset the instrument before measuring
    #[arg(long)]
    reset: bool,

    /// Trigger a single sweep and wait for it before fetching
    #[arg(long)]
    sweep: bool,

    /// Also fetch the stimulus frequencies of each trace
    #[arg(long)]
    frequencies: bool,

    /// Write the traces to this CSV file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print traces as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// pretty, compact or json
    #[arg(long)]
    log_format: Option<String>,

    /// Use a simulated analyzer instead of connecting
    #[arg(long)]
    mock: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if !self.traces.is_empty() {
            config.traces = self.traces.clone();
        }
        if let Some(format) = &self.format {
            config.format = format.parse::<TraceFormat>()?;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session.timeout_ms = timeout_ms;
        }
        if let Some(data_format) = &self.data_format {
            config.session.data_format = data_format.parse::<DataFormat>()?;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.parse::<OutputFormat>()?;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    cli.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    logging::init_from_config(&config)?;

    let vna = if cli.mock {
        tracing::info!("using simulated analyzer");
        Vna::with_transport("mock", Box::new(MockVna::new()), config.session.clone()).await?
    } else {
        Vna::connect(&config.address, config.session.clone())
            .await
            .with_context(|| format!("Could not open {}", config.address))?
    };

    println!("{}", vna.query("*IDN?").await?);

    if cli.reset {
        vna.reset().await.context("Reset failed")?;
    }
    if cli.sweep {
        vna.single_sweep().await.context("Sweep failed")?;
    }

    let traces = fetch(&vna, &config, cli.frequencies).await?;

    if cli.json {
        println!("{}", export::to_json(&traces)?);
    } else {
        for trace in &traces {
            print_trace(trace);
        }
    }

    if let Some(path) = &cli.output {
        export::write_csv_file(path, &traces)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    vna.close().await?;
    Ok(())
}

async fn fetch(vna: &Vna, config: &AppConfig, with_frequencies: bool) -> Result<Vec<TraceData>> {
    if !with_frequencies {
        return Ok(vna.get_traces(&config.traces, config.format).await?);
    }

    let mut traces = Vec::with_capacity(config.traces.len());
    for name in &config.traces {
        let trace = vna
            .get_data_with_frequencies(name, config.format)
            .await
            .with_context(|| format!("Failed to fetch {}", name))?;
        traces.push(trace);
    }
    Ok(traces)
}

fn print_trace(trace: &TraceData) {
    let (first, second) = trace.format.column_names();
    println!("{} ({}, {} points)", trace.name, trace.format, trace.len());

    match &trace.frequencies {
        Some(frequencies) => {
            println!("{:>6} {:>16} {:>14} {:>14}", "index", "frequency_hz", first, second);
            for (i, ((a, b), f)) in trace.points().zip(frequencies).enumerate() {
                println!("{:>6} {:>16.0} {:>14.6} {:>14.6}", i, f, a, b);
            }
        }
        None => {
            println!("{:>6} {:>14} {:>14}", "index", first, second);
            for (i, (a, b)) in trace.points().enumerate() {
                println!("{:>6} {:>14.6} {:>14.6}", i, a, b);
            }
        }
    }
}
