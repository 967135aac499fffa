//! Configuration using Figment
//!
//! Settings are loaded from, in increasing priority:
//! 1. built-in defaults
//! 2. a TOML file (`config/vna.toml` unless another path is given; a missing file is fine)
//! 3. environment variables prefixed with `VNA_` (`__` separates nested keys)
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use vna_scpi::config::AppConfig;
//!
//! // VNA_SESSION__TIMEOUT_MS=2500 overrides session.timeout_ms
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Analyzer: {}", config.address);
//! # Ok::<(), vna_scpi::VnaError>(())
//! ```

use crate::error::{Result, VnaError};
use crate::logging::OutputFormat;
use crate::trace::{DataFormat, TraceFormat};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = "config/vna.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "VNA_";

/// Session parameters applied when a connection is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnaConfig {
    /// Reply timeout in milliseconds (also bounds the TCP connect)
    pub timeout_ms: u64,
    /// How long a single sweep may take before `*OPC?` gives up, in milliseconds
    pub sweep_timeout_ms: u64,
    /// Appended to every command
    pub write_termination: String,
    /// Marks the end of every reply
    pub read_termination: String,
    /// Wire encoding requested for trace data
    pub data_format: DataFormat,
}

impl Default for VnaConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            sweep_timeout_ms: 30_000,
            write_termination: "\n".to_string(),
            read_termination: "\n".to_string(),
            data_format: DataFormat::Ascii,
        }
    }
}

impl VnaConfig {
    /// Reply timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep completion timeout as a [`Duration`].
    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }

    /// Check the session parameters.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(VnaError::Configuration(
                "timeout_ms must be greater than zero".into(),
            ));
        }
        if self.sweep_timeout_ms == 0 {
            return Err(VnaError::Configuration(
                "sweep_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.write_termination.is_empty() {
            return Err(VnaError::Configuration(
                "write_termination must not be empty".into(),
            ));
        }
        if self.read_termination.is_empty() {
            return Err(VnaError::Configuration(
                "read_termination must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration for the `vna-trace` program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// VISA resource string of the analyzer
    pub address: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
    /// Session parameters
    pub session: VnaConfig,
    /// Traces to fetch
    pub traces: Vec<String>,
    /// Representation of the fetched traces
    pub format: TraceFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            address: "TCPIP::192.168.29.103::5025::SOCKET".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
            session: VnaConfig::default(),
            traces: vec!["Trc1".to_string()],
            format: TraceFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`AppConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(VnaError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.traces.is_empty() {
            return Err(VnaError::Configuration(
                "at least one trace must be listed".into(),
            ));
        }
        if let Some(blank) = self.traces.iter().find(|t| t.trim().is_empty()) {
            return Err(VnaError::Configuration(format!(
                "trace names must not be blank, got {:?}",
                blank
            )));
        }

        self.session.validate()
    }
}
