//! # VNA SCPI Library
//!
//! This crate shows how to talk to a Vector Network Analyzer over a raw SCPI
//! socket: open a session from a VISA-style resource string, trigger a sweep,
//! and read trace data back as numbers. The `vna-trace` binary (`main.rs`) is
//! the runnable walkthrough of the same steps.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based settings (`VnaConfig` for a session, `AppConfig` for the binary).
//! - **`error`**: The `VnaError` enum used throughout the crate.
//! - **`export`**: CSV and JSON output of retrieved traces.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`mock`**: `MockVna`, a simulated analyzer for tests and dry runs.
//! - **`resource`**: Parsing of `TCPIP::<host>::<port>::SOCKET` addresses.
//! - **`scpi`**: The `ScpiTransport` trait and its TCP implementation.
//! - **`trace`**: Decoding of ASCII/binary trace replies into `TraceData`.
//! - **`vna`**: The `Vna` driver itself.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod mock;
pub mod resource;
pub mod scpi;
pub mod trace;
pub mod vna;

pub use config::{AppConfig, VnaConfig};
pub use error::{Result, VnaError};
pub use resource::ResourceAddress;
pub use scpi::{ScpiTransport, TcpScpiClient};
pub use trace::{DataFormat, TraceData, TraceFormat};
pub use vna::Vna;
