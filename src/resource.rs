//! VISA-style resource addresses.
//!
//! Supports resource strings like:
//! - "TCPIP::192.168.29.103::5025::SOCKET" (raw SCPI socket)
//! - "TCPIP0::vna.lab::5025::SOCKET" (explicit board number)
//! - "TCPIP0::192.168.1.100::inst0::INSTR" (VXI-11, parsed but not connectable)

use crate::error::{Result, VnaError};
use std::fmt;
use std::str::FromStr;

/// Default raw SCPI socket port used by most analyzers.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Resource class named by the last segment of the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    /// Raw TCP socket speaking line-terminated SCPI.
    Socket { port: u16 },
    /// VXI-11 instrument resource with an optional device name.
    Instr { device: Option<String> },
}

/// A parsed `TCPIP` resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    board: u16,
    host: String,
    protocol: Protocol,
}

impl ResourceAddress {
    /// Build a raw socket address on board 0.
    pub fn socket(host: impl Into<String>, port: u16) -> Self {
        Self {
            board: 0,
            host: host.into(),
            protocol: Protocol::Socket { port },
        }
    }

    /// Interface board number (`TCPIP<board>`).
    pub fn board(&self) -> u16 {
        self.board
    }

    /// Hostname or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resource class.
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// `host:port` suitable for `TcpStream::connect`.
    ///
    /// # Errors
    /// Returns [`VnaError::UnsupportedProtocol`] for `INSTR` resources.
    pub fn socket_addr(&self) -> Result<String> {
        match &self.protocol {
            Protocol::Socket { port } => Ok(format!("{}:{}", self.host, port)),
            Protocol::Instr { .. } => Err(VnaError::UnsupportedProtocol(self.to_string())),
        }
    }
}

impl FromStr for ResourceAddress {
    type Err = VnaError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| VnaError::InvalidAddress {
            address: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty resource string"));
        }

        let parts: Vec<&str> = trimmed.split("::").collect();
        let interface = parts[0].to_ascii_uppercase();
        let board = match interface.strip_prefix("TCPIP") {
            Some("") => 0,
            Some(digits) => digits
                .parse::<u16>()
                .map_err(|_| invalid("bad interface board number"))?,
            None => return Err(invalid("only TCPIP interfaces are supported")),
        };

        if parts.len() < 3 {
            return Err(invalid("expected TCPIP::<host>::...::<class>"));
        }

        let host = parts[1].trim();
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let class = parts[parts.len() - 1].to_ascii_uppercase();
        let protocol = match class.as_str() {
            "SOCKET" => {
                if parts.len() != 4 {
                    return Err(invalid("expected TCPIP::<host>::<port>::SOCKET"));
                }
                let port = parts[2]
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| invalid("port must be a number between 1 and 65535"))?;
                if port == 0 {
                    return Err(invalid("port must be a number between 1 and 65535"));
                }
                Protocol::Socket { port }
            }
            "INSTR" => match parts.len() {
                3 => Protocol::Instr { device: None },
                4 => Protocol::Instr {
                    device: Some(parts[2].trim().to_string()),
                },
                _ => return Err(invalid("expected TCPIP::<host>[::<device>]::INSTR")),
            },
            _ => return Err(invalid("resource class must be SOCKET or INSTR")),
        };

        Ok(Self {
            board,
            host: host.to_string(),
            protocol,
        })
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.protocol {
            Protocol::Socket { port } => {
                write!(f, "TCPIP{}::{}::{}::SOCKET", self.board, self.host, port)
            }
            Protocol::Instr { device: Some(device) } => {
                write!(f, "TCPIP{}::{}::{}::INSTR", self.board, self.host, device)
            }
            Protocol::Instr { device: None } => {
                write!(f, "TCPIP{}::{}::INSTR", self.board, self.host)
            }
        }
    }
}
