//! Trace data decoding.
//!
//! The analyzer returns formatted S-parameter data (`CALCulate:DATa? SDATa`) as
//! interleaved real/imaginary pairs, either as comma-separated ASCII or as an
//! IEEE 488.2 block of little-endian floats. This module turns either form into
//! complex samples and then into the two real-valued series the caller asked for.

use crate::error::{Result, VnaError};
use bytes::Buf;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Representation of each complex sample in the returned series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceFormat {
    /// Real and imaginary parts.
    RealImag,
    /// Magnitude in dB (`20·log10|z|`) and phase in radians.
    #[default]
    DbPhase,
    /// Power (`|z|²`) and phase in radians.
    AmpPhase,
}

impl TraceFormat {
    /// Canonical name used on the command line and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceFormat::RealImag => "real-imag",
            TraceFormat::DbPhase => "db-phase",
            TraceFormat::AmpPhase => "amp-phase",
        }
    }

    /// Column labels for the two output series.
    pub fn column_names(&self) -> (&'static str, &'static str) {
        match self {
            TraceFormat::RealImag => ("real", "imag"),
            TraceFormat::DbPhase => ("db", "phase_rad"),
            TraceFormat::AmpPhase => ("power", "phase_rad"),
        }
    }

    fn convert(&self, z: Complex64) -> (f64, f64) {
        match self {
            TraceFormat::RealImag => (z.re, z.im),
            // |z| == 0 yields -inf dB, matching what the analyzer itself displays
            TraceFormat::DbPhase => (20.0 * z.norm().log10(), z.arg()),
            TraceFormat::AmpPhase => (z.norm_sqr(), z.arg()),
        }
    }
}

impl FromStr for TraceFormat {
    type Err = VnaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "real-imag" => Ok(TraceFormat::RealImag),
            "db-phase" => Ok(TraceFormat::DbPhase),
            "amp-phase" => Ok(TraceFormat::AmpPhase),
            _ => Err(VnaError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding the analyzer uses for numeric data on the wire (`FORMat:DATA`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma-separated ASCII numbers.
    #[default]
    Ascii,
    /// Definite-length block of little-endian `f32`.
    Real32,
    /// Definite-length block of little-endian `f64`.
    Real64,
}

impl DataFormat {
    /// The `FORMat:DATA` command selecting this encoding.
    pub fn command(&self) -> &'static str {
        match self {
            DataFormat::Ascii => "FORMat:DATA ASCii",
            DataFormat::Real32 => "FORMat:DATA REAL,32",
            DataFormat::Real64 => "FORMat:DATA REAL,64",
        }
    }

    /// Bytes per value for binary encodings.
    pub fn width(&self) -> Option<usize> {
        match self {
            DataFormat::Ascii => None,
            DataFormat::Real32 => Some(4),
            DataFormat::Real64 => Some(8),
        }
    }
}

impl FromStr for DataFormat {
    type Err = VnaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ascii" => Ok(DataFormat::Ascii),
            "real32" | "real,32" => Ok(DataFormat::Real32),
            "real64" | "real,64" => Ok(DataFormat::Real64),
            other => Err(VnaError::parse(format!(
                "unknown data format '{}', expected ascii, real32 or real64",
                other
            ))),
        }
    }
}

/// Parse a comma-separated ASCII reply into numbers.
///
/// An empty reply yields an empty vector.
pub fn parse_ascii_values(text: &str) -> Result<Vec<f64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .enumerate()
        .map(|(i, token)| {
            let token = token.trim();
            token.parse::<f64>().map_err(|_| {
                VnaError::parse(format!("value #{} '{}' is not a number", i, token))
            })
        })
        .collect()
}

/// Decode a block payload of little-endian floats of `width` bytes (4 or 8).
pub fn decode_real_block(payload: &[u8], width: usize) -> Result<Vec<f64>> {
    if width != 4 && width != 8 {
        return Err(VnaError::parse(format!("unsupported float width {}", width)));
    }
    if payload.len() % width != 0 {
        return Err(VnaError::parse(format!(
            "block length {} is not a multiple of {}",
            payload.len(),
            width
        )));
    }

    let mut buf = payload;
    let mut values = Vec::with_capacity(payload.len() / width);
    while buf.has_remaining() {
        let value = if width == 8 {
            buf.get_f64_le()
        } else {
            f64::from(buf.get_f32_le())
        };
        values.push(value);
    }
    Ok(values)
}

/// Pair interleaved `re, im, re, im, ...` values into complex samples.
pub fn to_complex(values: &[f64]) -> Result<Vec<Complex64>> {
    if values.len() % 2 != 0 {
        return Err(VnaError::parse(format!(
            "expected interleaved real/imaginary pairs, got {} values",
            values.len()
        )));
    }
    Ok(values
        .chunks_exact(2)
        .map(|pair| Complex64::new(pair[0], pair[1]))
        .collect())
}

/// One trace converted into two real-valued series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    /// Trace name as known to the analyzer (e.g. `Trc1`).
    pub name: String,
    /// How `first`/`second` were derived.
    pub format: TraceFormat,
    /// Real part, dB magnitude or power, depending on `format`.
    pub first: Vec<f64>,
    /// Imaginary part or phase in radians, depending on `format`.
    pub second: Vec<f64>,
    /// Stimulus values (Hz) when they were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<f64>>,
}

impl TraceData {
    /// Convert complex samples into the requested representation.
    pub fn from_complex(name: impl Into<String>, samples: &[Complex64], format: TraceFormat) -> Self {
        let (first, second) = samples.iter().map(|z| format.convert(*z)).unzip();
        Self {
            name: name.into(),
            format,
            first,
            second,
            frequencies: None,
        }
    }

    /// Attach stimulus values.
    ///
    /// # Errors
    /// Returns [`VnaError::Parse`] if the point count does not match the trace.
    pub fn with_frequencies(mut self, frequencies: Vec<f64>) -> Result<Self> {
        if frequencies.len() != self.len() {
            return Err(VnaError::parse(format!(
                "trace '{}' has {} points but stimulus has {}",
                self.name,
                self.len(),
                frequencies.len()
            )));
        }
        self.frequencies = Some(frequencies);
        Ok(self)
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.first.len()
    }

    /// `true` when the trace holds no points.
    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// Iterate `(first, second)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.first.iter().copied().zip(self.second.iter().copied())
    }
}
