//! SCPI over TCP communication.
//!
//! This module provides the transport seam used by the analyzer driver: the
//! [`ScpiTransport`] trait, an async client speaking line-terminated SCPI over a
//! raw socket, and helpers for IEEE 488.2 definite-length binary blocks.

use crate::config::VnaConfig;
use crate::error::{Result, VnaError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Largest payload a definite-length block can describe (nine length digits).
pub const MAX_BLOCK_LEN: usize = 999_999_999;

/// Trait for SCPI communication transports.
///
/// Abstracts the underlying connection so the driver can run against a real
/// socket or a simulated analyzer.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return the trimmed response line.
    async fn query(&self, command: &str) -> Result<String>;

    /// Like [`ScpiTransport::query`], but wait up to `limit` for the reply.
    ///
    /// Transports without a reply timeout of their own just delegate to `query`.
    async fn query_with_timeout(&self, command: &str, _limit: Duration) -> Result<String> {
        self.query(command).await
    }

    /// Send a query whose reply is a definite-length block and return its payload.
    async fn query_block(&self, command: &str) -> Result<Vec<u8>>;

    /// Close the connection. Further calls fail.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: ScpiTransport + ?Sized> ScpiTransport for Arc<T> {
    async fn write(&self, command: &str) -> Result<()> {
        (**self).write(command).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        (**self).query(command).await
    }

    async fn query_with_timeout(&self, command: &str, limit: Duration) -> Result<String> {
        (**self).query_with_timeout(command, limit).await
    }

    async fn query_block(&self, command: &str) -> Result<Vec<u8>> {
        (**self).query_block(command).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Async SCPI client for raw socket connections.
pub struct TcpScpiClient {
    stream: Mutex<Option<BufReader<TcpStream>>>,
    timeout: Duration,
    write_termination: String,
    read_termination: String,
}

impl TcpScpiClient {
    /// Connect to `addr` (`host:port`) using the timing and terminators from `config`.
    ///
    /// The reply timeout also bounds the TCP connect.
    pub async fn connect(addr: &str, config: &VnaConfig) -> Result<Self> {
        let stream = open_stream(addr, config.timeout(), TcpStream::connect(addr)).await?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::debug!(addr, "TCP connection open");

        Ok(Self {
            stream: Mutex::new(Some(BufReader::new(stream))),
            timeout: config.timeout(),
            write_termination: config.write_termination.clone(),
            read_termination: config.read_termination.clone(),
        })
    }

    async fn send(stream: &mut BufReader<TcpStream>, command: &str, terminator: &str) -> Result<()> {
        let mut line = String::with_capacity(command.len() + terminator.len());
        line.push_str(command);
        line.push_str(terminator);

        let socket = stream.get_mut();
        socket.write_all(line.as_bytes()).await?;
        socket.flush().await?;
        Ok(())
    }

    /// Clear any pending data from the input buffer.
    fn flush_input_buffer(stream: &mut BufReader<TcpStream>) -> Result<()> {
        // Consume any data in BufReader's internal buffer
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Flushing {} bytes from buffer", buffered);
            stream.consume(buffered);
        }

        let mut discard = [0u8; 256];
        loop {
            match stream.get_mut().try_read(&mut discard) {
                Ok(0) => break,
                Ok(n) => tracing::debug!("Flushed {} stale bytes from stream", n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

async fn open_stream<F>(addr: &str, limit: Duration, connecting: F) -> Result<TcpStream>
where
    F: Future<Output = std::io::Result<TcpStream>>,
{
    let stream = timeout(limit, connecting)
        .await
        .map_err(|_| timed_out(&format!("connect {}", addr), limit))??;
    Ok(stream)
}

fn timed_out(command: &str, limit: Duration) -> VnaError {
    VnaError::Timeout {
        command: command.to_string(),
        timeout: limit,
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(VnaError::ConnectionClosed)?;
        Self::send(stream, command, &self.write_termination).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.query_with_timeout(command, self.timeout).await
    }

    async fn query_with_timeout(&self, command: &str, limit: Duration) -> Result<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(VnaError::ConnectionClosed)?;

        Self::flush_input_buffer(stream)?;
        Self::send(stream, command, &self.write_termination).await?;

        let line = timeout(limit, read_line(stream, &self.read_termination))
            .await
            .map_err(|_| timed_out(command, limit))??;

        let response = String::from_utf8_lossy(&line).trim().to_string();
        tracing::trace!(command, response = %response, "SCPI reply");
        Ok(response)
    }

    async fn query_block(&self, command: &str) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(VnaError::ConnectionClosed)?;

        Self::flush_input_buffer(stream)?;
        Self::send(stream, command, &self.write_termination).await?;

        let read = async {
            let payload = read_block(stream).await?;
            // The block is followed by the regular read terminator
            read_line(stream, &self.read_termination).await?;
            Ok::<_, VnaError>(payload)
        };
        let payload = timeout(self.timeout, read)
            .await
            .map_err(|_| timed_out(command, self.timeout))??;

        tracing::trace!(command, bytes = payload.len(), "SCPI block reply");
        Ok(payload)
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            stream.get_mut().shutdown().await?;
            tracing::debug!("TCP connection closed");
        }
        Ok(())
    }
}

/// Read up to and including `terminator`, returning the bytes before it.
async fn read_line<R>(reader: &mut R, terminator: &str) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let term = terminator.as_bytes();
    let last = *term.last().ok_or_else(|| VnaError::parse("empty read terminator"))?;

    let mut line = Vec::new();
    loop {
        let n = reader.read_until(last, &mut line).await?;
        if n == 0 {
            return Err(VnaError::ConnectionClosed);
        }
        if line.ends_with(term) {
            line.truncate(line.len() - term.len());
            return Ok(line);
        }
    }
}

/// Read one `#<n><len><payload>` block from `reader`.
async fn read_block<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = [0u8; 2];
    read_exact(reader, &mut header).await?;
    let digits = header_digit_count(&header)?;

    let mut len_field = vec![0u8; digits];
    read_exact(reader, &mut len_field).await?;
    let len = parse_length_field(&len_field)?;

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload).await?;
    Ok(payload)
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(VnaError::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

fn header_digit_count(header: &[u8]) -> Result<usize> {
    if header.first() != Some(&b'#') {
        return Err(VnaError::parse("binary block must start with '#'"));
    }
    match header.get(1) {
        Some(b'0') => Err(VnaError::parse("indefinite-length blocks are not supported")),
        Some(d @ b'1'..=b'9') => Ok(usize::from(d - b'0')),
        _ => Err(VnaError::parse("invalid block header digit count")),
    }
}

fn parse_length_field(field: &[u8]) -> Result<usize> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            VnaError::parse(format!(
                "invalid block length field '{}'",
                String::from_utf8_lossy(field)
            ))
        })
}

/// Return the payload of a complete definite-length block.
///
/// Trailing bytes after the payload (typically the read terminator) are ignored.
pub fn parse_definite_block(bytes: &[u8]) -> Result<&[u8]> {
    let header = bytes
        .get(..2)
        .ok_or_else(|| VnaError::parse("truncated block header"))?;
    let digits = header_digit_count(header)?;

    let len_field = bytes
        .get(2..2 + digits)
        .ok_or_else(|| VnaError::parse("truncated block length field"))?;
    let len = parse_length_field(len_field)?;

    let start = 2 + digits;
    bytes.get(start..start + len).ok_or_else(|| {
        VnaError::parse(format!(
            "block declares {} bytes but only {} are present",
            len,
            bytes.len() - start
        ))
    })
}

/// Wrap `payload` in a definite-length block header.
///
/// # Errors
/// Returns [`VnaError::Parse`] if the payload exceeds [`MAX_BLOCK_LEN`].
pub fn encode_definite_block(payload: &[u8]) -> Result<Vec<u8>> {
    let mut block = block_header(payload.len())?;
    block.reserve(payload.len());
    block.extend_from_slice(payload);
    Ok(block)
}

fn block_header(len: usize) -> Result<Vec<u8>> {
    if len > MAX_BLOCK_LEN {
        return Err(VnaError::parse(format!(
            "{} bytes do not fit a definite-length block (max {})",
            len, MAX_BLOCK_LEN
        )));
    }
    let digits = len.to_string();
    let mut header = Vec::with_capacity(2 + digits.len());
    header.push(b'#');
    header.extend_from_slice(digits.len().to_string().as_bytes());
    header.extend_from_slice(digits.as_bytes());
    Ok(header)
}
