//! # Transport Abstraction
//!
//! Moves opaque frames between the adapter and the proxy.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A transport knows nothing about RPC frames. It moves
//!   opaque buffers.
//! - **Request-Response**: The interaction model is "send bytes, await bytes".
//!
//! On TCP every frame is prefixed by its length as a little-endian `u32`.

use std::fmt;
use std::io;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::model::Endpoint;

/// Largest frame either side will send or accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// A frame exceeded `MAX_FRAME_LEN`.
    PayloadTooLarge(usize),
    /// Generic I/O error.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge(len) => {
                write!(f, "Payload of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to send a byte buffer and receive a reply.
///
/// Object-safe, so the proxy client holds a `Box<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends a payload and waits for the matching response.
    ///
    /// # Invariants
    /// - Returns the raw reply bytes on success.
    /// - Returns `Err` if the connection fails.
    /// - Does not interpret the payload.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Opens transports to a peer.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>>;
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` if the stream ends cleanly before a new frame starts.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    // Only an EOF before the first prefix byte is a clean close.
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::PayloadTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one length-prefixed frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::PayloadTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// A request-response transport over one TCP connection.
///
/// Calls are serialized by the lock, so a reply is always read by the
/// caller whose request preceded it.
pub struct TcpTransport {
    stream: Mutex<TcpStream>,
}

impl TcpTransport {
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.ip.as_str(), endpoint.port))
            .await
            .map_err(|e| TransportError::ConnectionLost(format!("{}: {}", endpoint, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream: Mutex::new(stream) })
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, payload).await?;
        read_frame(&mut *stream)
            .await?
            .ok_or_else(|| TransportError::ConnectionLost("peer closed before replying".into()))
    }
}

/// Connects over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::connect(endpoint).await?))
    }
}
