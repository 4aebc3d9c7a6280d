//! # Proxy Client
//!
//! Typed calls from the adapter to the per-node proxy: registration and
//! state access.
//!
//! ## Invariants
//!
//! - Reply sequence numbers must match call sequence numbers
//! - Only Reply frames are accepted; a Call frame is a protocol violation
//! - One connection per process, opened on first use and never retried

use std::fmt;
use std::sync::Arc;

use rillpack::Pack;
use rillrpc::CallEncoder;
use rillrpc::FailureReason;
use rillrpc::RpcFrame;
use rillrpc::Values;
use tracing::debug;
use tracing::info;

use crate::model::ComputationMetadata;
use crate::model::Endpoint;
use crate::transport::Connector;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::wire::Blob;
use crate::wire::BlobRef;

pub const REGISTER_METHOD: &str = "register_with_scheduler";
pub const GET_STATE_METHOD: &str = "get_state";
pub const SET_STATE_METHOD: &str = "set_state";

/// Errors during a call to the proxy.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Transport failure (refused, dropped).
    Transport(TransportError),
    /// Malformed frames or mismatched result types.
    Rpc(rillrpc::Error),
    /// The proxy answered with a failure.
    Remote(FailureReason),
    /// The reply answered a different call.
    SequenceMismatch { sent: u64, received: u64 },
    /// No proxy address has been set.
    NotConfigured,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport failure: {}", e),
            Self::Rpc(e) => write!(f, "RPC protocol error: {}", e),
            Self::Remote(reason) => write!(f, "Proxy refused the call: {}", reason),
            Self::SequenceMismatch { sent, received } => {
                write!(f, "Sequence mismatch: sent {}, received {}", sent, received)
            }
            Self::NotConfigured => write!(f, "No proxy address configured"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ProxyError {
    fn from(e: TransportError) -> Self { Self::Transport(e) }
}

impl From<rillrpc::Error> for ProxyError {
    fn from(e: rillrpc::Error) -> Self { Self::Rpc(e) }
}

impl From<rillpack::Error> for ProxyError {
    fn from(e: rillpack::Error) -> Self { Self::Rpc(rillrpc::Error::Pack(e)) }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// An open connection to the proxy.
pub struct ProxyClient {
    transport: Box<dyn Transport>,
    next_seq: u64,
}

impl ProxyClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport, next_seq: 1 }
    }

    pub async fn register(&mut self, metadata: &ComputationMetadata) -> Result<()> {
        let seq = self.take_seq();
        let payload = CallEncoder::new(seq, REGISTER_METHOD, &[metadata]).to_bytes()?;
        let reply = self.transport.call(&payload).await?;
        parse_reply(seq, &reply, |_| Ok(()))
    }

    /// Reads `key`. An absent key comes back as empty bytes.
    pub async fn get_state(&mut self, key: &str) -> Result<Vec<u8>> {
        let seq = self.take_seq();
        let payload = CallEncoder::new(seq, GET_STATE_METHOD, &[&key]).to_bytes()?;
        let reply = self.transport.call(&payload).await?;
        parse_reply(seq, &reply, |values| Ok(values.next::<Blob>()?.0))
    }

    pub async fn set_state(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let seq = self.take_seq();
        let payload =
            CallEncoder::new(seq, SET_STATE_METHOD, &[&key as &dyn Pack, &BlobRef(value)]).to_bytes()?;
        let reply = self.transport.call(&payload).await?;
        parse_reply(seq, &reply, |_| Ok(()))
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}

/// Validates a reply against the call it answers and reads its results.
fn parse_reply<T>(
    sent: u64,
    bytes: &[u8],
    read: impl FnOnce(&mut Values<'_>) -> rillrpc::Result<T>,
) -> Result<T> {
    match RpcFrame::from_bytes(bytes)? {
        RpcFrame::Call(_) => Err(ProxyError::Rpc(rillrpc::Error::ProtocolViolation(
            "Received Call frame while waiting for Reply".into(),
        ))),
        RpcFrame::Reply(reply) => {
            if reply.seq != sent {
                return Err(ProxyError::SequenceMismatch { sent, received: reply.seq });
            }
            match reply.status {
                Ok(mut values) => {
                    let out = read(&mut values)?;
                    values.finish()?;
                    Ok(out)
                }
                Err(reason) => Err(ProxyError::Remote(reason)),
            }
        }
    }
}

/// The adapter's single, lazily connected route to the proxy.
///
/// The address is set at registration. The connection is opened by the
/// first call that needs it and reused for the rest of the process.
pub struct ProxyHandle {
    connector: Arc<dyn Connector>,
    endpoint: Option<Endpoint>,
    client: Option<ProxyClient>,
}

impl ProxyHandle {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector, endpoint: None, client: None }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Binds the handle to a proxy. The binding is fixed once a connection
    /// has been opened.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        if self.client.is_none() {
            self.endpoint = Some(endpoint);
        }
    }

    async fn client(&mut self) -> Result<&mut ProxyClient> {
        if self.client.is_none() {
            let endpoint = self.endpoint.as_ref().ok_or(ProxyError::NotConfigured)?;
            let transport = self.connector.connect(endpoint).await?;
            info!(proxy = %endpoint, "connected to proxy");
            self.client = Some(ProxyClient::new(transport));
        }
        self.client.as_mut().ok_or(ProxyError::NotConfigured)
    }

    pub async fn register(&mut self, metadata: &ComputationMetadata) -> Result<()> {
        self.client().await?.register(metadata).await
    }

    pub async fn get_state(&mut self, key: &str) -> Result<Vec<u8>> {
        debug!(key, "get_state");
        self.client().await?.get_state(key).await
    }

    pub async fn set_state(&mut self, key: &str, value: &[u8]) -> Result<()> {
        debug!(key, len = value.len(), "set_state");
        self.client().await?.set_state(key, value).await
    }
}
