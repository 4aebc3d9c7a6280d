//! Mock transports for testing.
//!
//! These are used internally by the test suite and are not part of the public API.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use rillrpc::FailureReason;
use rillrpc::ReplyErrEncoder;
use rillrpc::ReplyOkEncoder;
use rillrpc::RpcFrame;

use crate::model::ComputationMetadata;
use crate::model::Endpoint;
use crate::proxy::GET_STATE_METHOD;
use crate::proxy::REGISTER_METHOD;
use crate::proxy::SET_STATE_METHOD;
use crate::transport;
use crate::transport::Connector;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::wire::Blob;

/// An in-memory proxy: accepts registrations and keeps a state store.
#[derive(Clone, Default)]
pub struct MockProxy {
    pub state: Arc<DashMap<String, Vec<u8>>>,
    pub registrations: Arc<Mutex<Vec<ComputationMetadata>>>,
    /// Method names in the order they arrived.
    pub calls: Arc<Mutex<Vec<String>>>,
    /// When set, registrations are refused with this reason.
    pub refuse_with: Option<String>,
    /// When set, the connection drops on any state access.
    pub hang_up_on_state: bool,
}

impl MockProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(reason: &str) -> Self {
        Self { refuse_with: Some(reason.to_owned()), ..Self::default() }
    }

    pub fn hanging_up_on_state() -> Self {
        Self { hang_up_on_state: true, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `None` means the proxy hangs up instead of replying.
    fn answer(&self, payload: &[u8]) -> rillrpc::Result<Option<Vec<u8>>> {
        let RpcFrame::Call(mut call) = RpcFrame::from_bytes(payload)? else {
            return Err(rillrpc::Error::ProtocolViolation("expected a Call frame".into()));
        };
        let seq = call.seq;
        self.calls.lock().unwrap().push(call.method.to_owned());

        match call.method {
            REGISTER_METHOD => {
                let descriptor: ComputationMetadata = call.args.next()?;
                call.args.finish()?;
                if let Some(reason) = &self.refuse_with {
                    return ReplyErrEncoder::new(seq, FailureReason::Rejected(reason.clone())).to_bytes().map(Some);
                }
                self.registrations.lock().unwrap().push(descriptor);
                ReplyOkEncoder::new(seq, &[]).to_bytes().map(Some)
            }
            GET_STATE_METHOD | SET_STATE_METHOD if self.hang_up_on_state => Ok(None),
            GET_STATE_METHOD => {
                let key: String = call.args.next()?;
                call.args.finish()?;
                let value = self.state.get(&key).map(|v| v.value().clone()).unwrap_or_default();
                ReplyOkEncoder::new(seq, &[&Blob(value)]).to_bytes().map(Some)
            }
            SET_STATE_METHOD => {
                let key: String = call.args.next()?;
                let Blob(value) = call.args.next()?;
                call.args.finish()?;
                self.state.insert(key, value);
                ReplyOkEncoder::new(seq, &[]).to_bytes().map(Some)
            }
            _ => ReplyErrEncoder::new(seq, FailureReason::MethodNotFound).to_bytes().map(Some),
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockProxy {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        match self.answer(payload) {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::ConnectionLost("proxy hung up".into())),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}

/// Hands out connections to a shared `MockProxy` and counts them.
#[derive(Clone, Default)]
pub struct MockConnector {
    pub proxy: MockProxy,
    pub connects: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(proxy: MockProxy) -> Self {
        Self { proxy, connects: Arc::default() }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> transport::Result<Box<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.proxy.clone()))
    }
}

/// A connector whose peer is never reachable.
pub struct RefusingConnector;

#[async_trait::async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self, endpoint: &Endpoint) -> transport::Result<Box<dyn Transport>> {
        Err(TransportError::ConnectionLost(format!("{}: connection refused", endpoint)))
    }
}

/// A request-response transport driven by a closure, for scripting replies.
pub struct CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    handler: F,
}

impl<F> CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait::async_trait]
impl<F> Transport for CallTransport<F>
where
    F: Fn(&[u8]) -> transport::Result<Vec<u8>> + Send + Sync,
{
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        (self.handler)(payload)
    }
}
