//! # Service Adapter
//!
//! Turns inbound RPC frames into computation callbacks.
//!
//! ## Lifecycle
//!
//! `Uninitialized -> Registering -> Serving -> Destroyed`
//!
//! ## Invariants
//!
//! - Every callback gets a fresh `Context`; effects never leak between calls
//! - Only `metadata` is served outside `Serving`, and never after `destroy`
//! - A failed callback produces no reply; the error is returned as `Fatal`
//! - A failed state access fails its callback
//! - Protocol misuse by the peer is answered with a failure reply

use std::sync::Arc;

use rillpack::Pack;
use rillrpc::FailureReason;
use rillrpc::ReplyErrEncoder;
use rillrpc::ReplyOkEncoder;
use rillrpc::RpcFrame;
use rillrpc::Values;
use rillrpc::decode_seq;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::computation::Computation;
use crate::context::Context;
use crate::error::Fatal;
use crate::model::ComputationMetadata;
use crate::model::Endpoint;
use crate::model::Record;
use crate::model::Transaction;
use crate::proxy::ProxyHandle;
use crate::transport::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Registering,
    Serving,
    Destroyed,
}

/// The methods the proxy may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    Destroy,
    ProcessRecord,
    ProcessRecordBatch,
    ProcessTimer,
    Metadata,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Destroy => "destroy",
            Self::ProcessRecord => "process_record",
            Self::ProcessRecordBatch => "process_record_batch",
            Self::ProcessTimer => "process_timer",
            Self::Metadata => "metadata",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "init" => Some(Self::Init),
            "destroy" => Some(Self::Destroy),
            "process_record" => Some(Self::ProcessRecord),
            "process_record_batch" => Some(Self::ProcessRecordBatch),
            "process_timer" => Some(Self::ProcessTimer),
            "metadata" => Some(Self::Metadata),
            _ => None,
        }
    }

    fn allowed_in(self, state: Lifecycle) -> bool {
        match self {
            Self::Metadata => state != Lifecycle::Destroyed,
            _ => state == Lifecycle::Serving,
        }
    }
}

/// A decoded inbound call.
enum Request {
    Init,
    Destroy,
    ProcessRecord(Record),
    ProcessRecordBatch(Vec<Record>),
    ProcessTimer(String, i64),
    Metadata,
}

impl Request {
    fn decode(method: Method, mut args: Values<'_>) -> rillrpc::Result<Self> {
        let request = match method {
            Method::Init => Self::Init,
            Method::Destroy => Self::Destroy,
            Method::ProcessRecord => Self::ProcessRecord(args.next()?),
            Method::ProcessRecordBatch => Self::ProcessRecordBatch(args.next()?),
            Method::ProcessTimer => {
                let key = args.next()?;
                let time = args.next()?;
                Self::ProcessTimer(key, time)
            }
            Method::Metadata => Self::Metadata,
        };
        args.finish()?;
        Ok(request)
    }
}

pub struct ServiceAdapter<C> {
    computation: C,
    proxy: ProxyHandle,
    endpoint: Endpoint,
    state: Lifecycle,
}

impl<C: Computation> ServiceAdapter<C> {
    /// `endpoint` is the address this adapter advertises to the proxy.
    pub fn new(computation: C, endpoint: Endpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            computation,
            proxy: ProxyHandle::new(connector),
            endpoint,
            state: Lifecycle::Uninitialized,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn computation(&self) -> &C {
        &self.computation
    }

    pub fn proxy(&self) -> &ProxyHandle {
        &self.proxy
    }

    pub fn into_computation(self) -> C {
        self.computation
    }

    /// Announces this computation to the proxy at `proxy`.
    ///
    /// Returns the descriptor that was registered. There is no retry.
    pub async fn register(&mut self, proxy: Endpoint) -> Result<ComputationMetadata, Fatal> {
        self.state = Lifecycle::Registering;

        let mut descriptor = self.metadata().map_err(Fatal::Metadata)?;
        descriptor.endpoint = Some(self.endpoint.clone());

        info!(
            name = %descriptor.name,
            endpoint = %self.endpoint,
            proxy = %proxy,
            "registering with scheduler"
        );
        self.proxy.set_endpoint(proxy);
        self.proxy.register(&descriptor).await.map_err(Fatal::Registration)?;

        self.state = Lifecycle::Serving;
        info!(name = %descriptor.name, "serving");
        Ok(descriptor)
    }

    /// The normalized descriptor, without an endpoint.
    pub fn metadata(&self) -> anyhow::Result<ComputationMetadata> {
        Ok(self.computation.metadata()?.normalize())
    }

    pub async fn init(&mut self) -> Result<Transaction, Fatal> {
        let mut ctx = Context::new(&mut self.proxy);
        let outcome = self.computation.init(&mut ctx).await;
        settle(Method::Init, outcome, ctx)
    }

    pub async fn process_record(&mut self, record: Record) -> Result<Transaction, Fatal> {
        self.record_callback(Method::ProcessRecord, record).await
    }

    /// Runs each record in its own context. Results keep input order; the
    /// first failure aborts the whole batch.
    pub async fn process_record_batch(&mut self, records: Vec<Record>) -> Result<Vec<Transaction>, Fatal> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.record_callback(Method::ProcessRecordBatch, record).await?);
        }
        Ok(out)
    }

    pub async fn process_timer(&mut self, key: String, time: i64) -> Result<Transaction, Fatal> {
        let mut ctx = Context::new(&mut self.proxy);
        let outcome = self.computation.process_timer(&mut ctx, key, time).await;
        settle(Method::ProcessTimer, outcome, ctx)
    }

    pub async fn destroy(&mut self) -> Result<(), Fatal> {
        self.computation
            .destroy()
            .await
            .map_err(|source| Fatal::Callback { op: Method::Destroy.name(), source })?;
        self.state = Lifecycle::Destroyed;
        info!("destroyed");
        Ok(())
    }

    async fn record_callback(&mut self, op: Method, record: Record) -> Result<Transaction, Fatal> {
        let mut ctx = Context::new(&mut self.proxy);
        let outcome = self.computation.process_record(&mut ctx, record).await;
        settle(op, outcome, ctx)
    }

    /// Serves one inbound frame and returns the reply to send back.
    ///
    /// The typed methods above do not check the lifecycle; this does.
    pub async fn handle(&mut self, frame: &[u8]) -> Result<Vec<u8>, Fatal> {
        let call = match RpcFrame::from_bytes(frame) {
            Ok(RpcFrame::Call(call)) => call,
            Ok(RpcFrame::Reply(reply)) => {
                warn!(seq = reply.seq, "received a Reply frame where a Call was expected");
                return refuse(reply.seq, FailureReason::ProtocolViolation("Expected a Call frame".into()));
            }
            Err(e) => {
                let seq = decode_seq(frame).unwrap_or(0);
                warn!(seq, error = %e, "undecodable frame");
                return refuse(seq, FailureReason::ProtocolViolation(e.to_string()));
            }
        };

        let seq = call.seq;
        debug!(seq, method = call.method, state = ?self.state, "call");

        let Some(method) = Method::from_name(call.method) else {
            return refuse(seq, FailureReason::MethodNotFound);
        };
        if !method.allowed_in(self.state) {
            return refuse(seq, FailureReason::NotServing);
        }
        let request = match Request::decode(method, call.args) {
            Ok(request) => request,
            Err(e) => return refuse(seq, FailureReason::BadArguments(e.to_string())),
        };

        match request {
            Request::Init => {
                let tx = self.init().await?;
                respond(seq, &[&tx])
            }
            Request::Destroy => {
                self.destroy().await?;
                respond(seq, &[])
            }
            Request::ProcessRecord(record) => {
                let tx = self.process_record(record).await?;
                respond(seq, &[&tx])
            }
            Request::ProcessRecordBatch(records) => {
                let txs = self.process_record_batch(records).await?;
                respond(seq, &[&txs])
            }
            Request::ProcessTimer(key, time) => {
                let tx = self.process_timer(key, time).await?;
                respond(seq, &[&tx])
            }
            Request::Metadata => {
                let descriptor = self
                    .metadata()
                    .map_err(|source| Fatal::Callback { op: Method::Metadata.name(), source })?;
                respond(seq, &[&descriptor])
            }
        }
    }
}

/// A callback fails if it returned an error or if any of its state
/// accesses failed.
fn settle(op: Method, outcome: anyhow::Result<()>, ctx: Context<'_>) -> Result<Transaction, Fatal> {
    outcome.map_err(|source| Fatal::Callback { op: op.name(), source })?;
    ctx.finish().map_err(|e| Fatal::Callback {
        op: op.name(),
        source: anyhow::Error::new(e).context("state access failed"),
    })
}

fn respond(seq: u64, results: &[&dyn Pack]) -> Result<Vec<u8>, Fatal> {
    Ok(ReplyOkEncoder::new(seq, results).to_bytes()?)
}

fn refuse(seq: u64, reason: FailureReason) -> Result<Vec<u8>, Fatal> {
    debug!(seq, %reason, "refusing call");
    Ok(ReplyErrEncoder::new(seq, reason).to_bytes()?)
}
