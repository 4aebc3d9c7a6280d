use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use anyhow::bail;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rillpack::Decoder;
use rillpack::Encoder;
use rillpack::Pack;
use rillpack::Unpack;
use rillrpc::CallEncoder;
use rillrpc::FailureReason;
use rillrpc::ReplyOkEncoder;
use rillrpc::RpcFrame;
use tokio::io::AsyncWriteExt;

use crate::computation;
use crate::config::Config;
use crate::config::ConfigError;
use crate::config::LISTEN_ADDRESS_VAR;
use crate::config::LOG_BACKUPS_VAR;
use crate::config::LOG_LEVEL_VAR;
use crate::config::LOG_MAX_BYTES_VAR;
use crate::config::PROXY_ADDRESS_VAR;
use crate::logging::RotatingFile;
use crate::mock_transport::CallTransport;
use crate::mock_transport::MockConnector;
use crate::mock_transport::MockProxy;
use crate::mock_transport::RefusingConnector;
use crate::proxy::ProxyClient;
use crate::proxy::ProxyError;
use crate::proxy::ProxyHandle;
use crate::transport::MAX_FRAME_LEN;
use crate::transport::TransportError;
use crate::transport::read_frame;
use crate::transport::write_frame;
use crate::*;

// ============================================================================
//  TEST COMPUTATIONS
// ============================================================================

/// Emits one record per timer and re-arms the timer a second later.
struct Ticker;

#[async_trait::async_trait]
impl Computation for Ticker {
    async fn init(&mut self, ctx: &mut Context<'_>) -> computation::Result<()> {
        ctx.set_timer("loop", 0);
        Ok(())
    }

    async fn process_timer(&mut self, ctx: &mut Context<'_>, key: String, time: i64) -> computation::Result<()> {
        ctx.produce_record("words", "foo", "1");
        ctx.set_timer(key, time + 1000);
        Ok(())
    }

    fn metadata(&self) -> computation::Result<Metadata> {
        Ok(Metadata::builder("ticker").output("words").build()?)
    }
}

/// Forwards each record to "out" with its key upper-cased.
#[derive(Default)]
struct Upper {
    seen: usize,
    destroyed: bool,
}

#[async_trait::async_trait]
impl Computation for Upper {
    async fn destroy(&mut self) -> computation::Result<()> {
        self.destroyed = true;
        Ok(())
    }

    async fn process_record(&mut self, ctx: &mut Context<'_>, record: Record) -> computation::Result<()> {
        self.seen += 1;
        ctx.produce_record("out", record.key.to_ascii_uppercase(), record.data);
        Ok(())
    }

    fn metadata(&self) -> computation::Result<Metadata> {
        Ok(Metadata::builder("upper")
            .input(("in", StreamGrouping::GroupBy))
            .output("out")
            .build()?)
    }
}

/// Counts records in proxy state.
struct Counter;

#[async_trait::async_trait]
impl Computation for Counter {
    async fn process_record(&mut self, ctx: &mut Context<'_>, _record: Record) -> computation::Result<()> {
        let raw = ctx.get_state("seen").await?;
        let seen = if raw.is_empty() { 0 } else { std::str::from_utf8(&raw)?.parse::<u64>()? };
        ctx.set_state("seen", (seen + 1).to_string().as_bytes()).await?;
        Ok(())
    }

    fn metadata(&self) -> computation::Result<Metadata> {
        Ok(Metadata::builder("counter").input("words").build()?)
    }
}

/// Fails every record.
struct Broken;

#[async_trait::async_trait]
impl Computation for Broken {
    async fn process_record(&mut self, _ctx: &mut Context<'_>, _record: Record) -> computation::Result<()> {
        bail!("boom")
    }

    fn metadata(&self) -> computation::Result<Metadata> {
        Ok(Metadata::builder("broken").input("words").build()?)
    }
}

/// Ignores the outcome of its state accesses.
struct Forgetful;

#[async_trait::async_trait]
impl Computation for Forgetful {
    async fn process_record(&mut self, ctx: &mut Context<'_>, record: Record) -> computation::Result<()> {
        let previous = ctx.get_state("last").await.unwrap_or_default();
        ctx.produce_record("out", record.key, previous);
        Ok(())
    }

    async fn process_timer(&mut self, ctx: &mut Context<'_>, key: String, time: i64) -> computation::Result<()> {
        let _ = ctx.set_state(&key, time.to_string().as_bytes()).await;
        ctx.set_timer(key, time + 1);
        Ok(())
    }

    fn metadata(&self) -> computation::Result<Metadata> {
        Ok(Metadata::builder("forgetful").input("in").output("out").build()?)
    }
}

// ============================================================================
//  HELPERS
// ============================================================================

fn listen_addr() -> Endpoint {
    Endpoint::new("127.0.0.1", 4100)
}

fn proxy_addr() -> Endpoint {
    Endpoint::new("127.0.0.1", 4200)
}

fn adapter<C: Computation>(computation: C, connector: MockConnector) -> ServiceAdapter<C> {
    ServiceAdapter::new(computation, listen_addr(), Arc::new(connector))
}

async fn serving<C: Computation>(computation: C) -> Result<(ServiceAdapter<C>, MockConnector)> {
    let connector = MockConnector::new(MockProxy::new());
    let mut adapter = adapter(computation, connector.clone());
    adapter.register(proxy_addr()).await?;
    Ok((adapter, connector))
}

fn call(seq: u64, method: &str, args: &[&dyn Pack]) -> Result<Vec<u8>> {
    Ok(CallEncoder::new(seq, method, args).to_bytes()?)
}

/// Reads the single result of a successful reply.
fn reply_value<T: Unpack>(bytes: &[u8], seq: u64) -> Result<T> {
    let RpcFrame::Reply(reply) = RpcFrame::from_bytes(bytes)? else {
        bail!("expected a Reply frame");
    };
    assert_eq!(reply.seq, seq);
    match reply.status {
        Ok(mut values) => {
            let value = values.next::<T>()?;
            values.finish()?;
            Ok(value)
        }
        Err(reason) => bail!("expected success, got {}", reason),
    }
}

fn reply_failure(bytes: &[u8]) -> Result<(u64, FailureReason)> {
    let RpcFrame::Reply(reply) = RpcFrame::from_bytes(bytes)? else {
        bail!("expected a Reply frame");
    };
    match reply.status {
        Err(reason) => Ok((reply.seq, reason)),
        Ok(_) => bail!("expected a failure reply"),
    }
}

// ============================================================================
//  CONTEXT & TRANSACTION
// ============================================================================

#[test]
fn test_records_keep_production_order() {
    let mut proxy = ProxyHandle::new(Arc::new(RefusingConnector));
    let mut ctx = Context::new(&mut proxy);
    for i in 0..5u8 {
        ctx.produce_record("words", vec![i], vec![i, i]);
    }
    ctx.produce_record("other", "k", "v");

    let tx = ctx.into_transaction();
    assert_eq!(tx.records.len(), 6);
    for (i, record) in tx.records.iter().take(5).enumerate() {
        assert_eq!(record.key, vec![i as u8]);
        assert_eq!(record.stream, "words");
    }
    assert_eq!(tx.records[5], Record::new("other", "k", "v"));
}

#[test]
fn test_set_timer_last_write_wins() {
    let mut proxy = ProxyHandle::new(Arc::new(RefusingConnector));
    let mut ctx = Context::new(&mut proxy);
    ctx.set_timer("loop", 10);
    ctx.set_timer("other", 5);
    ctx.set_timer("loop", 20);

    assert_eq!(ctx.transaction().timers.len(), 2);
    let tx = ctx.into_transaction();
    assert_eq!(tx.timers.get("loop"), Some(&20));
    assert_eq!(tx.timers.get("other"), Some(&5));
    assert!(tx.records.is_empty());
}

#[test]
fn test_random_effects_match_a_reference_model() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..200 {
        let mut proxy = ProxyHandle::new(Arc::new(RefusingConnector));
        let mut ctx = Context::new(&mut proxy);
        let mut records = Vec::new();
        let mut timers = std::collections::HashMap::new();

        for _ in 0..rng.gen_range(0..40) {
            if rng.gen_bool(0.5) {
                let record = Record::new(
                    format!("s{}", rng.gen_range(0..3)),
                    vec![rng.r#gen::<u8>()],
                    vec![rng.r#gen::<u8>(); rng.gen_range(0..4)],
                );
                ctx.produce_record(record.stream.clone(), record.key.clone(), record.data.clone());
                records.push(record);
            } else {
                let key = format!("t{}", rng.gen_range(0..4));
                let time = rng.gen_range(-1_000i64..1_000);
                ctx.set_timer(key.clone(), time);
                timers.insert(key, time);
            }
        }

        let tx = ctx.into_transaction();
        assert_eq!(tx.records, records);
        assert_eq!(tx.timers.len(), timers.len());
        for (key, time) in &timers {
            assert_eq!(tx.timers.get(key), Some(time));
        }
    }
}

#[test]
fn test_fresh_context_is_empty() {
    let mut proxy = ProxyHandle::new(Arc::new(RefusingConnector));
    let ctx = Context::new(&mut proxy);
    assert!(ctx.transaction().is_empty());
}

// ============================================================================
//  METADATA
// ============================================================================

#[test]
fn test_bare_stream_defaults_to_shuffle() {
    let decl = StreamDecl::from("words");
    assert_eq!(
        decl.normalize(),
        StreamMetadata { name: "words".into(), grouping: StreamGrouping::Shuffle }
    );
}

#[test]
fn test_explicit_grouping_is_kept() {
    let decl = StreamDecl::from(("words", StreamGrouping::GroupBy));
    assert_eq!(decl.normalize().grouping, StreamGrouping::GroupBy);
}

#[test]
fn test_normalize_covers_inputs_and_outputs() -> Result<()> {
    let metadata = Metadata::new(
        "m",
        [StreamDecl::from("a"), StreamDecl::from(("b", StreamGrouping::Broadcast))],
        ["c"],
    )?;
    let descriptor = metadata.normalize();
    assert_eq!(descriptor.name, "m");
    assert_eq!(descriptor.istreams[0].grouping, StreamGrouping::Shuffle);
    assert_eq!(descriptor.istreams[1].grouping, StreamGrouping::Broadcast);
    assert_eq!(
        descriptor.ostreams,
        vec![StreamMetadata { name: "c".into(), grouping: StreamGrouping::Shuffle }]
    );
    assert!(descriptor.endpoint.is_none());
    Ok(())
}

#[test]
fn test_metadata_without_streams_is_rejected() {
    assert_eq!(Metadata::builder("lonely").build(), Err(MetadataError::NoStreams));
    assert_eq!(Metadata::builder("").output("x").build(), Err(MetadataError::EmptyName));
}

#[test]
fn test_metadata_with_only_outputs_is_accepted() -> Result<()> {
    let metadata = Metadata::builder("source").output("words").build()?;
    assert!(metadata.istreams().is_empty());
    assert_eq!(metadata.ostreams(), ["words".to_string()]);
    Ok(())
}

#[test]
fn test_grouping_tags() {
    for grouping in [
        StreamGrouping::Shuffle,
        StreamGrouping::GroupBy,
        StreamGrouping::RoundRobin,
        StreamGrouping::Broadcast,
    ] {
        assert_eq!(StreamGrouping::from_tag(grouping.as_tag()), Some(grouping));
    }
    assert_eq!(StreamGrouping::from_tag("RANDOM"), None);
}

// ============================================================================
//  WIRE ENCODING
// ============================================================================

#[test]
fn test_descriptor_survives_the_wire() -> Result<()> {
    let mut descriptor = Upper::default().metadata()?.normalize();
    descriptor.endpoint = Some(Endpoint::new("10.0.0.7", 31337));

    let mut enc = Encoder::new();
    descriptor.pack(&mut enc)?;
    let bytes = enc.into_bytes()?;
    let decoded = ComputationMetadata::unpack(&mut Decoder::new(&bytes))?;
    assert_eq!(decoded, descriptor);
    Ok(())
}

#[test]
fn test_transaction_skips_unknown_fields() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field("priority", &3u32)?;
    enc.field("records", &vec![Record::new("s", "k", "d")])?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    let tx = Transaction::unpack(&mut Decoder::new(&bytes))?;
    assert_eq!(tx.records, vec![Record::new("s", "k", "d")]);
    assert!(tx.timers.is_empty());
    Ok(())
}

#[test]
fn test_endpoint_port_out_of_range() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field("ip", "127.0.0.1")?;
    enc.field("port", &70_000u32)?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert_eq!(
        Endpoint::unpack(&mut Decoder::new(&bytes)),
        Err(rillpack::Error::OutOfRange("port"))
    );
    Ok(())
}

#[test]
fn test_record_requires_stream() -> Result<()> {
    let mut enc = Encoder::new();
    enc.map_begin()?;
    enc.field("key", &crate::wire::BlobRef(b"k"))?;
    enc.field("data", &crate::wire::BlobRef(b"d"))?;
    enc.map_end()?;
    let bytes = enc.into_bytes()?;

    assert_eq!(
        Record::unpack(&mut Decoder::new(&bytes)),
        Err(rillpack::Error::MissingField("stream"))
    );
    Ok(())
}

// ============================================================================
//  LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_registration_attaches_own_endpoint() -> Result<()> {
    let connector = MockConnector::new(MockProxy::new());
    let mut adapter = adapter(Upper::default(), connector.clone());
    assert_eq!(adapter.state(), Lifecycle::Uninitialized);

    let descriptor = adapter.register(proxy_addr()).await?;
    assert_eq!(adapter.state(), Lifecycle::Serving);
    assert_eq!(descriptor.endpoint, Some(listen_addr()));
    assert_eq!(adapter.proxy().endpoint(), Some(&proxy_addr()));

    let registrations = connector.proxy.registrations.lock().unwrap().clone();
    assert_eq!(registrations, vec![descriptor]);
    assert_eq!(registrations[0].istreams[0].grouping, StreamGrouping::GroupBy);
    Ok(())
}

#[tokio::test]
async fn test_registration_refused_by_proxy() -> Result<()> {
    let connector = MockConnector::new(MockProxy::refusing("duplicate name"));
    let mut adapter = adapter(Upper::default(), connector);

    match adapter.register(proxy_addr()).await {
        Err(Fatal::Registration(ProxyError::Remote(FailureReason::Rejected(reason)))) => {
            assert_eq!(reason, "duplicate name");
        }
        other => bail!("expected a refused registration, got {:?}", other),
    }
    assert_eq!(adapter.state(), Lifecycle::Registering);
    Ok(())
}

#[tokio::test]
async fn test_registration_with_unreachable_proxy() -> Result<()> {
    let mut adapter = ServiceAdapter::new(Upper::default(), listen_addr(), Arc::new(RefusingConnector));
    assert!(matches!(
        adapter.register(proxy_addr()).await,
        Err(Fatal::Registration(ProxyError::Transport(TransportError::ConnectionLost(_))))
    ));
    Ok(())
}

#[tokio::test]
async fn test_calls_before_registration_are_not_served() -> Result<()> {
    let mut adapter = adapter(Upper::default(), MockConnector::default());

    let reply = adapter.handle(&call(1, "init", &[])?).await?;
    assert_eq!(reply_failure(&reply)?, (1, FailureReason::NotServing));

    // metadata is answered in any live state
    let reply = adapter.handle(&call(2, "metadata", &[])?).await?;
    let descriptor: ComputationMetadata = reply_value(&reply, 2)?;
    assert_eq!(descriptor.name, "upper");
    assert_eq!(adapter.state(), Lifecycle::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn test_destroy_ends_service() -> Result<()> {
    let (mut adapter, _) = serving(Upper::default()).await?;

    let reply = adapter.handle(&call(1, "destroy", &[])?).await?;
    let RpcFrame::Reply(reply) = RpcFrame::from_bytes(&reply)? else {
        bail!("expected a Reply frame");
    };
    let Ok(values) = reply.status else {
        bail!("destroy failed");
    };
    values.finish()?;
    assert_eq!(adapter.state(), Lifecycle::Destroyed);
    assert!(adapter.computation().destroyed);

    for method in ["metadata", "init"] {
        let reply = adapter.handle(&call(2, method, &[])?).await?;
        assert_eq!(reply_failure(&reply)?, (2, FailureReason::NotServing));
    }
    Ok(())
}

// ============================================================================
//  DISPATCH
// ============================================================================

#[tokio::test]
async fn test_timer_produces_record_and_rearms() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    let t = 1_700_000_000_000i64;

    let key = String::from("loop");
    let reply = adapter.handle(&call(7, "process_timer", &[&key, &t])?).await?;
    let tx: Transaction = reply_value(&reply, 7)?;

    assert_eq!(tx.records, vec![Record::new("words", "foo", "1")]);
    assert_eq!(tx.timers.len(), 1);
    assert_eq!(tx.timers.get("loop"), Some(&(t + 1000)));
    Ok(())
}

#[tokio::test]
async fn test_init_returns_its_transaction() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    let reply = adapter.handle(&call(1, "init", &[])?).await?;
    let tx: Transaction = reply_value(&reply, 1)?;
    assert!(tx.records.is_empty());
    assert_eq!(tx.timers.get("loop"), Some(&0));
    Ok(())
}

#[tokio::test]
async fn test_batch_keeps_order_without_bleed() -> Result<()> {
    let (mut adapter, _) = serving(Upper::default()).await?;
    let batch = vec![
        Record::new("in", "a", "1"),
        Record::new("in", "b", "2"),
        Record::new("in", "c", "3"),
    ];

    let reply = adapter.handle(&call(3, "process_record_batch", &[&batch])?).await?;
    let txs: Vec<Transaction> = reply_value(&reply, 3)?;

    assert_eq!(txs.len(), 3);
    for (tx, (key, data)) in txs.iter().zip([("A", "1"), ("B", "2"), ("C", "3")]) {
        assert_eq!(tx.records, vec![Record::new("out", key, data)]);
        assert!(tx.timers.is_empty());
    }
    assert_eq!(adapter.computation().seen, 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_callback_is_fatal_and_unanswered() -> Result<()> {
    let (mut adapter, _) = serving(Broken).await?;
    let record = Record::new("words", "k", "v");

    match adapter.handle(&call(1, "process_record", &[&record])?).await {
        Err(Fatal::Callback { op, source }) => {
            assert_eq!(op, "process_record");
            assert_eq!(source.to_string(), "boom");
        }
        Ok(_) => bail!("a failed callback must not produce a reply"),
        Err(other) => bail!("unexpected error: {}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_failed_batch_names_the_batch() -> Result<()> {
    let (mut adapter, _) = serving(Broken).await?;
    let batch = vec![Record::new("words", "k", "v")];
    assert!(matches!(
        adapter.handle(&call(1, "process_record_batch", &[&batch])?).await,
        Err(Fatal::Callback { op: "process_record_batch", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_unimplemented_callback_is_fatal() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    assert!(matches!(
        adapter.process_record(Record::new("words", "k", "v")).await,
        Err(Fatal::Callback { op: "process_record", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_unknown_method() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    let reply = adapter.handle(&call(9, "rebalance", &[])?).await?;
    assert_eq!(reply_failure(&reply)?, (9, FailureReason::MethodNotFound));
    Ok(())
}

#[tokio::test]
async fn test_bad_arguments() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;

    let reply = adapter.handle(&call(4, "process_timer", &[])?).await?;
    assert!(matches!(reply_failure(&reply)?, (4, FailureReason::BadArguments(_))));

    let extra = 1u64;
    let reply = adapter.handle(&call(5, "init", &[&extra])?).await?;
    assert!(matches!(reply_failure(&reply)?, (5, FailureReason::BadArguments(_))));
    Ok(())
}

#[tokio::test]
async fn test_garbage_frame_gets_protocol_violation() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    let reply = adapter.handle(&[0xFF, 0x00, 0x13]).await?;
    assert!(matches!(reply_failure(&reply)?, (0, FailureReason::ProtocolViolation(_))));
    Ok(())
}

#[tokio::test]
async fn test_reply_frame_is_protocol_violation() -> Result<()> {
    let (mut adapter, _) = serving(Ticker).await?;
    let frame = ReplyOkEncoder::new(6, &[]).to_bytes()?;
    let reply = adapter.handle(&frame).await?;
    assert!(matches!(reply_failure(&reply)?, (6, FailureReason::ProtocolViolation(_))));
    Ok(())
}

// ============================================================================
//  STATE ACCESS
// ============================================================================

#[tokio::test]
async fn test_state_goes_straight_to_the_proxy() -> Result<()> {
    let (mut adapter, connector) = serving(Counter).await?;
    let record = Record::new("words", "foo", "1");

    for seq in 1..=2 {
        let reply = adapter.handle(&call(seq, "process_record", &[&record])?).await?;
        let tx: Transaction = reply_value(&reply, seq)?;
        assert!(tx.is_empty());
    }

    assert_eq!(connector.proxy.state.get("seen").map(|v| v.value().clone()), Some(b"2".to_vec()));
    assert_eq!(
        connector.proxy.calls(),
        ["register_with_scheduler", "get_state", "set_state", "get_state", "set_state"]
    );
    Ok(())
}

#[tokio::test]
async fn test_proxy_connection_is_lazy_and_shared() -> Result<()> {
    let connector = MockConnector::new(MockProxy::new());
    let mut adapter = adapter(Counter, connector.clone());
    assert_eq!(connector.connects(), 0);
    assert!(!adapter.proxy().is_connected());

    adapter.register(proxy_addr()).await?;
    assert_eq!(connector.connects(), 1);

    adapter.process_record(Record::new("words", "a", "1")).await?;
    adapter.process_record(Record::new("words", "b", "1")).await?;
    assert_eq!(connector.connects(), 1);
    Ok(())
}

#[tokio::test]
async fn test_state_without_proxy_address() -> Result<()> {
    let mut proxy = ProxyHandle::new(Arc::new(MockConnector::default()));
    assert!(matches!(proxy.get_state("k").await, Err(ProxyError::NotConfigured)));
    Ok(())
}

#[tokio::test]
async fn test_swallowed_state_failure_still_fails_the_callback() -> Result<()> {
    let connector = MockConnector::new(MockProxy::hanging_up_on_state());
    let mut adapter = adapter(Forgetful, connector.clone());
    adapter.register(proxy_addr()).await?;

    let record = Record::new("in", "k", "v");
    match adapter.handle(&call(1, "process_record", &[&record])?).await {
        Err(Fatal::Callback { op, source }) => {
            assert_eq!(op, "process_record");
            assert!(matches!(
                source.downcast_ref::<ProxyError>(),
                Some(ProxyError::Transport(TransportError::ConnectionLost(_)))
            ));
        }
        Ok(_) => bail!("a failed state access must not produce a reply"),
        Err(other) => bail!("unexpected error: {}", other),
    }
    assert_eq!(connector.proxy.calls(), ["register_with_scheduler", "get_state"]);
    Ok(())
}

#[tokio::test]
async fn test_ignored_set_state_failure_fails_the_timer() -> Result<()> {
    let connector = MockConnector::new(MockProxy::hanging_up_on_state());
    let mut adapter = adapter(Forgetful, connector);
    adapter.register(proxy_addr()).await?;

    assert!(matches!(
        adapter.process_timer("tick".into(), 5).await,
        Err(Fatal::Callback { op: "process_timer", .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_context_reports_first_state_failure() -> Result<()> {
    let mut proxy = ProxyHandle::new(Arc::new(MockConnector::default()));
    let mut ctx = Context::new(&mut proxy);
    ctx.produce_record("out", "k", "v");
    assert!(ctx.get_state("k").await.is_err());
    assert!(ctx.set_state("k", b"v").await.is_err());
    assert!(matches!(ctx.finish(), Err(ProxyError::NotConfigured)));
    Ok(())
}

// ============================================================================
//  PROXY CLIENT
// ============================================================================

#[tokio::test]
async fn test_proxy_rejects_mismatched_sequence() -> Result<()> {
    let transport = CallTransport::new(|_payload: &[u8]| {
        ReplyOkEncoder::new(99, &[]).to_bytes().map_err(|e| TransportError::Io(e.to_string()))
    });
    let mut client = ProxyClient::new(Box::new(transport));
    assert!(matches!(
        client.set_state("k", b"v").await,
        Err(ProxyError::SequenceMismatch { sent: 1, received: 99 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_proxy_rejects_call_frames() -> Result<()> {
    let transport = CallTransport::new(|_payload: &[u8]| {
        CallEncoder::new(1, "init", &[]).to_bytes().map_err(|e| TransportError::Io(e.to_string()))
    });
    let mut client = ProxyClient::new(Box::new(transport));
    assert!(matches!(
        client.get_state("k").await,
        Err(ProxyError::Rpc(rillrpc::Error::ProtocolViolation(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_proxy_absent_key_is_empty() -> Result<()> {
    let mut client = ProxyClient::new(Box::new(MockProxy::new()));
    assert!(client.get_state("missing").await?.is_empty());
    client.set_state("present", b"\x00\x01").await?;
    assert_eq!(client.get_state("present").await?, vec![0, 1]);
    Ok(())
}

// ============================================================================
//  FRAMING
// ============================================================================

#[tokio::test]
async fn test_ipv6_endpoint_binds_and_connects() -> Result<()> {
    let Ok(server) = Server::bind(&Endpoint::new("::1", 0)).await else {
        // no IPv6 loopback on this host
        return Ok(());
    };
    let endpoint = server.local_endpoint().clone();
    assert_eq!(endpoint.ip, "::1");
    crate::transport::TcpTransport::connect(&endpoint).await?;
    Ok(())
}

#[tokio::test]
async fn test_frames_cross_a_stream() -> Result<()> {
    let (mut a, mut b) = tokio::io::duplex(1024);
    write_frame(&mut a, b"hello").await?;
    write_frame(&mut a, b"").await?;
    drop(a);

    assert_eq!(read_frame(&mut b).await?, Some(b"hello".to_vec()));
    assert_eq!(read_frame(&mut b).await?, Some(Vec::new()));
    assert_eq!(read_frame(&mut b).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() -> Result<()> {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes()).await?;
    assert!(matches!(read_frame(&mut b).await, Err(TransportError::PayloadTooLarge(_))));
    Ok(())
}

#[tokio::test]
async fn test_partial_length_prefix_is_connection_lost() -> Result<()> {
    for cut in 1..4 {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&5u32.to_le_bytes()[..cut]).await?;
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(TransportError::ConnectionLost(_))));
    }
    Ok(())
}

#[tokio::test]
async fn test_truncated_frame_is_connection_lost() -> Result<()> {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.write_all(&10u32.to_le_bytes()).await?;
    a.write_all(b"abc").await?;
    drop(a);
    assert!(matches!(read_frame(&mut b).await, Err(TransportError::ConnectionLost(_))));
    Ok(())
}

// ============================================================================
//  CONFIGURATION
// ============================================================================

fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
}

#[test]
fn test_config_defaults() -> Result<()> {
    let vars = [(LISTEN_ADDRESS_VAR, "10.1.2.4:31000"), (PROXY_ADDRESS_VAR, "10.1.2.3:31001")];
    let config = Config::from_lookup(lookup(&vars))?;
    assert_eq!(config.listen, Endpoint::new("10.1.2.4", 31000));
    assert_eq!(config.proxy, Endpoint::new("10.1.2.3", 31001));
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.max_bytes, 512_000_000);
    assert_eq!(config.log.backups, 10);
    Ok(())
}

#[test]
fn test_config_overrides() -> Result<()> {
    let vars = [
        (LISTEN_ADDRESS_VAR, "localhost:1"),
        (PROXY_ADDRESS_VAR, "localhost:2"),
        (LOG_LEVEL_VAR, "info"),
        (LOG_MAX_BYTES_VAR, "4096"),
        (LOG_BACKUPS_VAR, "2"),
    ];
    let config = Config::from_lookup(lookup(&vars))?;
    assert_eq!(config.log.level, "info");
    assert_eq!(config.log.max_bytes, 4096);
    assert_eq!(config.log.backups, 2);
    Ok(())
}

#[test]
fn test_config_missing_address() {
    let vars = [(LISTEN_ADDRESS_VAR, "localhost:1")];
    assert_eq!(
        Config::from_lookup(lookup(&vars)),
        Err(ConfigError::Missing(PROXY_ADDRESS_VAR))
    );
}

#[test]
fn test_config_malformed_values() {
    let vars = [(LISTEN_ADDRESS_VAR, "localhost"), (PROXY_ADDRESS_VAR, "localhost:2")];
    assert!(matches!(
        Config::from_lookup(lookup(&vars)),
        Err(ConfigError::Malformed { var: LISTEN_ADDRESS_VAR, .. })
    ));

    let vars = [
        (LISTEN_ADDRESS_VAR, "localhost:1"),
        (PROXY_ADDRESS_VAR, "localhost:2"),
        (LOG_BACKUPS_VAR, "many"),
    ];
    assert!(matches!(
        Config::from_lookup(lookup(&vars)),
        Err(ConfigError::Malformed { var: LOG_BACKUPS_VAR, .. })
    ));
}

#[test]
fn test_config_rejects_wildcard_listen_host() {
    for listen in ["0.0.0.0:31000", "[::]:31000"] {
        let vars = [(LISTEN_ADDRESS_VAR, listen), (PROXY_ADDRESS_VAR, "10.1.2.3:31001")];
        assert!(matches!(
            Config::from_lookup(lookup(&vars)),
            Err(ConfigError::Malformed { var: LISTEN_ADDRESS_VAR, .. })
        ));
    }
    // a wildcard proxy address is the operator's problem, not ours
    let vars = [(LISTEN_ADDRESS_VAR, "10.1.2.4:1"), (PROXY_ADDRESS_VAR, "0.0.0.0:2")];
    assert!(Config::from_lookup(lookup(&vars)).is_ok());
}

#[test]
fn test_endpoint_parsing() {
    assert_eq!("127.0.0.1:80".parse::<Endpoint>(), Ok(Endpoint::new("127.0.0.1", 80)));
    assert_eq!("[::1]:9000".parse::<Endpoint>(), Ok(Endpoint::new("::1", 9000)));
    assert_eq!(Endpoint::new("::1", 9000).to_string(), "[::1]:9000");
    assert!("[]:80".parse::<Endpoint>().is_err());
    assert!(":80".parse::<Endpoint>().is_err());
    assert!("host:99999".parse::<Endpoint>().is_err());
    assert!("host".parse::<Endpoint>().is_err());
    assert_eq!(Endpoint::new("h", 1).to_string(), "h:1");
}

// ============================================================================
//  LOG ROTATION
// ============================================================================

fn scratch_dir(name: &str) -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("rill-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[test]
fn test_log_file_rotates_and_caps_backups() -> Result<()> {
    let dir = scratch_dir("rotate")?;
    let path = dir.join("rill.log");
    let mut file = RotatingFile::open(&path, 10, 2)?;

    for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
        file.write_all(line.as_bytes())?;
    }
    file.flush()?;

    assert_eq!(std::fs::read_to_string(&path)?, "dddddddd\n");
    assert_eq!(std::fs::read_to_string(dir.join("rill.log.1"))?, "cccccccc\n");
    assert_eq!(std::fs::read_to_string(dir.join("rill.log.2"))?, "bbbbbbbb\n");
    assert!(!dir.join("rill.log.3").exists());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn test_log_file_without_backups_truncates() -> Result<()> {
    let dir = scratch_dir("truncate")?;
    let path = dir.join("rill.log");
    let mut file = RotatingFile::open(&path, 10, 0)?;

    file.write_all(b"first...\n")?;
    file.write_all(b"second..\n")?;
    file.flush()?;

    assert_eq!(std::fs::read_to_string(&path)?, "second..\n");
    assert!(!dir.join("rill.log.1").exists());

    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

#[test]
fn test_log_init_rejects_bad_filter() -> Result<()> {
    let dir = scratch_dir("filter")?;
    let config = crate::config::LogConfig {
        path: dir.join("rill.log"),
        level: "rill=notalevel".into(),
        ..Default::default()
    };
    assert!(crate::logging::init(&config).is_err());
    std::fs::remove_dir_all(&dir)?;
    Ok(())
}

// ============================================================================
//  EXIT STATUS
// ============================================================================

#[test]
fn test_exit_status() {
    assert_eq!(exit_status(&Ok(())), EXIT_OK);
    let failed = Err(Fatal::Callback { op: "process_record", source: anyhow::anyhow!("boom") });
    assert_eq!(exit_status(&failed), EXIT_FATAL);
    let refused = Err(Fatal::Registration(ProxyError::Remote(FailureReason::Rejected("full".into()))));
    assert_eq!(exit_status(&refused), EXIT_FATAL);
    assert_ne!(EXIT_OK, EXIT_FATAL);
}
