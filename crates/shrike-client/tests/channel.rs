//! End-to-end channel tests against a scripted in-process server.
//!
//! Each test drives the server half of a `MemChannel` pair by hand: it
//! sends the greeting, inspects the frames the client writes, and answers
//! with handcrafted response frames.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use shrike_client::transport::MessageChannel;
use shrike_client::{
    Affinity, ClientChannel, CodecConfig, Connection, Error, InvocationReceiver,
    InvocationRequest, Locator, MemChannel, MethodLocator, MethodResultProducer, Opcode,
    RemoteConnection, RemoteThrowable, Value,
};
use shrike_core::wire;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// The scripted server half of the channel.
struct TestServer {
    channel: MessageChannel,
}

impl TestServer {
    /// Receive one request frame, returning `(opcode, id, body)`.
    async fn recv_request(&self) -> (u8, u16, Bytes) {
        let msg = self.channel.recv_message().await.unwrap();
        assert!(msg.len() >= 3, "request frame too short: {:?}", msg);
        (
            msg[0],
            u16::from_be_bytes([msg[1], msg[2]]),
            msg.slice(3..),
        )
    }

    /// Send one response frame.
    async fn send_response(&self, opcode: Opcode, id: u16, body: &[u8]) {
        let mut msg = vec![opcode.as_u8()];
        msg.extend_from_slice(&id.to_be_bytes());
        msg.extend_from_slice(body);
        self.channel.send_message(Bytes::from(msg)).await.unwrap();
    }
}

async fn connected(server_max_version: u8) -> (Arc<ClientChannel>, TestServer) {
    init_tracing();
    let (client_half, server_half) = MemChannel::pair();
    let server = TestServer {
        channel: MessageChannel::Mem(server_half),
    };

    // The greeting is buffered ahead of the client's handshake read.
    let mut greeting = vec![server_max_version];
    greeting.extend_from_slice(&[0xAA, 0xBB]);
    server
        .channel
        .send_message(Bytes::from(greeting))
        .await
        .unwrap();

    let channel = Arc::new(
        ClientChannel::from_channel(MessageChannel::Mem(client_half))
            .await
            .unwrap(),
    );

    let reply = server.channel.recv_message().await.unwrap();
    assert_eq!(&reply[1..], &[0x05, b'r', b'i', b'v', b'e', b'r']);

    (channel, server)
}

/// Outcomes observed by a test receiver.
enum Outcome {
    Ready(MethodResultProducer),
    Cancelled(Error),
    ProceedAsync,
}

struct TestReceiver {
    tx: mpsc::UnboundedSender<Outcome>,
}

impl TestReceiver {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(TestReceiver { tx }), rx)
    }
}

impl InvocationReceiver for TestReceiver {
    fn result_ready(&self, producer: MethodResultProducer) {
        let _ = self.tx.send(Outcome::Ready(producer));
    }

    fn request_cancelled(&self, error: Error) {
        let _ = self.tx.send(Outcome::Cancelled(error));
    }

    fn proceed_asynchronously(&self) {
        let _ = self.tx.send(Outcome::ProceedAsync);
    }
}

fn sample_invocation() -> InvocationRequest {
    InvocationRequest::new(
        MethodLocator::new("ping", Vec::new()),
        Locator::new("accounts", "LedgerBean"),
    )
}

/// Build an invocation-response body: result object, attachment count,
/// attachment pairs.
fn invocation_response_body(
    codec: &CodecConfig,
    result: &Value,
    attachments: &[(&str, Value)],
) -> Vec<u8> {
    let mut body = Vec::new();
    let mut m = codec.marshaller(&mut body);
    m.write_object(result).unwrap();
    m.write_u8(attachments.len() as u8);
    for (key, value) in attachments {
        m.write_object(&Value::from(*key)).unwrap();
        m.write_object(value).unwrap();
    }
    m.finish().unwrap();
    body
}

fn utf_body(message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    wire::write_modified_utf8(&mut body, message).unwrap();
    body
}

async fn expect_ready(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> MethodResultProducer {
    match rx.recv().await.expect("receiver dropped") {
        Outcome::Ready(producer) => producer,
        Outcome::Cancelled(e) => panic!("invocation cancelled: {}", e),
        Outcome::ProceedAsync => panic!("unexpected proceed-async"),
    }
}

#[tokio_test_lite::test]
async fn handshake_downgrades_to_version_three() {
    init_tracing();
    let (client_half, server_half) = MemChannel::pair();
    let server = TestServer {
        channel: MessageChannel::Mem(server_half),
    };

    server
        .channel
        .send_message(Bytes::from_static(&[5, 0x13, 0x37, 0x00]))
        .await
        .unwrap();

    let channel = ClientChannel::from_channel(MessageChannel::Mem(client_half))
        .await
        .unwrap();

    let reply = server.channel.recv_message().await.unwrap();
    assert_eq!(&reply[..], &[3, 0x05, b'r', b'i', b'v', b'e', b'r']);
    assert_eq!(channel.version(), 3);
}

#[tokio_test_lite::test]
async fn simple_invocation_v3() {
    let (channel, server) = connected(5).await;
    assert_eq!(channel.version(), 3);
    let codec = CodecConfig::for_version(3);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;

    let (opcode, id, body) = server.recv_request().await;
    assert_eq!(opcode, Opcode::InvocationRequest.as_u8());
    let mut u = codec.unmarshaller(body).unwrap();
    assert_eq!(
        u.read_object().unwrap(),
        Value::MethodLocator(MethodLocator::new("ping", Vec::new()))
    );
    assert_eq!(
        u.read_object().unwrap(),
        Value::Locator(Locator::new("accounts", "LedgerBean"))
    );
    assert_eq!(u.read_packed_uint().unwrap(), 0);
    assert_eq!(u.remaining(), 0);

    server
        .send_response(
            Opcode::InvocationResponse,
            id,
            &invocation_response_body(&codec, &Value::from("ok"), &[]),
        )
        .await;

    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::from("ok"));
    assert_eq!(channel.weak_affinity(), None);
}

#[tokio_test_lite::test]
async fn weak_affinity_attachment_updates_client_context() {
    let (channel, server) = connected(3).await;
    let codec = CodecConfig::for_version(3);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;

    let (_, id, _) = server.recv_request().await;
    let body = invocation_response_body(
        &codec,
        &Value::from("ok"),
        &[(
            "jboss.weak-affinity",
            Value::Affinity(Affinity::Node("node-1".into())),
        )],
    );
    server
        .send_response(Opcode::InvocationResponse, id, &body)
        .await;

    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::from("ok"));
    assert_eq!(
        channel.weak_affinity(),
        Some(Affinity::Node("node-1".into()))
    );
}

#[tokio_test_lite::test]
async fn unrecognized_attachments_are_discarded() {
    let (channel, server) = connected(3).await;
    let codec = CodecConfig::for_version(3);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;

    let (_, id, _) = server.recv_request().await;
    let body = invocation_response_body(
        &codec,
        &Value::Int(11),
        &[("x.vendor.stat", Value::from("ignored"))],
    );
    server
        .send_response(Opcode::InvocationResponse, id, &body)
        .await;

    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::Int(11));
    assert_eq!(channel.weak_affinity(), None);
}

#[tokio_test_lite::test]
async fn compressed_response_inflates_to_invocation_response() {
    let (channel, server) = connected(3).await;
    let codec = CodecConfig::for_version(3);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, id, _) = server.recv_request().await;

    let plain = invocation_response_body(&codec, &Value::from("deflated ok"), &[]);
    let mut compressed = Vec::new();
    flate2::read::DeflateEncoder::new(&plain[..], flate2::Compression::default())
        .read_to_end(&mut compressed)
        .unwrap();

    server
        .send_response(Opcode::CompressedInvocationMessage, id, &compressed)
        .await;

    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::from("deflated ok"));
}

#[tokio_test_lite::test]
async fn application_exception_v2_keeps_channel_usable() {
    let (channel, server) = connected(2).await;
    assert_eq!(channel.version(), 2);
    let codec = CodecConfig::for_version(2);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, id, _) = server.recv_request().await;

    // Throwable followed by an empty trailing attachment block.
    let mut body = Vec::new();
    let mut m = codec.marshaller(&mut body);
    m.write_object(&Value::Throwable(Box::new(RemoteThrowable::new(
        "com.example.LedgerException",
        Some("insufficient funds".into()),
    ))))
    .unwrap();
    m.write_u8(0);
    m.finish().unwrap();

    server
        .send_response(Opcode::ApplicationException, id, &body)
        .await;

    let producer = expect_ready(&mut outcomes).await;
    match producer.get_result() {
        Err(Error::ApplicationException(t)) => {
            assert_eq!(t.class_name, "com.example.LedgerException");
            assert_eq!(t.message.as_deref(), Some("insufficient funds"));
        }
        other => panic!("expected application exception, got {:?}", other),
    }

    // A subsequent invocation with a fresh id still completes.
    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, second_id, _) = server.recv_request().await;
    server
        .send_response(
            Opcode::InvocationResponse,
            second_id,
            &invocation_response_body(&codec, &Value::from("ok"), &[]),
        )
        .await;
    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::from("ok"));
}

#[tokio_test_lite::test]
async fn typed_failures_map_to_error_kinds() {
    let (channel, server) = connected(3).await;

    for (opcode, check) in [
        (
            Opcode::NoSuchEjb,
            (|e| matches!(e, Error::TargetMissing(_))) as fn(&Error) -> bool,
        ),
        (Opcode::NoSuchMethod, |e| {
            matches!(e, Error::MethodMissing(_))
        }),
        (Opcode::SessionNotActive, |e| {
            matches!(e, Error::SessionInactive(_))
        }),
    ] {
        let (receiver, mut outcomes) = TestReceiver::new();
        channel
            .process_invocation(sample_invocation(), receiver)
            .await;
        let (_, id, _) = server.recv_request().await;
        server
            .send_response(opcode, id, &utf_body("accounts/LedgerBean"))
            .await;

        let producer = expect_ready(&mut outcomes).await;
        let error = producer.get_result().unwrap_err();
        assert!(check(&error), "wrong error for {}: {:?}", opcode, error);
    }
}

#[tokio_test_lite::test]
async fn unknown_opcode_terminates_invocation_with_protocol_error() {
    let (channel, server) = connected(3).await;

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, id, _) = server.recv_request().await;

    let mut msg = vec![0x7Fu8];
    msg.extend_from_slice(&id.to_be_bytes());
    server.channel.send_message(Bytes::from(msg)).await.unwrap();

    let producer = expect_ready(&mut outcomes).await;
    match producer.get_result() {
        Err(Error::ProtocolError(_)) => {}
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert!(!channel.is_closed());
}

#[tokio_test_lite::test]
async fn proceed_async_precedes_real_response_under_same_id() {
    let (channel, server) = connected(3).await;
    let codec = CodecConfig::for_version(3);

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, id, _) = server.recv_request().await;

    server
        .send_response(Opcode::ProceedAsyncResponse, id, &[])
        .await;
    match outcomes.recv().await.unwrap() {
        Outcome::ProceedAsync => {}
        _ => panic!("expected proceed-async first"),
    }

    // The invocation is still registered: the real response completes it.
    server
        .send_response(
            Opcode::InvocationResponse,
            id,
            &invocation_response_body(&codec, &Value::from("late ok"), &[]),
        )
        .await;
    let producer = expect_ready(&mut outcomes).await;
    assert_eq!(producer.get_result().unwrap(), Value::from("late ok"));
}

#[tokio_test_lite::test]
async fn discard_result_consumes_without_decoding() {
    let (channel, server) = connected(3).await;

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let (_, id, _) = server.recv_request().await;

    // Garbage payload: discarding must not attempt to decode it.
    server
        .send_response(Opcode::InvocationResponse, id, &[0xFF, 0xFF, 0xFF])
        .await;

    let producer = expect_ready(&mut outcomes).await;
    producer.discard_result();
}

#[tokio_test_lite::test]
async fn open_session_builds_stateful_locator() {
    let (channel, server) = connected(3).await;
    let codec = CodecConfig::for_version(3);

    let stateless = Locator::new("accounts", "CartBean").with_app_name("shop");
    let channel_clone = channel.clone();
    let open = tokio::spawn(async move { channel_clone.open_session(stateless).await });

    let (opcode, id, body) = server.recv_request().await;
    assert_eq!(opcode, Opcode::OpenSessionRequest.as_u8());
    let mut cur = wire::ByteCursor::new(body);
    assert_eq!(wire::read_modified_utf8(&mut cur).unwrap(), "shop");
    assert_eq!(wire::read_modified_utf8(&mut cur).unwrap(), "accounts");
    assert_eq!(wire::read_modified_utf8(&mut cur).unwrap(), "CartBean");
    assert_eq!(wire::read_modified_utf8(&mut cur).unwrap(), "");
    assert_eq!(cur.remaining(), 0);

    let session_id = [0x10u8, 0x20, 0x30, 0x40];
    let mut body = Vec::new();
    wire::write_packed_uint(&mut body, session_id.len() as u64);
    body.extend_from_slice(&session_id);
    let mut m = codec.marshaller(&mut body);
    m.write_object(&Value::Affinity(Affinity::Cluster("ha".into())))
        .unwrap();
    m.finish().unwrap();
    server
        .send_response(Opcode::OpenSessionResponse, id, &body)
        .await;

    let stateful = open.await.unwrap().unwrap();
    assert_eq!(stateful.stateless.bean_name, "CartBean");
    assert_eq!(stateful.session_id, session_id);
    assert_eq!(stateful.affinity, Affinity::Cluster("ha".into()));
}

#[tokio_test_lite::test]
async fn open_session_against_stateless_bean_fails_typed() {
    let (channel, server) = connected(3).await;

    let channel_clone = channel.clone();
    let open = tokio::spawn(async move {
        channel_clone
            .open_session(Locator::new("accounts", "LedgerBean"))
            .await
    });

    let (_, id, _) = server.recv_request().await;
    server
        .send_response(Opcode::EjbNotStateful, id, &utf_body("LedgerBean"))
        .await;

    match open.await.unwrap() {
        Err(Error::NotStateful(msg)) => assert_eq!(msg, "LedgerBean"),
        other => panic!("expected not-stateful, got {:?}", other),
    }
}

#[tokio_test_lite::test]
async fn channel_close_fails_pending_and_future_session_opens() {
    let (channel, server) = connected(3).await;

    let channel_clone = channel.clone();
    let open = tokio::spawn(async move {
        channel_clone
            .open_session(Locator::new("accounts", "CartBean"))
            .await
    });

    // Swallow the request, then close the transport without answering.
    let _ = server.recv_request().await;
    drop(server);

    assert_eq!(open.await.unwrap(), Err(Error::ChannelClosed));
    assert!(channel.is_closed());

    // The channel is permanently unusable.
    assert_eq!(
        channel
            .open_session(Locator::new("accounts", "CartBean"))
            .await,
        Err(Error::ChannelClosed)
    );
}

#[tokio_test_lite::test]
async fn channel_close_cancels_pending_method_invocations() {
    let (channel, server) = connected(3).await;

    let (receiver, mut outcomes) = TestReceiver::new();
    channel
        .process_invocation(sample_invocation(), receiver)
        .await;
    let _ = server.recv_request().await;
    drop(server);

    match outcomes.recv().await.unwrap() {
        Outcome::Cancelled(Error::ChannelClosed) => {}
        Outcome::Cancelled(e) => panic!("wrong cancellation error: {}", e),
        _ => panic!("expected cancellation"),
    }
}

#[tokio_test_lite::test]
async fn remote_connection_memoizes_the_handshake() {
    init_tracing();
    let (client_half, server_half) = MemChannel::pair();
    let server = TestServer {
        channel: MessageChannel::Mem(server_half),
    };

    let connection = RemoteConnection::new(Connection::mem(client_half));

    server
        .channel
        .send_message(Bytes::from_static(&[3]))
        .await
        .unwrap();

    let first = connection.client_channel().await.unwrap();
    let _ = server.channel.recv_message().await.unwrap();

    // No second greeting exchange happens: the channel is shared.
    let second = connection.client_channel().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio_test_lite::test]
async fn failed_handshake_is_memoized_per_connection() {
    init_tracing();
    let (client_half, server_half) = MemChannel::pair();

    // Close the server side before any greeting is sent.
    drop(server_half);

    let connection = RemoteConnection::new(Connection::mem(client_half));

    match connection.client_channel().await {
        Err(Error::HandshakeFailed(_)) => {}
        other => panic!("expected handshake failure, got {:?}", other.map(|_| ())),
    }
    match connection.client_channel().await {
        Err(Error::HandshakeFailed(_)) => {}
        other => panic!("expected memoized failure, got {:?}", other.map(|_| ())),
    }
}
