//! StandardTransport over an in-memory byte stream: handshake headers,
//! heartbeat monitoring, sticky failures and close.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use stomp_session::{
    ErrorKind, Frame, Heartbeat, IoStream, ProtocolVersion, ReceiptTimeout, StandardTransport,
    Transport, TransportLimits, TransportStream,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct MockStream {
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Bytes>>>,
    bytes_read: Arc<AtomicU64>,
    bytes_written: AtomicU64,
    written: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
    write_ended: AtomicBool,
    close_calls: AtomicUsize,
    closed: CancellationToken,
}

impl MockStream {
    fn written(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }
}

#[async_trait]
impl TransportStream for MockStream {
    async fn read(&self) -> io::Result<Option<Bytes>> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            chunk = incoming.recv() => match chunk {
                Some(Ok(chunk)) => Ok(Some(chunk)),
                Some(Err(err)) => Err(err),
                None => Ok(None),
            },
        }
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    async fn write(&self, chunk: Bytes) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.closed.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        self.written.lock().extend_from_slice(&chunk);
        self.bytes_written
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn write_end(&self) -> io::Result<()> {
        self.write_ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.cancel();
    }
}

/// The remote end: bytes pushed here count as read immediately, the way a
/// socket buffers them ahead of the consumer.
struct Peer {
    tx: mpsc::UnboundedSender<io::Result<Bytes>>,
    bytes_read: Arc<AtomicU64>,
}

impl Peer {
    fn send(&self, data: &'static [u8]) {
        self.bytes_read
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        let _ = self.tx.send(Ok(Bytes::from_static(data)));
    }

    fn fail(&self, message: &str) {
        let _ = self
            .tx
            .send(Err(io::Error::new(io::ErrorKind::ConnectionReset, message.to_string())));
    }
}

fn mock(limits: TransportLimits, started: bool) -> (StandardTransport<MockStream>, Peer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bytes_read = Arc::new(AtomicU64::new(0));
    let stream = MockStream {
        incoming: tokio::sync::Mutex::new(rx),
        bytes_read: bytes_read.clone(),
        bytes_written: AtomicU64::new(0),
        written: Mutex::new(Vec::new()),
        fail_writes: AtomicBool::new(false),
        write_ended: AtomicBool::new(false),
        close_calls: AtomicUsize::new(0),
        closed: CancellationToken::new(),
    };
    let transport = if started {
        StandardTransport::new_started(stream, limits)
    } else {
        StandardTransport::new(stream, limits)
    };
    (transport, Peer { tx, bytes_read })
}

async fn read_connected(transport: &StandardTransport<MockStream>) {
    let frame = transport.read_frame(ProtocolVersion::V1_0).await.unwrap();
    assert_eq!(frame.command, "CONNECTED");
    frame.body.read_empty().await.unwrap();
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn connect_replaces_heartbeat_header() {
    let (transport, _peer) = mock(TransportLimits::default(), false);

    let connect = Frame::new("CONNECT")
        .header("accept-version", "1.2")
        .header("heart-beat", "9,9")
        .header("login", "guest");
    transport.write_frame(connect, ProtocolVersion::V1_0).await.unwrap();

    let written = transport.stream().written();
    assert!(written.contains("heart-beat:0,3000\n"), "{written}");
    assert!(!written.contains("9,9"));
    assert!(written.contains("login:guest\n"));
}

#[tokio::test]
async fn connect_without_heartbeats_omits_header() {
    let limits = TransportLimits::default().with_heartbeat(Heartbeat::disabled());
    let (transport, _peer) = mock(limits, false);

    transport
        .write_frame(Frame::new("CONNECT"), ProtocolVersion::V1_0)
        .await
        .unwrap();

    assert!(!transport.stream().written().contains("heart-beat"));
}

#[tokio::test]
async fn connect_after_session_started_is_rejected() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"CONNECTED\nversion:1.2\n\n\0");
    read_connected(&transport).await;

    let err = transport
        .write_frame(Frame::new("CONNECT"), ProtocolVersion::V1_2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationError);
    assert_eq!(err.message(), "session already started");
    assert!(transport.stream_error().is_none());
}

#[tokio::test]
async fn server_connected_negotiates_heartbeat_header() {
    let (transport, _peer) = mock(TransportLimits::default(), false);

    let connected = Frame::new("CONNECTED")
        .header("version", "1.2")
        .header("heart-beat", "1000,1000");
    transport.write_frame(connected, ProtocolVersion::V1_2).await.unwrap();

    let written = transport.stream().written();
    assert!(written.contains("heart-beat:0,3000\n"), "{written}");
    assert_eq!(written.matches("heart-beat").count(), 1);

    let again = transport
        .write_frame(Frame::new("CONNECTED"), ProtocolVersion::V1_2)
        .await
        .unwrap_err();
    assert_eq!(again.message(), "session already started");
}

#[tokio::test]
async fn blank_lines_before_first_frame_rejected() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"\nCONNECTED\nversion:1.2\n\n\0");

    let err = transport.read_frame(ProtocolVersion::V1_0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[tokio::test]
async fn started_transport_skips_blank_lines() {
    let (transport, peer) = mock(TransportLimits::default(), true);
    peer.send(b"\n\nRECEIPT\nreceipt-id:1\n\n\0");

    let frame = transport.read_frame(ProtocolVersion::V1_2).await.unwrap();
    assert_eq!(frame.command, "RECEIPT");
}

#[tokio::test]
async fn invalid_heartbeat_header_breaks_transport() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"CONNECTED\nversion:1.2\nheart-beat:soon\n\n\0");

    let err = transport.read_frame(ProtocolVersion::V1_0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(transport.stream_error().is_some());
}

// ============================================================================
// Heartbeats
// ============================================================================

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"CONNECTED\nversion:1.2\nheart-beat:2000,2000\n\n\0");
    read_connected(&transport).await;

    // 3000ms negotiated plus 400ms tolerance
    tokio::time::sleep(Duration::from_millis(3300)).await;
    assert!(transport.stream_error().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let err = transport.stream_error().expect("transport should have failed");
    assert_eq!(err.message(), "session timeout");
    assert!(transport.stream().closed.is_cancelled());

    let read = transport.read_frame(ProtocolVersion::V1_2).await.unwrap_err();
    assert_eq!(read.message(), "session timeout");
}

#[tokio::test(start_paused = true)]
async fn incoming_heartbeats_keep_session_alive() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"CONNECTED\nversion:1.2\nheart-beat:2000,2000\n\n\0");
    read_connected(&transport).await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(2000)).await;
        peer.send(b"\n");
    }

    assert!(transport.stream_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn unread_heartbeats_on_io_stream_keep_session_alive() {
    let (local, mut remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let limits = TransportLimits::default().with_heartbeat(Heartbeat::new(0, 1000));
    let transport = StandardTransport::new(IoStream::new(reader, writer), limits);

    remote
        .write_all(b"CONNECTED\nversion:1.2\nheart-beat:1000,0\n\n\0")
        .await
        .unwrap();
    let connected = transport.read_frame(ProtocolVersion::V1_0).await.unwrap();
    assert_eq!(connected.command, "CONNECTED");
    connected.body.read_empty().await.unwrap();

    // far more heartbeats than chunks the stream once buffered, none read
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        remote.write_all(b"\n").await.unwrap();
        assert!(transport.stream_error().is_none());
    }

    transport
        .write_frame(
            Frame::new("SEND").header("destination", "/queue/a"),
            ProtocolVersion::V1_2,
        )
        .await
        .unwrap();
    let mut sent = [0u8; 5];
    remote.read_exact(&mut sent).await.unwrap();
    assert_eq!(&sent, b"SEND\n");

    remote.write_all(b"RECEIPT\nreceipt-id:7\n\n\0").await.unwrap();
    let receipt = transport.read_frame(ProtocolVersion::V1_2).await.unwrap();
    assert_eq!(receipt.command, "RECEIPT");
    assert_eq!(receipt.headers.get("receipt-id"), Some("7"));
}

#[tokio::test(start_paused = true)]
async fn idle_writer_sends_heartbeats() {
    let limits = TransportLimits::default().with_heartbeat(Heartbeat::new(1000, 0));
    let (transport, peer) = mock(limits, false);
    peer.send(b"CONNECTED\nversion:1.2\nheart-beat:0,1000\n\n\0");
    read_connected(&transport).await;

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(transport.stream().written(), "\n\n");
    assert!(transport.stream_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn no_monitoring_when_peer_declines() {
    let (transport, peer) = mock(TransportLimits::default(), false);
    peer.send(b"CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0");
    read_connected(&transport).await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(transport.stream_error().is_none());
    assert_eq!(transport.stream().written(), "");
}

// ============================================================================
// Failures and close
// ============================================================================

#[tokio::test]
async fn first_failure_sticks() {
    let (transport, peer) = mock(TransportLimits::default(), true);
    peer.fail("connection reset");

    let err = transport.read_frame(ProtocolVersion::V1_2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);

    let write = transport
        .write_frame(Frame::new("DISCONNECT"), ProtocolVersion::V1_2)
        .await
        .unwrap_err();
    assert_eq!(write.message(), err.message());
    assert_eq!(transport.stream().written(), "");
    assert_eq!(transport.stream().close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn write_failure_breaks_transport() {
    let (transport, _peer) = mock(TransportLimits::default(), true);
    transport.stream().fail_writes.store(true, Ordering::SeqCst);

    let err = transport
        .write_frame(Frame::new("SEND").header("destination", "/q"), ProtocolVersion::V1_2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(transport.stream_error().is_some());
}

#[tokio::test]
async fn body_error_breaks_transport() {
    let (transport, peer) = mock(TransportLimits::default(), true);
    peer.send(b"MESSAGE\nsubscription:1\ncontent-length:5\n\nhelloX");

    let frame = transport.read_frame(ProtocolVersion::V1_2).await.unwrap();
    assert!(frame.body.read_to_end(64).await.is_err());

    let err = transport.stream_error().expect("transport should have failed");
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[tokio::test]
async fn end_of_stream_is_transport_failure() {
    let (transport, peer) = mock(TransportLimits::default(), true);
    peer.send(b"MESSAGE\nsubscription:1\n");
    drop(peer);

    let err = transport.read_frame(ProtocolVersion::V1_2).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
}

#[tokio::test]
async fn close_is_idempotent() {
    let (transport, _peer) = mock(TransportLimits::default(), true);

    transport.close().await;
    transport.close().await;

    let stream = transport.stream();
    assert!(stream.write_ended.load(Ordering::SeqCst));
    assert_eq!(stream.close_calls.load(Ordering::SeqCst), 1);

    let err = transport
        .write_frame(Frame::new("DISCONNECT"), ProtocolVersion::V1_2)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);
}

#[tokio::test]
async fn close_after_failure_skips_half_close() {
    let (transport, peer) = mock(TransportLimits::default(), true);
    peer.fail("reset");
    assert!(transport.read_frame(ProtocolVersion::V1_2).await.is_err());

    transport.close().await;

    assert!(!transport.stream().write_ended.load(Ordering::SeqCst));
}

#[test]
fn receipts_requested_for_disconnect_and_unsubscribe() {
    let limits = TransportLimits::default().with_operation_timeout(Duration::from_millis(750));
    let (transport, _peer) = mock(limits, true);

    let after = ReceiptTimeout::After(Duration::from_millis(750));
    assert_eq!(transport.receipt_timeout(&Frame::new("DISCONNECT")), after);
    assert_eq!(transport.receipt_timeout(&Frame::new("UNSUBSCRIBE")), after);
    assert_eq!(
        transport.receipt_timeout(&Frame::new("SEND")),
        ReceiptTimeout::NotRequested
    );
    assert_eq!(
        transport.receipt_timeout(&Frame::new("SUBSCRIBE")),
        ReceiptTimeout::NotRequested
    );
}
