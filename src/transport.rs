//! Frame transports.
//!
//! A [`Transport`] moves whole frames and is what a
//! [`ClientSession`](crate::session::ClientSession) drives. A
//! [`TransportStream`] moves raw bytes and is what network adapters provide.
//! [`StandardTransport`] joins the two: it runs the frame codec over a byte
//! stream and negotiates and monitors heartbeats.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::body::FrameBody;
use crate::codec::{self, ChunkWriter, WriteLimits, WriteParams};
use crate::error::{FrameError, Result, StompError};
use crate::frame::{CONNECT, CONNECTED, DISCONNECT, Frame, ProtocolVersion, UNSUBSCRIBE};
use crate::header::Headers;
use crate::heartbeat::{Heartbeat, negotiate_heartbeats, parse_heartbeat_header};
use crate::parser::{self, ReadLimits, ReadParams};
use crate::reader::ByteReader;

/// How long a send waits for its RECEIPT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiptTimeout {
    /// Ask the transport which frames need a receipt.
    #[default]
    Default,
    /// Do not request a receipt.
    NotRequested,
    /// Request a receipt and wait for it indefinitely.
    Forever,
    /// Request a receipt and give up after the duration.
    After(Duration),
}

impl ReceiptTimeout {
    /// Map the millisecond sentinels used on other STOMP clients:
    /// `0` waits forever, `-1` requests no receipt, `-2` asks the transport.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => ReceiptTimeout::Forever,
            -2 => ReceiptTimeout::Default,
            ms if ms < 0 => ReceiptTimeout::NotRequested,
            ms => ReceiptTimeout::After(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    pub fn is_requested(&self) -> bool {
        matches!(self, ReceiptTimeout::Forever | ReceiptTimeout::After(_))
    }
}

/// Frame-level connection consumed by a client session.
///
/// A session is the only caller once it wraps a transport. It never issues
/// two reads or two writes at the same time, and it fully consumes a frame
/// body before reading the next frame.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The receipt timeout to use for `frame` when the caller left it to the
    /// transport.
    fn receipt_timeout(&self, frame: &Frame) -> ReceiptTimeout;

    /// Read the next frame. Resolves once the head is parsed; the body
    /// streams afterwards.
    async fn read_frame(&self, version: ProtocolVersion) -> Result<Frame>;

    /// Serialize and send `frame`, including its body.
    async fn write_frame(&self, frame: Frame, version: ProtocolVersion) -> Result<()>;

    async fn close(&self);
}

/// Raw duplex byte stream underneath a [`StandardTransport`].
#[async_trait]
pub trait TransportStream: Send + Sync + 'static {
    /// Next chunk of incoming bytes, or `None` once the peer is done.
    async fn read(&self) -> io::Result<Option<Bytes>>;

    /// Total bytes read so far.
    fn bytes_read(&self) -> u64;

    /// Total bytes written so far.
    fn bytes_written(&self) -> u64;

    async fn write(&self, chunk: Bytes) -> io::Result<()>;

    /// Half-close: signal that nothing more will be written.
    async fn write_end(&self) -> io::Result<()>;

    /// Tear the stream down. Pending and later reads end.
    fn close(&self);
}

/// Configuration of a [`StandardTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLimits {
    /// Receipt timeout suggested for DISCONNECT and UNSUBSCRIBE, and the
    /// bound on a graceful half-close.
    pub operation_timeout: Duration,
    /// Heartbeat rates we ask for during the handshake.
    pub heartbeat: Heartbeat,
    /// Slack added to the negotiated read rate before the peer is declared
    /// dead.
    pub delay_tolerance: Duration,
    pub read_limits: ReadLimits,
    pub write_limits: WriteLimits,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(3000),
            heartbeat: Heartbeat::default(),
            delay_tolerance: Duration::from_millis(400),
            read_limits: ReadLimits::default(),
            write_limits: WriteLimits::default(),
        }
    }
}

impl TransportLimits {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_delay_tolerance(mut self, tolerance: Duration) -> Self {
        self.delay_tolerance = tolerance;
        self
    }

    pub fn with_read_limits(mut self, limits: ReadLimits) -> Self {
        self.read_limits = limits;
        self
    }

    pub fn with_write_limits(mut self, limits: WriteLimits) -> Self {
        self.write_limits = limits;
        self
    }
}

/// Frame transport over any [`TransportStream`], with heartbeats.
///
/// The first failure on the stream is kept. Every later read or write
/// returns that same error without touching the stream.
pub struct StandardTransport<S: TransportStream> {
    shared: Arc<Shared<S>>,
}

struct Shared<S> {
    stream: Arc<S>,
    reader: Arc<ByteReader>,
    limits: TransportLimits,
    session_started: AtomicBool,
    closed: AtomicBool,
    stream_error: Mutex<Option<StompError>>,
    /// Held for the whole of a frame write so heartbeats never land inside
    /// a frame.
    write_lock: tokio::sync::Mutex<()>,
    monitors: CancellationToken,
}

impl<S: TransportStream> StandardTransport<S> {
    pub fn new(stream: S, limits: TransportLimits) -> Self {
        Self::with_session_state(stream, limits, false)
    }

    /// Transport for a stream whose session is already established, so
    /// blank lines between frames are tolerated from the start.
    pub fn new_started(stream: S, limits: TransportLimits) -> Self {
        Self::with_session_state(stream, limits, true)
    }

    fn with_session_state(stream: S, limits: TransportLimits, started: bool) -> Self {
        let stream = Arc::new(stream);
        let source = stream::unfold(stream.clone(), |stream| async move {
            match stream.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), stream)),
                Ok(None) => None,
                Err(err) => Some((Err(err), stream)),
            }
        });

        Self {
            shared: Arc::new(Shared {
                stream,
                reader: Arc::new(ByteReader::new(source)),
                limits,
                session_started: AtomicBool::new(started),
                closed: AtomicBool::new(false),
                stream_error: Mutex::new(None),
                write_lock: tokio::sync::Mutex::new(()),
                monitors: CancellationToken::new(),
            }),
        }
    }

    pub fn limits(&self) -> &TransportLimits {
        &self.shared.limits
    }

    /// The underlying byte stream.
    pub fn stream(&self) -> &S {
        &self.shared.stream
    }

    /// The failure that broke the stream, if any.
    pub fn stream_error(&self) -> Option<StompError> {
        self.shared.stream_error.lock().clone()
    }
}

impl<S: TransportStream> Shared<S> {
    fn check(&self) -> Result<()> {
        if let Some(err) = self.stream_error.lock().clone() {
            return Err(err);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StompError::transport("transport closed"));
        }
        Ok(())
    }

    /// Record `err` unless a failure is already stored, tear the stream down
    /// and return the stored failure.
    fn fail(&self, err: StompError) -> StompError {
        let stored = self.stream_error.lock().get_or_insert(err).clone();
        self.monitors.cancel();
        self.stream.close();
        stored
    }

    /// Body stream whose errors also break the transport.
    fn guard_body(self: &Arc<Self>, body: FrameBody) -> FrameBody {
        let shared = self.clone();
        FrameBody::from_stream(body.map_err(move |err| shared.fail(err)))
    }

    fn negotiate(&self, headers: &Headers) -> Result<(Option<Duration>, Option<Duration>), FrameError> {
        let Some(value) = headers.get("heart-beat") else {
            return Ok((None, None));
        };
        let (peer_out, peer_in) = parse_heartbeat_header(value)?;
        let local = self.limits.heartbeat;
        Ok(negotiate_heartbeats(
            u64::from(local.send_ms),
            u64::from(local.receive_ms),
            peer_out,
            peer_in,
        ))
    }

    fn monitor(self: &Arc<Self>, write: Option<Duration>, read: Option<Duration>) {
        debug!(?write, ?read, "negotiated heartbeats");
        if let Some(period) = write {
            self.monitor_write_rate(period);
        }
        if let Some(period) = read {
            self.monitor_read_rate(period + self.limits.delay_tolerance);
        }
    }

    fn monitor_write_rate(self: &Arc<Self>, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.monitors.clone();
        let mut last = self.stream.bytes_written();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let Some(shared) = weak.upgrade() else {
                    return;
                };

                let mut written = shared.stream.bytes_written();
                if written == last {
                    // a frame write in progress counts as activity
                    if let Ok(_guard) = shared.write_lock.try_lock() {
                        trace!("sending heartbeat");
                        if let Err(err) = shared.stream.write(Bytes::from_static(b"\n")).await {
                            shared.fail(err.into());
                            return;
                        }
                        written = shared.stream.bytes_written();
                    }
                }
                last = written;
            }
        });
    }

    fn monitor_read_rate(self: &Arc<Self>, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.monitors.clone();
        let mut last = self.stream.bytes_read();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let Some(shared) = weak.upgrade() else {
                    return;
                };

                let read = shared.stream.bytes_read();
                if read == last {
                    warn!(?period, "no data received from peer, closing transport");
                    shared.fail(StompError::transport("session timeout"));
                    return;
                }
                last = read;
            }
        });
    }
}

#[async_trait]
impl<S: TransportStream> ChunkWriter for Shared<S> {
    async fn write(&self, chunk: Bytes) -> io::Result<()> {
        self.stream.write(chunk).await
    }
}

#[async_trait]
impl<S: TransportStream> Transport for StandardTransport<S> {
    fn receipt_timeout(&self, frame: &Frame) -> ReceiptTimeout {
        match frame.command.as_str() {
            DISCONNECT | UNSUBSCRIBE => ReceiptTimeout::After(self.shared.limits.operation_timeout),
            _ => ReceiptTimeout::NotRequested,
        }
    }

    async fn read_frame(&self, version: ProtocolVersion) -> Result<Frame> {
        let shared = &self.shared;
        shared.check()?;

        let params = ReadParams {
            limits: shared.limits.read_limits.clone(),
            ignore_leading_empty_lines: shared.session_started.load(Ordering::SeqCst),
            protocol_version: version,
        };

        let frame = match parser::read_frame(&shared.reader, &params).await {
            Ok(frame) => frame,
            Err(err) => return Err(shared.fail(err.into())),
        };
        let (command, headers, body) = frame.into_parts();
        trace!(%command, "read frame");

        if command == CONNECTED && !shared.session_started.swap(true, Ordering::SeqCst) {
            match shared.negotiate(&headers) {
                Ok((write, read)) => shared.monitor(write, read),
                Err(err) => return Err(shared.fail(err.into())),
            }
        }

        Ok(Frame::with_parts(command, headers, shared.guard_body(body)))
    }

    async fn write_frame(&self, mut frame: Frame, version: ProtocolVersion) -> Result<()> {
        let shared = &self.shared;
        shared.check()?;

        let mut negotiated = None;

        match frame.command.as_str() {
            CONNECT => {
                if shared.session_started.load(Ordering::SeqCst) {
                    return Err(StompError::operation("session already started"));
                }
                frame.headers = frame.headers.filter(|name, _| name != "heart-beat");
                let heartbeat = shared.limits.heartbeat;
                if !heartbeat.is_disabled() {
                    frame.headers.append("heart-beat", heartbeat.to_string());
                }
            }
            CONNECTED => {
                if shared.session_started.swap(true, Ordering::SeqCst) {
                    return Err(StompError::operation("session already started"));
                }
                let (write, read) = match shared.negotiate(&frame.headers) {
                    Ok(rates) => rates,
                    Err(err) => return Err(shared.fail(err.into())),
                };
                let millis = |rate: Option<Duration>| rate.map_or(0, |d| d.as_millis());
                let heartbeat = Headers::new().with("heart-beat", format!("{},{}", millis(write), millis(read)));
                frame.headers = Headers::merge(&[&frame.headers, &heartbeat]);
                negotiated = Some((write, read));
            }
            _ => {}
        }

        let params = WriteParams {
            limits: shared.limits.write_limits.clone(),
            protocol_version: version,
        };

        trace!(command = %frame.command, "write frame");
        let result = {
            let _guard = shared.write_lock.lock().await;
            codec::write_frame(frame, shared.as_ref(), &params).await
        };

        match result {
            Ok(()) => {
                if let Some((write, read)) = negotiated {
                    shared.monitor(write, read);
                }
                Ok(())
            }
            Err(err) => Err(shared.fail(err)),
        }
    }

    async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.monitors.cancel();

        let failed = shared.stream_error.lock().is_some();
        if !failed {
            match time::timeout(shared.limits.operation_timeout, shared.stream.write_end()).await {
                Ok(Err(err)) => debug!(%err, "half-close failed"),
                Err(_) => debug!("half-close timed out"),
                Ok(Ok(())) => {}
            }
        }
        shared.stream.close();
    }
}

impl<S: TransportStream> Drop for StandardTransport<S> {
    fn drop(&mut self) {
        self.shared.monitors.cancel();
    }
}
