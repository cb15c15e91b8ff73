use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, Notify};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::transport::{StandardTransport, TransportLimits, TransportStream};

/// Unread bytes buffered ahead of the consumer before the reader is paused.
pub const READ_AHEAD_LIMIT: usize = 64 * 1024;

/// [`TransportStream`] over a tokio reader and writer pair, such as the two
/// halves of a `TcpStream` or a TLS stream split with `tokio::io::split`.
///
/// From the first `read` on, a background task keeps pulling from the reader
/// so `bytes_read` reflects traffic the consumer has not asked for yet, like
/// heartbeats arriving while no frame is awaited. Unread input is coalesced
/// and the task only pauses once [`READ_AHEAD_LIMIT`] bytes are waiting.
pub struct IoStream<R, W> {
    source: parking_lot::Mutex<Option<R>>,
    ahead: Arc<ReadAhead>,
    writer: Mutex<Option<W>>,
    bytes_read: Arc<AtomicU64>,
    bytes_written: AtomicU64,
    closed: CancellationToken,
}

/// Input read from the source but not yet handed to the consumer.
struct ReadAhead {
    backlog: parking_lot::Mutex<Backlog>,
    /// Signalled when data, an error or the end is added.
    filled: Notify,
    /// Signalled when the consumer takes the backlog.
    drained: Notify,
}

#[derive(Default)]
struct Backlog {
    buffer: BytesMut,
    error: Option<io::Error>,
    ended: bool,
}

impl<R, W> IoStream<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            source: parking_lot::Mutex::new(Some(reader)),
            ahead: Arc::new(ReadAhead {
                backlog: parking_lot::Mutex::new(Backlog::default()),
                filled: Notify::new(),
                drained: Notify::new(),
            }),
            writer: Mutex::new(Some(writer)),
            bytes_read: Arc::new(AtomicU64::new(0)),
            bytes_written: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn spawn_read_ahead(&self, reader: R) {
        let ahead = self.ahead.clone();
        let counter = self.bytes_read.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let mut chunks = ReaderStream::new(reader);
            loop {
                while ahead.backlog.lock().buffer.len() >= READ_AHEAD_LIMIT {
                    tokio::select! {
                        _ = closed.cancelled() => return,
                        _ = ahead.drained.notified() => {}
                    }
                }

                let next = tokio::select! {
                    _ = closed.cancelled() => return,
                    next = chunks.next() => next,
                };

                let ended = {
                    let mut backlog = ahead.backlog.lock();
                    match next {
                        Some(Ok(chunk)) => {
                            counter.fetch_add(chunk.len() as u64, Ordering::SeqCst);
                            backlog.buffer.extend_from_slice(&chunk);
                        }
                        Some(Err(err)) => {
                            backlog.error = Some(err);
                            backlog.ended = true;
                        }
                        None => backlog.ended = true,
                    }
                    backlog.ended
                };
                ahead.filled.notify_one();
                if ended {
                    return;
                }
            }
        });
    }

    /// Everything buffered so far, the pending error, or the end of input.
    /// `None` means nothing is ready yet.
    fn take_ready(&self) -> Option<io::Result<Option<Bytes>>> {
        let mut backlog = self.ahead.backlog.lock();
        if !backlog.buffer.is_empty() {
            let chunk = backlog.buffer.split().freeze();
            drop(backlog);
            self.ahead.drained.notify_one();
            return Some(Ok(Some(chunk)));
        }
        if let Some(err) = backlog.error.take() {
            return Some(Err(err));
        }
        backlog.ended.then_some(Ok(None))
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "stream closed")
}

#[async_trait]
impl<R, W> TransportStream for IoStream<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&self) -> io::Result<Option<Bytes>> {
        if self.is_closed() {
            return Ok(None);
        }
        let source = self.source.lock().take();
        if let Some(reader) = source {
            self.spawn_read_ahead(reader);
        }

        loop {
            if let Some(ready) = self.take_ready() {
                return ready;
            }
            tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                _ = self.ahead.filled.notified() => {}
            }
        }
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    async fn write(&self, chunk: Bytes) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(closed_error)?;
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        self.bytes_written
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn write_end(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    fn close(&self) {
        self.closed.cancel();
        // a write in flight keeps the half until it finishes
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }
}

/// Byte stream over a TCP connection.
pub type TcpTransportStream = IoStream<OwnedReadHalf, OwnedWriteHalf>;

/// Open a TCP connection and wrap it in a [`StandardTransport`].
pub async fn tcp_connect<A: ToSocketAddrs>(
    addr: A,
    limits: TransportLimits,
) -> io::Result<StandardTransport<TcpTransportStream>> {
    let socket = TcpStream::connect(addr).await?;
    socket.set_nodelay(true)?;
    let (reader, writer) = socket.into_split();
    Ok(StandardTransport::new(IoStream::new(reader, writer), limits))
}
