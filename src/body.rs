//! Lazy frame bodies.
//!
//! A `FrameBody` is a finite, single-pass stream of fallible byte chunks. It
//! is consumed exactly once; polling after it has finished keeps returning
//! `None`.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::oneshot;

use crate::error::{Result, StompError};

/// How a body observed with [`FrameBody::observe_end`] stopped.
pub enum BodyEnd {
    /// Every chunk was read.
    Finished,
    /// A chunk failed; no further chunks are produced.
    Failed(StompError),
    /// The body was dropped before it was fully read. Carries the unread
    /// remainder so the owner of the byte stream can drain it.
    Abandoned(FrameBody),
}

pub struct FrameBody {
    chunks: Option<BoxStream<'static, Result<Bytes>>>,
    end: Option<oneshot::Sender<BodyEnd>>,
}

impl FrameBody {
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Single-chunk body. An empty buffer yields no chunks at all.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_stream(stream::iter([Ok(bytes)]))
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(chunks).map(Ok))
    }

    pub fn from_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            chunks: Some(chunks.boxed()),
            end: None,
        }
    }

    /// A body whose first chunk is `err`.
    pub fn failed(err: StompError) -> Self {
        Self::from_stream(stream::iter([Err(err)]))
    }

    /// Wrap the body so `BodyEnd` is reported on the returned receiver once
    /// the body finishes, fails or is dropped unread.
    pub fn observe_end(self) -> (FrameBody, oneshot::Receiver<BodyEnd>) {
        let (tx, rx) = oneshot::channel();
        let body = FrameBody {
            chunks: Some(self.boxed_chunks()),
            end: Some(tx),
        };
        (body, rx)
    }

    fn boxed_chunks(mut self) -> BoxStream<'static, Result<Bytes>> {
        if self.end.is_none() {
            if let Some(chunks) = self.chunks.take() {
                return chunks;
            }
            return stream::empty().boxed();
        }
        self.boxed()
    }

    /// Collect the whole body, failing once more than `limit` bytes arrive.
    pub async fn read_to_end(mut self, limit: usize) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            if buffer.len() + chunk.len() > limit {
                return Err(StompError::protocol(format!(
                    "body length limit exceeded ({limit} bytes)"
                )));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Collect the body as UTF-8 text.
    pub async fn read_string(self, limit: usize) -> Result<String> {
        let bytes = self.read_to_end(limit).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| StompError::protocol("body is not valid utf-8"))
    }

    /// Consume a body that is required to be empty.
    pub async fn read_empty(mut self) -> Result<()> {
        while let Some(chunk) = self.next().await {
            if !chunk?.is_empty() {
                return Err(StompError::protocol("expected empty body"));
            }
        }
        Ok(())
    }

    /// Read and discard every remaining chunk.
    pub async fn drain(mut self) -> Result<()> {
        while let Some(chunk) = self.next().await {
            chunk?;
        }
        Ok(())
    }

    fn finish(&mut self, end: BodyEnd) {
        self.chunks = None;
        if let Some(tx) = self.end.take() {
            let _ = tx.send(end);
        }
    }
}

impl Stream for FrameBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(chunks) = self.chunks.as_mut() else {
            return Poll::Ready(None);
        };

        match chunks.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                self.finish(BodyEnd::Failed(err.clone()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finish(BodyEnd::Finished);
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for FrameBody {
    fn drop(&mut self) {
        if let Some(tx) = self.end.take() {
            let rest = FrameBody {
                chunks: self.chunks.take(),
                end: None,
            };
            let _ = tx.send(BodyEnd::Abandoned(rest));
        }
    }
}

impl Default for FrameBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for FrameBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBody")
            .field("consumed", &self.chunks.is_none())
            .field("observed", &self.end.is_some())
            .finish()
    }
}

impl From<Bytes> for FrameBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for FrameBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for FrameBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for FrameBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}
