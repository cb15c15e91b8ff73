//! Buffered byte reader used to deserialize frames.
//!
//! The reader pulls chunks from a byte source on demand and keeps any bytes
//! it did not hand out for the next call. Only one read may be outstanding at
//! a time; a concurrent call fails with `OperationAlreadyRunning` instead of
//! queueing.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::FrameError;

pub struct ByteReader {
    state: Mutex<ReaderState>,
}

struct ReaderState {
    source: BoxStream<'static, io::Result<Bytes>>,
    buffer: BytesMut,
    ended: bool,
}

impl ReaderState {
    /// Pull one more chunk into the buffer. Returns `false` once the source
    /// has ended; the source is not polled again after that.
    async fn fill(&mut self) -> Result<bool, FrameError> {
        if self.ended {
            return Ok(false);
        }
        match self.source.next().await {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            Some(Err(err)) => Err(err.into()),
            None => {
                self.ended = true;
                Ok(false)
            }
        }
    }

    fn take(&mut self, n: usize) -> Bytes {
        self.buffer.split_to(n).freeze()
    }
}

impl ByteReader {
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            state: Mutex::new(ReaderState {
                source: source.boxed(),
                buffer: BytesMut::new(),
                ended: false,
            }),
        }
    }

    fn begin(&self) -> Result<MutexGuard<'_, ReaderState>, FrameError> {
        self.state
            .try_lock()
            .map_err(|_| FrameError::OperationAlreadyRunning)
    }

    /// Read exactly `n` bytes.
    pub async fn read(&self, n: usize) -> Result<Bytes, FrameError> {
        if n < 1 {
            return Err(FrameError::InvalidArgument("read length must be at least 1"));
        }
        let mut state = self.begin()?;
        loop {
            if state.buffer.len() >= n {
                return Ok(state.take(n));
            }
            if !state.fill().await? {
                return Err(FrameError::EndOfStream);
            }
        }
    }

    /// Read at least `min` and at most `max` bytes, completing as soon as
    /// `min` bytes are buffered.
    pub async fn read_range(&self, min: usize, max: usize) -> Result<Bytes, FrameError> {
        if min < 1 {
            return Err(FrameError::InvalidArgument("minimum read length must be at least 1"));
        }
        if max < min {
            return Err(FrameError::InvalidArgument("maximum read length is below the minimum"));
        }
        let mut state = self.begin()?;
        loop {
            if state.buffer.len() >= min {
                let n = state.buffer.len().min(max);
                return Ok(state.take(n));
            }
            if !state.fill().await? {
                return Err(FrameError::EndOfStream);
            }
        }
    }

    /// Read one line, excluding its `\n` terminator and a `\r` directly
    /// before it.
    pub async fn read_line(&self, max_length: usize) -> Result<Bytes, FrameError> {
        let mut state = self.begin()?;
        let mut scanned = 0;
        loop {
            if let Some(offset) = state.buffer[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + offset;
                let mut line = state.take(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                if line.len() > max_length {
                    return Err(FrameError::LineTooLong);
                }
                return Ok(line);
            }

            scanned = state.buffer.len();

            // room for the content plus a trailing CR
            if scanned.saturating_sub(1) > max_length {
                return Err(FrameError::LineTooLong);
            }

            if !state.fill().await? {
                return Err(FrameError::EndOfStream);
            }
        }
    }

    /// Read up to and including the first `delimiter`, or exactly
    /// `max_length` bytes when the delimiter does not occur within that
    /// bound. Callers tell the two apart by the last byte.
    pub async fn read_until(&self, delimiter: u8, max_length: usize) -> Result<Bytes, FrameError> {
        if max_length < 1 {
            return Err(FrameError::InvalidArgument("maximum read length must be at least 1"));
        }
        let mut state = self.begin()?;
        let mut scanned = 0;
        loop {
            let window = state.buffer.len().min(max_length);
            if let Some(offset) = state.buffer[scanned..window]
                .iter()
                .position(|b| *b == delimiter)
            {
                return Ok(state.take(scanned + offset + 1));
            }
            if window == max_length {
                return Ok(state.take(max_length));
            }
            scanned = window;
            if !state.fill().await? {
                return Err(FrameError::EndOfStream);
            }
        }
    }
}
