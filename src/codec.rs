use std::io;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;

use crate::error::{FrameError, Result};
use crate::frame::{Frame, ProtocolVersion, has_empty_body};
use crate::parser::parse_content_length;

const TRAILER: &[u8] = b"\0\n";

/// Destination for serialized frame bytes.
#[async_trait]
pub trait ChunkWriter: Send + Sync {
    async fn write(&self, chunk: Bytes) -> io::Result<()>;
}

/// Limits applied while writing a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLimits {
    /// Frames whose serialized size is known and fits in this many bytes are
    /// written with a single call.
    pub buffer_size: usize,
}

impl Default for WriteLimits {
    fn default() -> Self {
        Self { buffer_size: 16384 }
    }
}

#[derive(Debug, Clone)]
pub struct WriteParams {
    pub limits: WriteLimits,
    pub protocol_version: ProtocolVersion,
}

/// Serialize `frame` onto `writer`.
///
/// The header is always built in memory. When the body length is known up
/// front (from `content-length`, or because the command never carries a
/// body) and the whole frame fits in `buffer_size`, header, body and trailer
/// are coalesced into one write. Otherwise the header, every body chunk and
/// the `NUL LF` trailer are written one after another.
///
/// A `content-length` header must hold a non-negative integer and must match
/// the streamed body length exactly.
pub async fn write_frame<W>(frame: Frame, writer: &W, params: &WriteParams) -> Result<()>
where
    W: ChunkWriter + ?Sized,
{
    let (command, headers, mut body) = frame.into_parts();

    let mut expected_length = if has_empty_body(&command) { Some(0) } else { None };

    let mut head = BytesMut::with_capacity(params.limits.buffer_size.min(4096));
    head.put_slice(command.as_bytes());
    head.put_u8(b'\n');

    for (name, value) in &headers {
        if name == "content-length" {
            expected_length = Some(parse_content_length(value)?);
        }
        head.put_slice(encode_value(name, params.protocol_version).as_bytes());
        head.put_u8(b':');
        head.put_slice(encode_value(value, params.protocol_version).as_bytes());
        head.put_u8(b'\n');
    }
    head.put_u8(b'\n');

    let coalesce = expected_length
        .is_some_and(|length| head.len().saturating_add(length).saturating_add(2) <= params.limits.buffer_size);

    if coalesce {
        let expected = expected_length.unwrap_or_default();
        let mut length = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            length += chunk.len();
            if length > expected {
                return Err(FrameError::IncorrectContentLength.into());
            }
            head.put_slice(&chunk);
        }
        if length != expected {
            return Err(FrameError::IncorrectContentLength.into());
        }
        head.put_slice(TRAILER);
        writer.write(head.freeze()).await?;
        return Ok(());
    }

    writer.write(head.freeze()).await?;

    let mut length = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        length += chunk.len();
        if expected_length.is_some_and(|expected| length > expected) {
            return Err(FrameError::IncorrectContentLength.into());
        }
        if !chunk.is_empty() {
            writer.write(chunk).await?;
        }
    }
    if expected_length.is_some_and(|expected| length != expected) {
        return Err(FrameError::IncorrectContentLength.into());
    }

    writer.write(Bytes::from_static(TRAILER)).await?;
    Ok(())
}

/// Escape a header name or value for `version`.
///
/// - 1.0: written verbatim
/// - 1.1: backslash, LF and colon
/// - 1.2: additionally CR
pub fn encode_value(value: &str, version: ProtocolVersion) -> String {
    if version == ProtocolVersion::V1_0 {
        return value.to_string();
    }

    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            '\r' if version == ProtocolVersion::V1_2 => result.push_str("\\r"),
            _ => result.push(ch),
        }
    }
    result
}
