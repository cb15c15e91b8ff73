//! Frame deserialization.
//!
//! `read_frame` returns as soon as the command and header lines are parsed.
//! The body is handed back as a lazy stream that pulls from the same reader,
//! so it must be consumed before the next frame is read.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream;

use crate::body::FrameBody;
use crate::error::{FrameError, Result, StompError};
use crate::frame::{Frame, ProtocolVersion};
use crate::header::Headers;
use crate::reader::ByteReader;

/// Size limits applied while reading a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLimits {
    /// Maximum number of header lines in one frame.
    pub max_header_lines: usize,
    /// Maximum byte length of the command line or a header line.
    pub max_line_length: usize,
    /// Maximum byte length of a frame body.
    pub max_body_length: usize,
    /// Maximum byte length of one body chunk pulled from the stream.
    pub max_body_chunk_length: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_header_lines: 128,
            max_line_length: 8000,
            max_body_length: usize::MAX,
            max_body_chunk_length: 16384,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadParams {
    pub limits: ReadLimits,
    /// Skip blank lines before the command (the LF some peers send after a
    /// frame's NUL, and heartbeats).
    pub ignore_leading_empty_lines: bool,
    pub protocol_version: ProtocolVersion,
}

/// Read one frame head from `reader`; the body streams lazily.
pub async fn read_frame(reader: &Arc<ByteReader>, params: &ReadParams) -> Result<Frame, FrameError> {
    let command = read_command(reader, params).await?;
    let headers = read_header_lines(reader, params).await?;

    let body = match headers.get("content-length") {
        Some(value) => {
            let length = parse_content_length(value)?;
            fixed_size_body(reader.clone(), length, &params.limits)
        }
        None => dynamic_size_body(reader.clone(), &params.limits),
    };

    Ok(Frame::with_parts(command, headers, body))
}

async fn read_command(reader: &ByteReader, params: &ReadParams) -> Result<String, FrameError> {
    loop {
        let line = reader.read_line(params.limits.max_line_length).await?;
        if !line.is_empty() {
            return decode_utf8(line);
        }
        if !params.ignore_leading_empty_lines {
            return Err(FrameError::MalformedFrame);
        }
    }
}

async fn read_header_lines(reader: &ByteReader, params: &ReadParams) -> Result<Headers, FrameError> {
    let mut headers = Headers::new();

    for _ in 0..=params.limits.max_header_lines {
        let line = reader.read_line(params.limits.max_line_length).await?;
        if line.is_empty() {
            return Ok(headers);
        }

        let line = decode_utf8(line)?;
        let Some((name, value)) = line.split_once(':') else {
            return Err(FrameError::HeaderParse(line));
        };

        headers.append(
            decode_value(name, params.protocol_version),
            decode_value(value, params.protocol_version),
        );
    }

    Err(FrameError::MaximumHeaderLinesExceeded)
}

pub(crate) fn parse_content_length(value: &str) -> Result<usize, FrameError> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::InvalidContentLength);
    }
    value.parse().map_err(|_| FrameError::InvalidContentLength)
}

fn decode_utf8(line: Bytes) -> Result<String, FrameError> {
    String::from_utf8(line.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

/// Undo header escaping for `version`. Unknown escape sequences are kept
/// as they appear on the wire.
pub fn decode_value(value: &str, version: ProtocolVersion) -> String {
    if version == ProtocolVersion::V1_0 || !value.contains('\\') {
        return value.to_string();
    }

    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('c') => result.push(':'),
            Some('\\') => result.push('\\'),
            Some('r') if version == ProtocolVersion::V1_2 => result.push('\r'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

struct FixedBody {
    reader: Arc<ByteReader>,
    remaining: usize,
    chunk_length: usize,
    done: bool,
}

fn fixed_size_body(reader: Arc<ByteReader>, length: usize, limits: &ReadLimits) -> FrameBody {
    if length > limits.max_body_length {
        return FrameBody::failed(FrameError::FrameBodyTooLarge.into());
    }

    let state = FixedBody {
        reader,
        remaining: length,
        chunk_length: limits.max_body_chunk_length.max(1),
        done: false,
    };

    FrameBody::from_stream(stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        if state.remaining > 0 {
            let max = state.remaining.min(state.chunk_length);
            return match state.reader.read_range(1, max).await {
                Ok(chunk) => {
                    state.remaining -= chunk.len();
                    Some((Ok(chunk), state))
                }
                Err(err) => {
                    state.done = true;
                    Some((Err(StompError::from(err)), state))
                }
            };
        }

        state.done = true;
        match state.reader.read(1).await {
            Ok(end) if end[0] == 0 => None,
            Ok(_) => Some((Err(FrameError::ExpectedNullByte.into()), state)),
            Err(err) => Some((Err(err.into()), state)),
        }
    }))
}

struct DynamicBody {
    reader: Arc<ByteReader>,
    total: usize,
    max_length: usize,
    chunk_length: usize,
    done: bool,
}

fn dynamic_size_body(reader: Arc<ByteReader>, limits: &ReadLimits) -> FrameBody {
    let state = DynamicBody {
        reader,
        total: 0,
        max_length: limits.max_body_length,
        chunk_length: limits.max_body_chunk_length.max(1),
        done: false,
    };

    FrameBody::from_stream(stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            let mut chunk = match state.reader.read_until(0, state.chunk_length).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    state.done = true;
                    return Some((Err(err.into()), state));
                }
            };

            let ended = chunk.last() == Some(&0);
            if ended {
                chunk.truncate(chunk.len() - 1);
                state.done = true;
            }

            state.total = state.total.saturating_add(chunk.len());
            if state.total > state.max_length {
                state.done = true;
                return Some((Err(FrameError::FrameBodyTooLarge.into()), state));
            }

            if !chunk.is_empty() {
                return Some((Ok(chunk), state));
            }
        }
    }))
}
