use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::body::FrameBody;
use crate::error::FrameError;
use crate::header::Headers;

pub const CONNECT: &str = "CONNECT";
pub const CONNECTED: &str = "CONNECTED";
pub const SEND: &str = "SEND";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";
pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ABORT: &str = "ABORT";
pub const DISCONNECT: &str = "DISCONNECT";
pub const MESSAGE: &str = "MESSAGE";
pub const RECEIPT: &str = "RECEIPT";
pub const ERROR: &str = "ERROR";

/// A STOMP frame: command, ordered headers and a lazily streamed body.
///
/// The body is consumed at most once. Frames are therefore not `Clone`;
/// callers that need the payload again should read it into memory with
/// [`FrameBody::read_to_end`].
#[derive(Debug)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: String,
    /// Header lines, names lowercased
    pub headers: Headers,
    /// Unread (inbound) or unwritten (outbound) body
    pub body: FrameBody,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    ///
    /// Parameters
    /// - `command`: the STOMP command name (for example, `"SEND"` or
    ///   `"SUBSCRIBE"`). Accepts any type convertible into `String`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: FrameBody::empty(),
        }
    }

    /// Create a frame from already-built parts.
    pub fn with_parts(command: impl Into<String>, headers: Headers, body: FrameBody) -> Self {
        Self {
            command: command.into(),
            headers,
            body,
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`, stored lowercased).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Set the frame body (builder style).
    ///
    /// Parameters
    /// - `body`: raw body bytes. Accepts any type convertible into `Bytes`.
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn set_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = FrameBody::from_bytes(body);
        self
    }

    /// Replace the body with a stream of chunks (builder style).
    pub fn set_body_stream(mut self, body: FrameBody) -> Self {
        self.body = body;
        self
    }

    /// Request a receipt for this frame (builder style).
    ///
    /// Frames sent through a session get their receipt id assigned
    /// automatically; this is for writing frames directly to a transport.
    pub fn receipt(self, id: impl Into<String>) -> Self {
        self.header("receipt", id)
    }

    /// Get the first value of a header (case-insensitive).
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Check the headers the frame's command cannot be sent without.
    pub fn validate_required_headers(&self) -> Result<(), FrameError> {
        self.headers.required(required_headers(&self.command))
    }

    /// Split off the body, leaving the command and headers.
    pub fn into_parts(self) -> (String, Headers, FrameBody) {
        (self.command, self.headers, self.body)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        match self.headers.get("content-length") {
            Some(length) => writeln!(f, "Body ({} bytes)", length),
            None => writeln!(f, "Body (streamed)"),
        }
    }
}

/// Headers a client frame must carry for its command.
pub fn required_headers(command: &str) -> &'static [&'static str] {
    match command {
        SEND => &["destination"],
        SUBSCRIBE => &["destination", "id"],
        UNSUBSCRIBE | ACK | NACK => &["id"],
        BEGIN | COMMIT => &["transaction"],
        _ => &[],
    }
}

/// Commands whose frames never carry a body.
pub fn has_empty_body(command: &str) -> bool {
    matches!(
        command,
        RECEIPT
            | CONNECT
            | CONNECTED
            | SUBSCRIBE
            | UNSUBSCRIBE
            | ACK
            | NACK
            | BEGIN
            | COMMIT
            | ABORT
            | DISCONNECT
    )
}

/// Protocol versions spoken by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
            ProtocolVersion::V1_2 => "1.2",
        }
    }

    /// Every version offered in a CONNECT frame, lowest first.
    pub fn accepted() -> [ProtocolVersion; 3] {
        [
            ProtocolVersion::V1_0,
            ProtocolVersion::V1_1,
            ProtocolVersion::V1_2,
        ]
    }

    /// Value of the `accept-version` header.
    pub fn accept_version_header() -> String {
        Self::accepted()
            .iter()
            .map(ProtocolVersion::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse(value: &str) -> Option<ProtocolVersion> {
        Self::accepted()
            .into_iter()
            .find(|version| version.as_str() == value)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription acknowledgement modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    #[default]
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            _ => Err(FrameError::HeaderParse(format!("unknown ack mode '{value}'"))),
        }
    }
}
