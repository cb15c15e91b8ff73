use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::header::Headers;

/// Crate-wide result alias.
pub type Result<T, E = StompError> = std::result::Result<T, E>;

/// Classification of every failure a session operation can report.
///
/// Callers should branch on the kind rather than on the message text. The
/// cancelled and timed-out outcomes are ordinary error kinds so every public
/// operation resolves to a single `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation was withdrawn before it completed (explicit shutdown,
    /// superseded receive, unsubscribe).
    OperationCancelled,
    /// A receipt did not arrive within the requested time.
    OperationTimeout,
    /// The caller misused an operation.
    OperationError,
    /// The session had already been torn down.
    SessionClosed,
    /// The server answered with an ERROR frame.
    ServerError,
    /// The peer broke the protocol.
    ProtocolViolation,
    /// The byte stream underneath the session failed.
    TransportFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::OperationCancelled => "OperationCancelled",
            ErrorKind::OperationTimeout => "OperationTimeout",
            ErrorKind::OperationError => "OperationError",
            ErrorKind::SessionClosed => "SessionClosed",
            ErrorKind::ServerError => "ServerError",
            ErrorKind::ProtocolViolation => "ProtocolViolation",
            ErrorKind::TransportFailure => "TransportFailure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the byte reader and the frame codec.
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    #[error("unexpected end of stream")]
    EndOfStream,

    #[error("maximum line length exceeded")]
    LineTooLong,

    #[error("read operation already running")]
    OperationAlreadyRunning,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("malformed frame expected command line")]
    MalformedFrame,

    #[error("header parse error {0}")]
    HeaderParse(String),

    #[error("maximum header lines exceeded")]
    MaximumHeaderLinesExceeded,

    #[error("frame body too large")]
    FrameBodyTooLarge,

    #[error("expected null byte")]
    ExpectedNullByte,

    #[error("invalid content-length header")]
    InvalidContentLength,

    #[error("incorrect content-length header")]
    IncorrectContentLength,

    #[error("invalid heart-beat header")]
    InvalidHeartbeatHeader,

    #[error("invalid utf-8 in frame head")]
    InvalidUtf8,

    /// A header required by the frame's command is absent or empty.
    #[error("missing {0} header")]
    MissingHeader(String),

    #[error("io error: {0}")]
    Io(Arc<io::Error>),
}

impl FrameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FrameError::OperationAlreadyRunning
            | FrameError::InvalidArgument(_)
            | FrameError::MissingHeader(_)
            | FrameError::InvalidContentLength
            | FrameError::IncorrectContentLength => ErrorKind::OperationError,
            FrameError::EndOfStream | FrameError::Io(_) => ErrorKind::TransportFailure,
            _ => ErrorKind::ProtocolViolation,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Io(Arc::new(err))
    }
}

/// An ERROR frame loaded into memory.
#[derive(Debug, Clone)]
pub struct ServerError {
    message: String,
    headers: Headers,
    body: String,
}

impl ServerError {
    pub fn new(message: impl Into<String>, headers: Headers, body: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            headers,
            body: body.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Headers of the ERROR frame as received.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body of the ERROR frame decoded as text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The `receipt-id` the server attached, if the error answers a
    /// receipted frame.
    pub fn receipt_id(&self) -> Option<&str> {
        self.headers.get("receipt-id")
    }
}

/// The failure outcome of a session, transport or handshake operation.
///
/// `StompError` is cheap to clone so a single connection failure can be
/// reported to every pending operation.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct StompError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<FrameError>,
    server: Option<Arc<ServerError>>,
}

impl StompError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            server: None,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationCancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationTimeout, message)
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationError, message)
    }

    pub fn session_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionClosed, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolViolation, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, message)
    }

    pub fn server(error: ServerError) -> Self {
        Self {
            kind: ErrorKind::ServerError,
            message: error.message.clone(),
            cause: None,
            server: Some(Arc::new(error)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The codec or reader error this failure was raised from, if any.
    pub fn frame_error(&self) -> Option<&FrameError> {
        self.cause.as_ref()
    }

    /// The ERROR frame content for `ServerError` failures.
    pub fn server_error(&self) -> Option<&ServerError> {
        self.server.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::OperationCancelled
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::OperationTimeout
    }
}

impl From<FrameError> for StompError {
    fn from(err: FrameError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            cause: Some(err),
            server: None,
        }
    }
}

impl From<io::Error> for StompError {
    fn from(err: io::Error) -> Self {
        FrameError::from(err).into()
    }
}
