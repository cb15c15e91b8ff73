//! Async STOMP client session engine.
//!
//! Layers, bottom up:
//!
//! - [`reader`]: buffered single-flight reads over a chunked byte source.
//! - [`parser`] and [`codec`]: frame input and output with per-version
//!   header escaping and lazily streamed bodies.
//! - [`transport`]: a frame-level connection over a [`TransportStream`],
//!   with heartbeat negotiation and monitoring.
//! - [`session`]: the client state machine multiplexing sends, receipts and
//!   subscriptions over one transport.
//! - [`connect`]: the CONNECT/CONNECTED handshake producing a session.

pub mod body;
pub mod codec;
pub mod connect;
pub mod error;
pub mod frame;
pub mod header;
pub mod heartbeat;
pub mod parser;
pub mod reader;
pub mod session;
pub mod stream;
pub mod subscription;
pub mod transport;

pub use body::{BodyEnd, FrameBody};
pub use codec::WriteLimits;
pub use connect::{ConnectOptions, connect, connect_tcp, connect_with_options, read_server_error};
pub use error::{ErrorKind, FrameError, Result, ServerError, StompError};
pub use frame::{AckMode, Frame, ProtocolVersion};
pub use header::Headers;
pub use heartbeat::{Heartbeat, negotiate_heartbeats, parse_heartbeat_header};
pub use parser::ReadLimits;
pub use session::ClientSession;
pub use stream::{IoStream, tcp_connect};
pub use subscription::{Resource, Subscription, Transaction};
pub use transport::{ReceiptTimeout, StandardTransport, Transport, TransportLimits, TransportStream};
