use std::sync::Arc;

use tokio::net::ToSocketAddrs;
use tracing::debug;

use crate::body::FrameBody;
use crate::error::{Result, ServerError, StompError};
use crate::frame::{CONNECT, CONNECTED, ERROR, Frame, ProtocolVersion};
use crate::header::Headers;
use crate::session::ClientSession;
use crate::stream::tcp_connect;
use crate::transport::{Transport, TransportLimits};

const ERROR_BODY_MAX_LENGTH: usize = 4096;
const ERROR_DEFAULT_MESSAGE: &str = "server error response";

/// Headers for the CONNECT frame.
///
/// `accept-version` is always set by the handshake and heartbeats belong to
/// the transport's [`TransportLimits`], so neither is configured here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Virtual host (`host` header).
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Client id for brokers that key durable subscriptions on it.
    pub client_id: Option<String>,
    /// Additional CONNECT headers, in order.
    pub headers: Vec<(String, String)>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// The CONNECT header collection these options describe.
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();
        let named = [
            ("host", &self.host),
            ("login", &self.login),
            ("passcode", &self.passcode),
            ("client-id", &self.client_id),
        ];
        for (name, value) in named {
            if let Some(value) = value {
                headers.append(name, value.as_str());
            }
        }
        for (name, value) in &self.headers {
            headers.append(name.as_str(), value.as_str());
        }
        headers
    }
}

/// Perform the CONNECT/CONNECTED handshake over `transport`.
///
/// The CONNECT frame offers every supported protocol version and never
/// carries a caller `heart-beat` header. The reply is read at version 1.0.
/// On any failure the transport is closed before the error is returned.
///
/// Returns a session bound to the version named by the server.
pub async fn connect(transport: Arc<dyn Transport>, headers: Headers) -> Result<ClientSession> {
    let accept = Headers::new().with("accept-version", ProtocolVersion::accept_version_header());
    let headers = Headers::merge(&[&headers, &accept]).filter(|name, _| name != "heart-beat");

    let request = Frame::with_parts(CONNECT, headers, FrameBody::empty());

    if let Err(err) = transport.write_frame(request, ProtocolVersion::V1_0).await {
        transport.close().await;
        return Err(StompError::transport(err.message()));
    }

    match read_connected(transport.as_ref()).await {
        Ok(version) => {
            debug!(%version, "session established");
            Ok(ClientSession::new(transport, version))
        }
        Err(err) => {
            debug!(%err, "connect failed");
            transport.close().await;
            Err(err)
        }
    }
}

/// [`connect`] with headers built from `options`.
pub async fn connect_with_options(transport: Arc<dyn Transport>, options: &ConnectOptions) -> Result<ClientSession> {
    connect(transport, options.to_headers()).await
}

/// Open a TCP connection to `addr` and establish a session over it.
pub async fn connect_tcp<A: ToSocketAddrs>(
    addr: A,
    options: &ConnectOptions,
    limits: TransportLimits,
) -> Result<ClientSession> {
    let transport = tcp_connect(addr, limits)
        .await
        .map_err(|err| StompError::transport(err.to_string()))?;
    connect_with_options(Arc::new(transport), options).await
}

async fn read_connected(transport: &dyn Transport) -> Result<ProtocolVersion> {
    let response = transport.read_frame(ProtocolVersion::V1_0).await?;

    if response.command == ERROR {
        return Err(read_server_error(response).await);
    }

    if response.command != CONNECTED {
        let command: String = response.command.chars().take(31).collect();
        return Err(StompError::protocol(format!(
            "server sent {command} frame (expected CONNECTED frame)"
        )));
    }

    let version = match response.headers.get("version") {
        None => return Err(StompError::protocol("connect failed")),
        Some(value) => ProtocolVersion::parse(value)
            .ok_or_else(|| StompError::protocol("protocol version unsupported"))?,
    };

    response.body.read_empty().await?;

    Ok(version)
}

/// Load an ERROR frame into a `ServerError`.
///
/// The message combines the `message` header and, for `text/plain` bodies,
/// the body text: `server response: <message>: <body>`.
pub async fn read_server_error(frame: Frame) -> StompError {
    let (_, headers, body) = frame.into_parts();

    let mut parts: Vec<String> = Vec::new();
    if let Some(message) = headers.get("message") {
        if !message.is_empty() {
            parts.push(message.to_string());
        }
    }

    let body = match body.read_string(ERROR_BODY_MAX_LENGTH).await {
        Ok(body) => body,
        Err(_) => return StompError::transport("unable to read ERROR frame body"),
    };

    if headers.get("content-type") == Some("text/plain") {
        parts.push(body.clone());
    }

    let message = if parts.is_empty() {
        ERROR_DEFAULT_MESSAGE.to_string()
    } else {
        format!("server response: {}", parts.join(": "))
    };

    StompError::server(ServerError::new(message, headers, body))
}
