use crate::frame::AckMode;
use crate::header::Headers;

/// A server-side resource opened through a session.
pub trait Resource {
    /// Session-unique identifier.
    fn id(&self) -> &str;

    /// Headers of the frame that opened the resource.
    fn headers(&self) -> &Headers;
}

/// An open subscription, returned by `ClientSession::subscribe`.
///
/// Remains valid until unsubscribed or until the session shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: String,
    headers: Headers,
}

impl Subscription {
    pub fn new(id: impl Into<String>, headers: Headers) -> Self {
        Self {
            id: id.into(),
            headers,
        }
    }

    /// Refer to a subscription opened elsewhere, e.g. on a session created
    /// over an already established connection.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let headers = Headers::new().with("id", id.clone());
        Self::new(id, headers)
    }

    pub fn destination(&self) -> Option<&str> {
        self.headers.get("destination")
    }

    pub fn ack_mode(&self) -> AckMode {
        self.headers
            .get("ack")
            .and_then(|mode| mode.parse().ok())
            .unwrap_or_default()
    }
}

impl Resource for Subscription {
    fn id(&self) -> &str {
        &self.id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// A transaction started with `ClientSession::begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: String,
    headers: Headers,
}

impl Transaction {
    pub fn new(id: impl Into<String>, headers: Headers) -> Self {
        Self {
            id: id.into(),
            headers,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let headers = Headers::new().with("transaction", id.clone());
        Self::new(id, headers)
    }
}

impl Resource for Transaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}
