//! The CONNECT/CONNECTED handshake against a scripted TCP server.
//!
//! Each server accepts one connection, captures the CONNECT frame, writes a
//! canned reply and then waits for the client to hang up.

use std::time::Duration;

use stomp_session::{
    ConnectOptions, ErrorKind, Heartbeat, ProtocolVersion, StompError, TransportLimits, connect_tcp,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Start a server that answers the first CONNECT with `reply`. The handle
/// resolves to the CONNECT frame text.
async fn scripted_server(reply: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut reader = BufReader::new(reader);

        let mut request = Vec::new();
        reader.read_until(b'\0', &mut request).await.unwrap();

        if !reply.is_empty() {
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.flush().await.unwrap();
            // hold the connection until the client closes it
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest).await;
        }

        String::from_utf8_lossy(&request).into_owned()
    });

    (addr, server)
}

async fn connect_to(addr: &str, options: &ConnectOptions) -> Result<stomp_session::ClientSession, StompError> {
    tokio::time::timeout(
        Duration::from_secs(5),
        connect_tcp(addr, options, TransportLimits::default()),
    )
    .await
    .expect("connect timed out")
}

#[tokio::test]
async fn connect_sends_expected_headers() {
    let (addr, server) =
        scripted_server("CONNECTED\nversion:1.2\nheart-beat:0,0\nserver:mock/1.0\n\n\0").await;

    let options = ConnectOptions::new()
        .host("/")
        .login("guest")
        .passcode("guest");
    let session = connect_to(&addr, &options).await.unwrap();
    assert_eq!(session.protocol_version(), ProtocolVersion::V1_2);
    assert!(!session.is_disconnected());

    session.shutdown().await;
    let request = server.await.unwrap();

    assert!(request.starts_with("CONNECT\n"), "got {request:?}");
    assert!(request.contains("host:/\n"));
    assert!(request.contains("login:guest\n"));
    assert!(request.contains("passcode:guest\n"));
    assert!(request.contains("accept-version:1.0,1.1,1.2\n"));
    assert!(request.contains("heart-beat:0,3000\n"));
}

#[tokio::test]
async fn caller_heartbeat_header_is_replaced() {
    let (addr, server) = scripted_server("CONNECTED\nversion:1.1\n\n\0").await;

    let options = ConnectOptions::new().header("heart-beat", "1,1");
    let session = tokio::time::timeout(
        Duration::from_secs(5),
        connect_tcp(
            addr.as_str(),
            &options,
            TransportLimits::default().with_heartbeat(Heartbeat::disabled()),
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(session.protocol_version(), ProtocolVersion::V1_1);

    session.shutdown().await;
    let request = server.await.unwrap();
    assert!(!request.contains("heart-beat"), "got {request:?}");
}

#[tokio::test]
async fn connect_error_frame_returns_server_error() {
    let (addr, _server) = scripted_server(
        "ERROR\nmessage:Authentication failed\ncontent-type:text/plain\n\nInvalid credentials\0",
    )
    .await;

    let err = connect_to(&addr, &ConnectOptions::new().login("nobody"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(
        err.message(),
        "server response: Authentication failed: Invalid credentials"
    );
    let server_error = err.server_error().unwrap();
    assert_eq!(server_error.body(), "Invalid credentials");
    assert_eq!(server_error.headers().get("message"), Some("Authentication failed"));
}

#[tokio::test]
async fn error_frame_without_message_uses_default_text() {
    let (addr, _server) = scripted_server("ERROR\n\n\0").await;

    let err = connect_to(&addr, &ConnectOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(err.message(), "server error response");
}

#[tokio::test]
async fn unexpected_reply_is_protocol_violation() {
    let (addr, _server) = scripted_server("MESSAGE\nsubscription:1\n\n\0").await;

    let err = connect_to(&addr, &ConnectOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(
        err.message(),
        "server sent MESSAGE frame (expected CONNECTED frame)"
    );
}

#[tokio::test]
async fn missing_version_fails() {
    let (addr, _server) = scripted_server("CONNECTED\n\n\0").await;

    let err = connect_to(&addr, &ConnectOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(err.message(), "connect failed");
}

#[tokio::test]
async fn unsupported_version_fails() {
    let (addr, _server) = scripted_server("CONNECTED\nversion:2.0\n\n\0").await;

    let err = connect_to(&addr, &ConnectOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(err.message(), "protocol version unsupported");
}

#[tokio::test]
async fn connection_closed_before_reply() {
    let (addr, server) = scripted_server("").await;

    let err = connect_to(&addr, &ConnectOptions::new()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportFailure);
    assert!(server.await.unwrap().starts_with("CONNECT\n"));
}

#[tokio::test]
async fn connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = connect_to(&format!("127.0.0.1:{port}"), &ConnectOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransportFailure);
}
