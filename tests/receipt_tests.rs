//! Receipt requests: the frame builder and receipt timeout settings.

use std::time::Duration;

use stomp_session::{Frame, ReceiptTimeout};

// ============================================================================
// Frame::receipt() builder
// ============================================================================

#[test]
fn frame_receipt_adds_header() {
    let frame = Frame::new("SEND")
        .header("destination", "/queue/test")
        .receipt("receipt-123");

    assert_eq!(frame.get_header("receipt"), Some("receipt-123"));
}

#[tokio::test]
async fn frame_receipt_preserves_other_headers() {
    let frame = Frame::new("SEND")
        .header("destination", "/queue/test")
        .header("content-type", "text/plain")
        .receipt("rcpt-456")
        .set_body(b"hello".to_vec());

    assert_eq!(frame.command, "SEND");
    assert_eq!(frame.get_header("destination"), Some("/queue/test"));
    assert_eq!(frame.get_header("content-type"), Some("text/plain"));
    assert_eq!(frame.get_header("receipt"), Some("rcpt-456"));
    assert_eq!(frame.body.read_to_end(16).await.unwrap(), &b"hello"[..]);
}

#[test]
fn frame_receipt_on_disconnect() {
    let frame = Frame::new("DISCONNECT").receipt("bye");
    assert_eq!(frame.get_header("receipt"), Some("bye"));
    assert!(frame.validate_required_headers().is_ok());
}

// ============================================================================
// ReceiptTimeout
// ============================================================================

#[test]
fn receipt_timeout_default_asks_transport() {
    assert_eq!(ReceiptTimeout::default(), ReceiptTimeout::Default);
    assert!(!ReceiptTimeout::Default.is_requested());
}

#[test]
fn receipt_timeout_from_millis() {
    assert_eq!(ReceiptTimeout::from_millis(0), ReceiptTimeout::Forever);
    assert_eq!(ReceiptTimeout::from_millis(-1), ReceiptTimeout::NotRequested);
    assert_eq!(ReceiptTimeout::from_millis(-2), ReceiptTimeout::Default);
    assert_eq!(ReceiptTimeout::from_millis(-7), ReceiptTimeout::NotRequested);
    assert_eq!(
        ReceiptTimeout::from_millis(1500),
        ReceiptTimeout::After(Duration::from_millis(1500))
    );
}

#[test]
fn receipt_timeout_is_requested() {
    assert!(ReceiptTimeout::Forever.is_requested());
    assert!(ReceiptTimeout::After(Duration::from_secs(1)).is_requested());
    assert!(!ReceiptTimeout::NotRequested.is_requested());
}
