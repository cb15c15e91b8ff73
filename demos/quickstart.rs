use std::time::Duration;

use stomp_session::{AckMode, ConnectOptions, Frame, ReceiptTimeout, TransportLimits, connect_tcp};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ with stomp plugin).

    let options = ConnectOptions::new().login("guest").passcode("guest");
    let session = connect_tcp("127.0.0.1:61613", &options, TransportLimits::default()).await?;
    println!("connected, protocol {}", session.protocol_version());

    let subscription = session
        .subscribe("/queue/test", AckMode::Auto, ReceiptTimeout::Forever)
        .await?;

    let msg = Frame::new("SEND")
        .header("destination", "/queue/test")
        .set_body(b"hello from stomp-session example".to_vec());

    // wait for the broker to confirm the message
    session
        .send(msg, ReceiptTimeout::After(Duration::from_secs(5)))
        .await?;

    match tokio::time::timeout(Duration::from_secs(5), session.receive(&subscription)).await {
        Ok(Ok(message)) => {
            let (_, headers, body) = message.into_parts();
            let text = body.read_string(64 * 1024).await?;
            println!("received from {:?}: {}", headers.get("destination"), text);
        }
        Ok(Err(err)) => println!("receive failed: {}", err),
        Err(_) => {
            session.cancel_receive(&subscription);
            println!("timed out waiting for a message");
        }
    }

    session.disconnect(ReceiptTimeout::Default).await?;

    Ok(())
}
