use stomp_session::{ConnectOptions, Frame, ReceiptTimeout, Resource, TransportLimits, connect_tcp};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // This example expects a STOMP broker on localhost:61613 (e.g. RabbitMQ with stomp plugin).

    let options = ConnectOptions::new().login("guest").passcode("guest");
    let session = connect_tcp("127.0.0.1:61613", &options, TransportLimits::default()).await?;

    // Begin a transaction
    let tx = session.begin(ReceiptTimeout::Forever).await?;
    println!("Transaction {} started", tx.id());

    for n in 1..=2 {
        let msg = Frame::new("SEND")
            .header("destination", "/queue/test")
            .header("transaction", tx.id())
            .set_body(format!("message {} in transaction", n));
        session.send(msg, ReceiptTimeout::Default).await?;
        println!("Sent message {} in transaction", n);
    }

    // Commit the transaction (both messages will be delivered atomically)
    session.commit(&tx, ReceiptTimeout::Forever).await?;
    println!("Transaction {} committed", tx.id());

    let tx = session.begin(ReceiptTimeout::Forever).await?;
    println!("\nTransaction {} started", tx.id());

    let msg = Frame::new("SEND")
        .header("destination", "/queue/test")
        .header("transaction", tx.id())
        .set_body("this message will be aborted");
    session.send(msg, ReceiptTimeout::Default).await?;

    // Abort the transaction (message will not be delivered)
    session.abort(&tx, ReceiptTimeout::Forever).await?;
    println!("Transaction {} aborted", tx.id());

    session.disconnect(ReceiptTimeout::Default).await?;

    Ok(())
}
