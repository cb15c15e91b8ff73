use std::io::{self, BufRead, Write};
use std::time::Duration;

use stomp_session::{
    ClientSession, ConnectOptions, ErrorKind, Heartbeat, ReceiptTimeout, StompError, Subscription,
    TransportLimits, connect_tcp,
};
use tokio::sync::mpsc;

use super::args::Cli;
use super::commands::{CommandResult, Console, print_help};
use super::exit_codes;

const MAX_PRINTED_BODY: usize = 64 * 1024;

/// Run the line-oriented CLI until `quit`, end of input or Ctrl-C.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let heartbeat: Heartbeat = cli.heartbeat.parse().map_err(|e| {
        (
            format!("Invalid heartbeat '{}': {}", cli.heartbeat, e),
            exit_codes::USAGE_ERROR,
        )
    })?;

    let limits = TransportLimits::default()
        .with_heartbeat(heartbeat)
        .with_operation_timeout(Duration::from_millis(cli.receipt_timeout));

    let mut options = ConnectOptions::new().login(&cli.login).passcode(&cli.passcode);
    if let Some(host) = &cli.host {
        options = options.host(host);
    }

    println!("Connecting to {}...", cli.address);

    let session = connect_tcp(cli.address.as_str(), &options, limits)
        .await
        .map_err(|e| format_connection_error(&e, &cli.address))?;

    println!("Connected (STOMP {}).", session.protocol_version());

    session.set_error_listener(|err| {
        eprintln!("\n[SESSION ERROR] {}", err);
        prompt();
    });

    let mut console = Console::new(session.clone());
    for dest in &cli.subscribe {
        console.subscribe(dest).await.map_err(|e| {
            (
                format!("Failed to subscribe to '{}': {}", dest, e),
                exit_codes::PROTOCOL_ERROR,
            )
        })?;
    }

    // Channel to receive user commands from stdin reader
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<String>(16);

    // Spawn blocking stdin reader
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if cmd_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    print_help();
    println!();

    loop {
        prompt();

        let line = tokio::select! {
            line = cmd_rx.recv() => match line {
                Some(l) => l,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        match console.execute(&line).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    if !session.is_disconnected() {
        println!("Disconnecting...");
        if let Err(e) = session.disconnect(ReceiptTimeout::Default).await {
            eprintln!("Disconnect failed: {}", e);
        }
    }

    Ok(())
}

/// Print every message received on `subscription` until it is closed.
pub fn spawn_printer(session: ClientSession, subscription: Subscription, destination: String) {
    tokio::spawn(async move {
        loop {
            let message = match session.receive(&subscription).await {
                Ok(message) => message,
                Err(e) => {
                    if !e.is_cancelled() && e.kind() != ErrorKind::SessionClosed {
                        eprintln!("\n[{}] receive failed: {}", destination, e);
                    }
                    break;
                }
            };

            let (_, headers, body) = message.into_parts();
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");

            println!("\n[{}] [{}] MESSAGE received:", stamp, destination);
            for (k, v) in &headers {
                println!("  {}: {}", k, v);
            }
            match body.read_to_end(MAX_PRINTED_BODY).await {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(s) => println!("  Body: {}", s),
                    Err(_) => println!("  Body: ({} bytes, binary)", bytes.len()),
                },
                Err(e) => println!("  Body: unreadable ({})", e),
            }
            prompt();
        }
    });
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// Format a connection error with user-friendly messaging
pub fn format_connection_error(err: &StompError, address: &str) -> (String, u8) {
    match err.kind() {
        ErrorKind::TransportFailure => (
            format!("Connection to {} failed: {}", address, err),
            exit_codes::NETWORK_ERROR,
        ),
        ErrorKind::ServerError => (
            format!("Authentication failed: {}", err),
            exit_codes::AUTH_ERROR,
        ),
        _ => (format!("Protocol error: {}", err), exit_codes::PROTOCOL_ERROR),
    }
}
