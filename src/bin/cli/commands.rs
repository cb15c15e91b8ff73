use std::collections::HashMap;

use stomp_session::frame::SEND;
use stomp_session::{
    AckMode, ClientSession, Frame, ReceiptTimeout, Resource, StompError, Subscription, Transaction,
};

use super::plain::spawn_printer;

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command requests exit
    Quit,
    /// Error executing command
    Error(String),
}

/// Interactive state on top of a session: open subscriptions by
/// destination and the transaction new sends join.
pub struct Console {
    session: ClientSession,
    subscriptions: HashMap<String, Subscription>,
    transaction: Option<Transaction>,
}

impl Console {
    pub fn new(session: ClientSession) -> Self {
        Self {
            session,
            subscriptions: HashMap::new(),
            transaction: None,
        }
    }

    /// Subscribe to a destination and print its messages as they arrive.
    pub async fn subscribe(&mut self, destination: &str) -> Result<(), StompError> {
        if self.subscriptions.contains_key(destination) {
            return Ok(());
        }
        let subscription = self
            .session
            .subscribe(destination, AckMode::Auto, ReceiptTimeout::Default)
            .await?;
        println!("Subscribed to: {} (id {})", destination, subscription.id());
        spawn_printer(self.session.clone(), subscription.clone(), destination.to_string());
        self.subscriptions.insert(destination.to_string(), subscription);
        Ok(())
    }

    /// Parse and execute a command
    pub async fn execute(&mut self, line: &str) -> CommandResult {
        let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
        if parts.is_empty() || parts[0].is_empty() {
            return CommandResult::Ok;
        }

        match parts[0] {
            "quit" | "exit" | "q" => CommandResult::Quit,

            "send" => {
                if parts.len() < 3 {
                    return CommandResult::Error("Usage: send <destination> <message>".to_string());
                }
                let mut frame = Frame::new(SEND)
                    .header("destination", parts[1])
                    .header("content-type", "text/plain")
                    .set_body(parts[2].as_bytes().to_vec());
                if let Some(transaction) = &self.transaction {
                    frame = frame.header("transaction", transaction.id());
                }
                match self.session.send(frame, ReceiptTimeout::Default).await {
                    Ok(()) => CommandResult::Ok,
                    Err(e) => CommandResult::Error(format!("Send error: {}", e)),
                }
            }

            "sub" | "subscribe" => {
                if parts.len() < 2 {
                    return CommandResult::Error("Usage: sub <destination>".to_string());
                }
                match self.subscribe(parts[1]).await {
                    Ok(()) => CommandResult::Ok,
                    Err(e) => CommandResult::Error(format!("Failed to subscribe to '{}': {}", parts[1], e)),
                }
            }

            "unsub" | "unsubscribe" => {
                if parts.len() < 2 {
                    return CommandResult::Error("Usage: unsub <destination>".to_string());
                }
                let Some(subscription) = self.subscriptions.remove(parts[1]) else {
                    return CommandResult::Error(format!("Not subscribed to '{}'", parts[1]));
                };
                match self
                    .session
                    .unsubscribe(&subscription, ReceiptTimeout::Default)
                    .await
                {
                    Ok(()) => {
                        println!("Unsubscribed from: {}", parts[1]);
                        CommandResult::Ok
                    }
                    Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
                }
            }

            "begin" => {
                if self.transaction.is_some() {
                    return CommandResult::Error("A transaction is already open".to_string());
                }
                match self.session.begin(ReceiptTimeout::Default).await {
                    Ok(transaction) => {
                        println!("Transaction {} started", transaction.id());
                        self.transaction = Some(transaction);
                        CommandResult::Ok
                    }
                    Err(e) => CommandResult::Error(format!("Begin error: {}", e)),
                }
            }

            "commit" | "abort" => {
                let Some(transaction) = self.transaction.take() else {
                    return CommandResult::Error("No open transaction".to_string());
                };
                let result = if parts[0] == "commit" {
                    self.session.commit(&transaction, ReceiptTimeout::Default).await
                } else {
                    self.session.abort(&transaction, ReceiptTimeout::Default).await
                };
                match result {
                    Ok(()) => {
                        println!("Transaction {} {}", transaction.id(), if parts[0] == "commit" { "committed" } else { "aborted" });
                        CommandResult::Ok
                    }
                    Err(e) => CommandResult::Error(format!("{} error: {}", parts[0], e)),
                }
            }

            "help" | "?" => {
                print_help();
                CommandResult::Ok
            }

            _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
        }
    }
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message (joins the open transaction)");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination>           - Unsubscribe from a destination");
    println!("  begin                         - Start a transaction");
    println!("  commit                        - Commit the open transaction");
    println!("  abort                         - Abort the open transaction");
    println!("  quit                          - Disconnect and exit");
}
