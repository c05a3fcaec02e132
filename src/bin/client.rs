//! Interactive terminal client — mainly for interop testing against the
//! server without a GUI. Connects, runs the handshake, then splits into a
//! reader task that prints whatever arrives and a command loop reading
//! lines from stdin.

use anyhow::{Context, Result};
use clap::Parser;
use clawd_chat::client::ChatClient;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "clawd-chat-client", about = "Interactive secure chat client")]
struct Args {
    /// Server address, host:port.
    #[arg(long, default_value = "127.0.0.1:8888")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").compact().init();

    let args = Args::parse();
    let client = ChatClient::connect(&args.addr)
        .await
        .with_context(|| format!("could not connect to {}", args.addr))?;
    println!("Secure channel established with {}.", args.addr);
    print_help();

    let (mut reader, mut writer) = client.split();

    let printer = tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(Some(envelope)) => println!("<- {}: {}", envelope.kind, envelope.payload),
                Ok(None) => {
                    println!("connection closed by server");
                    break;
                }
                Err(e) => {
                    println!("connection error: {e}");
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let envelope = match parse_command(&line) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if writer.send(&envelope).await.is_err() {
            println!("connection closed, cannot send");
            break;
        }
    }

    printer.abort();
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  signup <full name> <email> <password>");
    println!("  login <email> <password>");
    println!("  chat <recipient_id> <text...>");
    println!("  whoisonline");
    println!("  logout");
}

fn parse_command(line: &str) -> Result<Option<clawd_chat::protocol::Envelope>, String> {
    use clawd_chat::protocol::Envelope;
    use serde_json::json;

    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut parts = line.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match command {
        "signup" => {
            let mut fields = rest.splitn(3, char::is_whitespace);
            let (full_name, email, password) = (
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
                fields.next().unwrap_or_default(),
            );
            if full_name.is_empty() || email.is_empty() || password.is_empty() {
                return Err("usage: signup <full name> <email> <password>".into());
            }
            Ok(Some(Envelope::new(
                "signup",
                json!({ "full_name": full_name, "email": email, "password": password }),
            )))
        }
        "login" => {
            let mut fields = rest.splitn(2, char::is_whitespace);
            let (email, password) = (fields.next().unwrap_or_default(), fields.next().unwrap_or_default());
            if email.is_empty() || password.is_empty() {
                return Err("usage: login <email> <password>".into());
            }
            Ok(Some(Envelope::new("login", json!({ "email": email, "password": password }))))
        }
        "chat" => {
            let mut fields = rest.splitn(2, char::is_whitespace);
            let (recipient_id, text) = (fields.next().unwrap_or_default(), fields.next().unwrap_or_default());
            if recipient_id.is_empty() || text.is_empty() {
                return Err("usage: chat <recipient_id> <text>".into());
            }
            Ok(Some(Envelope::new("chat", json!({ "recipient_id": recipient_id, "text": text }))))
        }
        "whoisonline" => Ok(Some(Envelope::new("whoisonline", serde_json::Value::Null))),
        "logout" => Ok(Some(Envelope::new("logout", serde_json::Value::Null))),
        other => Err(format!("unknown command: {other}")),
    }
}
