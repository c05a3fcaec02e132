use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawd_chat::auth::Authenticator;
use clawd_chat::config::ServerConfig;
use clawd_chat::context::ServerContext;
use clawd_chat::crypto::RsaIdentity;
use clawd_chat::listener;
use clawd_chat::store::SqliteStore;
use tracing::info;

#[derive(Parser)]
#[command(name = "clawd-chat", about = "Secure chat server", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Host/IP to bind to.
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Port to bind to.
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Path to the SQLite account database.
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    log: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the chat server (default when no subcommand is given).
    ///
    /// Examples:
    ///   clawd-chat serve
    ///   clawd-chat
    Serve,
    /// Create a user account without starting the server — useful for
    /// seeding a fresh database ahead of a demo or a test run.
    ///
    /// Examples:
    ///   clawd-chat signup "Alice Liddell" alice@example.com hunter2
    Signup {
        full_name: String,
        email: String,
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::new(args.host, args.port, args.database, args.log);
    setup_logging(&config.log_level);

    match args.command {
        Some(Command::Signup {
            full_name,
            email,
            password,
        }) => run_signup(&config, &full_name, &email, &password).await,
        None | Some(Command::Serve) => run_server(config).await,
    }
}

/// Init once, before any tracing call — stdout only, `RUST_LOG`-compatible
/// filter syntax via `EnvFilter`.
fn setup_logging(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_level.to_owned())
        .compact()
        .init();
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let identity = Arc::new(RsaIdentity::generate().context("failed to generate server RSA keypair")?);
    let store = Arc::new(
        SqliteStore::connect(&config.database_path)
            .await
            .context("failed to open account store")?,
    );
    let ctx = ServerContext::new(identity, store);

    info!(
        bind = %config.bind_addr(),
        db = %config.database_path.display(),
        "starting clawd-chat",
    );
    listener::run(&config.bind_addr(), ctx).await
}

async fn run_signup(config: &ServerConfig, full_name: &str, email: &str, password: &str) -> Result<()> {
    let store = Arc::new(
        SqliteStore::connect(&config.database_path)
            .await
            .context("failed to open account store")?,
    );
    let authenticator = Authenticator::new(store);
    match authenticator.sign_up(full_name, email, password).await? {
        Some(id) => {
            println!("Created user {id} ({email}).");
            Ok(())
        }
        None => {
            eprintln!("A user with email {email} already exists.");
            std::process::exit(1);
        }
    }
}
