//! Interactive console for running an infoserve server or client.
//!
//! ```text
//! infoserve server [--port N] [--config FILE] [--manual]
//! infoserve client --host HOST --port N [--config FILE]
//! ```
//!
//! Without `--manual` the server runs its worker and only `i` and `q` are
//! useful; with it, nothing happens until you type `a`, `c`, `r` or `s`.
//! Set `RUST_LOG` to change verbosity (default `info`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infoserve::console::{CLIENT_HELP, SERVER_HELP};
use infoserve::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Serve or fetch an information file over TCP.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Role {
    /// Listen for clients and answer their requests.
    Server {
        /// Port to listen on. Overrides the config file.
        #[arg(short, long)]
        port: Option<u16>,

        /// JSON server config.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not start the worker; drive the server with console commands.
        #[arg(short, long)]
        manual: bool,
    },
    /// Connect to a server and send it requests.
    Client {
        /// Server host name or address.
        #[arg(short = 'H', long)]
        host: String,

        /// Server port.
        #[arg(short, long)]
        port: u16,

        /// JSON client config.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

async fn run_server(
    port: Option<u16>,
    config: Option<PathBuf>,
    manual: bool,
) -> Result<(), InfoserveError> {
    let mut config = match config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = port {
        config.port = port;
    }

    let mut server = Server::new(config);
    server.setup_port().await?;
    server.open_port_for_listening().await?;
    if !manual {
        server.start()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("{SERVER_HELP}");
        let Ok(Some(line)) = lines.next_line().await else {
            break;
        };
        let command = match line.parse::<ServerCommand>() {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match command.execute(&mut server).await {
            Ok(Reply::Show(text)) => println!("{text}"),
            Ok(Reply::Quit) => break,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    server.shutdown().await;
    Ok(())
}

async fn run_client(
    host: String,
    port: u16,
    config: Option<PathBuf>,
) -> Result<(), InfoserveError> {
    let config = match config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::default(),
    };

    println!("trying to connect");
    let mut client = Client::dial(&Endpoint::new(host, port), config).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("{CLIENT_HELP}");
        let Ok(Some(line)) = lines.next_line().await else {
            break;
        };
        let command = match line.parse::<ClientCommand>() {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        match command.execute(&mut client).await {
            Ok(Reply::Show(text)) => println!("{text}"),
            Ok(Reply::Quit) => break,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    client.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let role = Cli::parse().role;
    tracing::debug!(?role, "starting");

    match role {
        Role::Server {
            port,
            config,
            manual,
        } => run_server(port, config, manual).await?,
        Role::Client { host, port, config } => run_client(host, port, config).await?,
    }
    Ok(())
}
