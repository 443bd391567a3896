use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use legendo_core::config::CacheConfig;
use legendo_core::ipc::{load_shared_secret, IpcRequest, IpcResponse};
use legendo_core::ipc_client::send_request;
use legendo_core::paths::{config_path, ipc_secret_path};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "legendo-cli")]
#[command(about = "CLI for the Legendo secure cache service", long_about = None)]
struct Cli {
    /// Control socket (defaults to LEGENDO_SOCKET, then socketPath from the
    /// config file, then the data directory)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Service config file, read for socketPath
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the service is reachable
    Ping,

    /// Store a JSON document and print its id
    Put {
        /// JSON payload, e.g. '{"title":"doc"}'
        json: String,
    },

    /// Fetch a stored document by id
    Get { id: String },

    /// Show entry count and sweep statistics
    Status,

    /// Run one expiry sweep now
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let request = match cli.command {
        Commands::Ping => IpcRequest::Ping,
        Commands::Put { json } => {
            let payload: serde_json::Value =
                serde_json::from_str(&json).map_err(|e| anyhow!("invalid JSON payload: {e}"))?;
            IpcRequest::Store { payload }
        }
        Commands::Get { id } => IpcRequest::Retrieve { id },
        Commands::Status => IpcRequest::Status,
        Commands::Sweep => IpcRequest::Sweep,
    };

    let config_file = match cli.config {
        Some(path) => path,
        None => config_path()?,
    };
    let config = CacheConfig::load(&config_file)?;
    let socket_path = config.resolve_socket_path(cli.socket)?;
    let secret = load_shared_secret(&ipc_secret_path(&socket_path))
        .map_err(|e| anyhow!("{e}; is legendo-service running?"))?;

    match send_request(&socket_path, &secret, request).await? {
        IpcResponse::Pong => println!("pong"),
        IpcResponse::Stored { id } => println!("{id}"),
        IpcResponse::Payload { payload, .. } => {
            println!("{}", serde_json::to_string_pretty(&payload)?)
        }
        IpcResponse::NotFound { id } => return Err(anyhow!("not found: {id}")),
        IpcResponse::Status { status } => {
            println!("{}", serde_json::to_string_pretty(&status)?)
        }
        IpcResponse::Swept { report } => {
            println!("{}", serde_json::to_string_pretty(&report)?)
        }
    }
    Ok(())
}
