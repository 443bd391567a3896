use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use legendo_core::config::CacheConfig;
use legendo_core::ipc::{generate_shared_secret, persist_shared_secret, IpcServer};
use legendo_core::paths::{config_path, ipc_secret_path};
use legendo_core::{CipherKey, SecureCache};
use legendo_service::handler::CacheHandler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Legendo secure cache service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the cache and its local control socket
    Run {
        /// JSON config file (defaults to the data directory)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    /// Print a fresh base64 cache key
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, socket } => run_command(config, socket).await,
        Commands::GenerateKey => {
            let key = CipherKey::generate();
            println!("{}", key.to_base64().as_str());
            Ok(())
        }
    }
}

async fn run_command(config_override: Option<PathBuf>, socket_override: Option<PathBuf>) -> Result<()> {
    let config_file = match config_override {
        Some(path) => path,
        None => config_path()?,
    };
    let config = CacheConfig::load(&config_file)?;
    let key = config.resolve_key()?;
    let socket_path = config.resolve_socket_path(socket_override)?;

    let cache = Arc::new(SecureCache::new(&key));
    drop(key);
    cache.start_sweeping(config.sweep_interval(), config.max_age())?;

    let secret = generate_shared_secret();
    let secret_path = ipc_secret_path(&socket_path);
    persist_shared_secret(&secret_path, &secret)?;

    let handler = Arc::new(CacheHandler::new(cache.clone(), config.max_age()));
    let server = Arc::new(IpcServer::new(secret, socket_path.clone()));
    let mut server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.start(handler).await })
    };

    info!(
        socket = %server.socket_path().display(),
        sweep_interval_secs = config.sweep_interval_secs,
        max_age_secs = config.max_age_secs,
        "service started"
    );
    let outcome = tokio::select! {
        res = signal::ctrl_c() => res.map_err(|e| anyhow!("signal handler: {e}")),
        res = &mut server_task => match res {
            Ok(Ok(())) => Err(anyhow!("ipc server exited")),
            Ok(Err(err)) => Err(err),
            Err(err) => Err(anyhow!("ipc server task: {err}")),
        },
    };
    info!("service stopping");
    server_task.abort();
    cache.stop_sweeping().await;
    for path in [&socket_path, &secret_path] {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %err, "cleanup failed");
            }
        }
    }
    outcome
}
