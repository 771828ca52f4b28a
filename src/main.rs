//! ttlkv server entry point.
//!
//! Parses flags, loads the persisted store, then serves clients until Ctrl+C,
//! at which point the store is dumped one last time.

use anyhow::Context;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ttlkv::commands::CommandHandler;
use ttlkv::config::{help_text, Config, Invocation};
use ttlkv::connection::{handle_connection, ConnectionStats};
use ttlkv::persistence::{self, PersistenceSync};
use ttlkv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_banner(config: &Config) {
    println!(
        r#"
ttlkv v{} - In-Memory Key-Value Server
──────────────────────────────────────────
Server started on {}
Persisting to {} and {} every {} ms
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        ttlkv::VERSION,
        config.bind_address(),
        config.persistence.data_path.display(),
        config.persistence.expiry_path.display(),
        config.persistence.interval.as_millis(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::parse(std::env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("ttlkv version {}", ttlkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", help_text());
            std::process::exit(1);
        }
    };

    init_tracing();

    // Create the storage engine (shared across all connections)
    let storage = Arc::new(if config.active_expiry {
        StorageEngine::with_active_expiry()
    } else {
        StorageEngine::new()
    });

    // Restore the previous state before accepting anyone
    if let Err(e) = persistence::load(&storage, &config.persistence).await {
        warn!(error = %e, "Could not load persisted store, starting empty");
    }

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    print_banner(&config);

    let sync = PersistenceSync::start(Arc::clone(&storage), config.persistence.clone());
    let sweeper = config
        .active_expiry
        .then(|| ExpirySweeper::start(Arc::clone(&storage), ExpiryConfig::default()));

    let stats = Arc::new(ConnectionStats::new());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    drop(sweeper);
    sync.shutdown().await;

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = storage.len(),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                // Create a command handler for this connection
                let handler = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                // Spawn a task to handle this connection
                tokio::spawn(handle_connection(stream, addr, handler, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
