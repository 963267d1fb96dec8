//! library-syncd: headless peer that keeps a media library in sync.
//!
//! Runs the same merge logic as any other device, stores the library as
//! JSON files, and relays changes between the peers connected to it.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use library_sync_core::{Library, SyncEvent};
use library_sync_daemon::{
    load_or_create_identity, open_library_stores, spawn_dialer, Args, DaemonConfig,
    ReconnectConfig, SyncServer,
};

fn log_event(event: SyncEvent) {
    match event {
        SyncEvent::SubscriptionsAdded { peer, notification } => {
            info!("{}: {}", peer.short(), notification.message("Added", "subscriptions"));
        }
        SyncEvent::SubscriptionsRemoved { peer, notification } => {
            info!("{}: {}", peer.short(), notification.message("Removed", "subscriptions"));
        }
        SyncEvent::SendToDevice {
            peer,
            url,
            position_secs,
        } => {
            info!("{} asked to play {} at {}s", peer.short(), url, position_secs);
        }
        SyncEvent::HandshakeCompleted { peer, sent, failed } => {
            debug!(
                "Handshake with {} done ({} sent, {} failed)",
                peer.short(),
                sent.len(),
                failed.len()
            );
        }
        other => debug!("{:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,library_sync_daemon=debug,library_sync_core=debug"
    } else {
        "info,library_sync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = DaemonConfig::from_args(&args)?;
    info!("Starting library-syncd");
    info!("Data directory: {:?}", config.data_dir);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let identity = load_or_create_identity(&config.data_dir).await?;
    info!("Device identity: {}", identity);

    let library = Arc::new(Library::new(open_library_stores(&config.data_dir)?));
    let _listener = library.events().subscribe(log_event);

    let server = SyncServer::new(library, identity, config.device_name.clone());

    if let Some(addr) = &config.listen {
        let listener = SyncServer::bind(addr).await?;
        tokio::spawn(Arc::clone(&server).serve(listener));
    }
    for url in &config.peers {
        spawn_dialer(Arc::clone(&server), url.clone(), ReconnectConfig::default());
    }

    info!("Daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    server.shutdown().await;
    Ok(())
}
