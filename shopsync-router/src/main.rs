//! ShopSync front-end router.
//!
//! Usage:
//!   shopsync-router --primary --addr 127.0.0.1:6000 \
//!       --state-addr 127.0.0.1:5556 --peer-state-addr 127.0.0.1:5557
//!   shopsync-router --backup --addr 127.0.0.1:6001 \
//!       --state-addr 127.0.0.1:5557 --peer-state-addr 127.0.0.1:5556
//!
//! Exactly one of the pair serves clients; a fatal split-brain condition
//! aborts the process so clients fail over to the peer.

use anyhow::{Context, Result};
use clap::Parser;
use shopsync_proto::TcpTransport;
use shopsync_router::{RouterConfig, RouterRole, RouterService, StateLink};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "shopsync-router")]
#[command(about = "ShopSync front-end router")]
struct Args {
    /// Run as the primary of the pair
    #[arg(short, long, conflicts_with = "backup")]
    primary: bool,

    /// Run as the backup of the pair
    #[arg(short, long)]
    backup: bool,

    /// Address to serve clients and nodes on
    #[arg(short, long, default_value = "127.0.0.1:6000")]
    addr: String,

    /// Local state-beat address
    #[arg(long, default_value = "127.0.0.1:5556")]
    state_addr: String,

    /// Peer router's state-beat address
    #[arg(long, default_value = "127.0.0.1:5557")]
    peer_state_addr: String,

    /// Node-eviction threshold in seconds
    #[arg(long)]
    timeout_threshold: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let role = if args.backup {
        RouterRole::Backup
    } else if args.primary {
        RouterRole::Primary
    } else {
        anyhow::bail!("specify --primary or --backup");
    };

    let mut config = RouterConfig::default();
    if let Some(secs) = args.timeout_threshold {
        config.timeout_threshold = Duration::from_secs(secs);
    }

    let transport = TcpTransport::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    let state_link = StateLink::bind(&args.state_addr, &args.peer_state_addr)
        .await
        .with_context(|| format!("failed to bind state link {}", args.state_addr))?;

    let router = RouterService::new(Arc::new(transport), state_link, config, role);
    info!("router ({role:?}) listening on {}", router.addr());

    if let Err(e) = router
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
    {
        // Dual master / dual slave: abort so clients fail over to the peer.
        error!("{e}");
        std::process::exit(1);
    }

    Ok(())
}
