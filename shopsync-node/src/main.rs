//! ShopSync storage node.
//!
//! Usage:
//!   shopsync-node --addr 127.0.0.1:7001 --router 127.0.0.1:6000 --db node1.db
//!
//! The node registers with the router on startup, recovers its shard from
//! the local store, and flushes all in-memory state back on ctrl-c.

use anyhow::{Context, Result};
use clap::Parser;
use shopsync_node::{NodeConfig, NodeService};
use shopsync_proto::TcpTransport;
use shopsync_storage::ListStore;
use shopsync_types::NodeAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "shopsync-node")]
#[command(about = "ShopSync storage node")]
struct Args {
    /// Address to listen on (host:port; port 0 picks an ephemeral port)
    #[arg(short, long, default_value = "127.0.0.1:0")]
    addr: String,

    /// Router addresses (repeat for the active/standby pair)
    #[arg(short, long, default_values_t = vec!["127.0.0.1:6000".to_string()])]
    router: Vec<String>,

    /// Path to the local store
    #[arg(short, long, default_value = "node.db")]
    db: PathBuf,

    /// Replication factor N
    #[arg(long)]
    replication: Option<usize>,

    /// Read quorum R
    #[arg(long)]
    read_quorum: Option<usize>,

    /// Write quorum W
    #[arg(long)]
    write_quorum: Option<usize>,

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

    let mut config = NodeConfig::default();
    if let Some(n) = args.replication {
        config.replication = n;
    }
    if let Some(r) = args.read_quorum {
        config.read_quorum = r;
    }
    if let Some(w) = args.write_quorum {
        config.write_quorum = w;
    }

    let transport = TcpTransport::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    let store = ListStore::open(&args.db)
        .with_context(|| format!("failed to open store at {}", args.db.display()))?;

    let node = NodeService::new(
        Arc::new(transport),
        store,
        config,
        args.router.into_iter().map(NodeAddr::new).collect(),
    );
    info!("node listening on {}", node.addr());

    node.start().await.context("failed to register with router")?;

    node.run(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down, flushing state");
    })
    .await?;

    Ok(())
}
