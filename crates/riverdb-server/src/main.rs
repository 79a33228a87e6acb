//! RiverDB server binary

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use riverdb_cluster::ClusterBus;
use riverdb_command::Node;
use riverdb_server::{router, AppState};

#[derive(Debug, Parser)]
#[command(name = "riverdb", about = "Shard-partitioned streaming SQL engine")]
struct Config {
    /// Address to bind the HTTP API to.
    #[arg(long, default_value = "127.0.0.1:6584", env = "RIVERDB_BIND")]
    bind: String,

    /// Number of logical shards. Fixed for the cluster's lifetime.
    #[arg(long, default_value_t = 12, env = "RIVERDB_SHARDS")]
    shards: usize,

    /// Log filter, e.g. `info` or `riverdb_push=debug,info`.
    #[arg(long, default_value = "info", env = "RIVERDB_LOG")]
    log: String,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log))
        .init();

    if let Err(code) = run(config).await {
        std::process::exit(code);
    }
}

async fn run(config: Config) -> Result<(), i32> {
    let bus = ClusterBus::new(1, config.shards);
    let node = match Node::start(0, bus).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "node failed to start");
            return Err(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %config.bind, error = %e, "failed to bind");
            return Err(1);
        }
    };
    info!(bind = %config.bind, shards = config.shards, "riverdb listening");

    let app = router(AppState {
        node: Arc::clone(&node),
    });
    let node_for_shutdown = Arc::clone(&node);
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        let _ = node_for_shutdown.stop().await;
    });
    if let Err(e) = serve.await {
        error!(error = %e, "server error");
        return Err(1);
    }
    Ok(())
}
