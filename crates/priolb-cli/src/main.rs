//! priolb entry point
//!
//! Starts the load balancer: HTTP frontend, priority queue, dispatcher and
//! node pool, with optional Redis-backed node persistence.
//!
//! ```bash
//! # Start with two execution nodes and no persistence
//! priolb --http localhost:8080 --nodes http://10.0.0.1:8545,http://10.0.0.2:8545
//!
//! # Start with persistence and a built-in mock node for development
//! priolb --redis redis://127.0.0.1:6379 --mock-node
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use argh::FromArgs;
use priolb_server::{Config, Server, ServerOpts};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn default_listen_addr() -> String {
    env_or("LISTEN_ADDR", "localhost:8080")
}

/// priolb - priority-aware HTTP load balancer for JSON payloads.
#[derive(FromArgs)]
struct Cli {
    /// http listen address (env: LISTEN_ADDR, default localhost:8080)
    #[argh(option, default = "default_listen_addr()")]
    http: String,

    /// redis URI for node persistence; omit to disable (env: REDIS_URI)
    #[argh(option)]
    redis: Option<String>,

    /// comma-separated node URIs to register at startup (env: NODES)
    #[argh(option)]
    nodes: Option<String>,

    /// number of concurrent workers per node (env: NUM_NODE_WORKERS, default 8)
    #[argh(option)]
    node_workers: Option<u32>,

    /// run a built-in mock execution node and register it
    #[argh(switch)]
    mock_node: bool,

    /// emit logs as json
    #[argh(switch)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli: Cli = argh::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting priolb");

    let mut config = Config::from_env();
    if let Some(workers) = cli.node_workers {
        config.workers_per_node = workers;
    }
    config.log();

    let redis_uri = cli
        .redis
        .or_else(|| std::env::var("REDIS_URI").ok())
        .filter(|uri| !uri.is_empty());

    let server = Arc::new(
        Server::new(ServerOpts {
            listen_addr: cli.http.clone(),
            redis_uri,
            config,
        })
        .await
        .context("building server failed")?,
    );

    if cli.mock_node {
        let uri = spawn_mock_node().await.context("starting mock node failed")?;
        info!(%uri, "using built-in mock execution node");
        server
            .add_node(&uri)
            .await
            .context("adding mock node failed")?;
    }

    let startup_nodes = cli.nodes.or_else(|| std::env::var("NODES").ok());
    if let Some(nodes) = startup_nodes {
        for uri in nodes.split(',').filter(|uri| !uri.is_empty()) {
            server
                .add_node(uri)
                .await
                .with_context(|| format!("adding node {uri} failed"))?;
        }
    }

    // Periodic queue / worker stats.
    {
        let server = server.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                let (fast_track, high_prio, low_prio) = server.queue_sizes().await;
                let workers_alive = server.num_node_workers_alive().await;
                info!(
                    fast_track,
                    high_prio,
                    low_prio,
                    workers_alive,
                    "queue stats",
                );
            }
        });
    }

    // Graceful shutdown on ctrl-c / SIGTERM.
    {
        let server = server.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutting down...");
            server.shutdown().await;
        });
    }

    server.run().await?;
    info!("bye");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Starts a minimal in-process execution node that answers every POST with
/// a fixed JSON-RPC result. Returns its URI.
async fn spawn_mock_node() -> anyhow::Result<String> {
    use axum::routing::post;

    async fn handler() -> &'static str {
        r#"{"jsonrpc":"2.0","id":1,"result":"ok"}"#
    }

    let app = axum::Router::new().route("/", post(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}
