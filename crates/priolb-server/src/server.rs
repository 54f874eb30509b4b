use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{NodeError, ServerError};
use crate::http::{self, AppState};
use crate::node_pool::NodePool;
use crate::queue::PrioQueue;
use crate::store::NodeStateStore;

/// Options for building a [`Server`].
pub struct ServerOpts {
    /// Listen address of the HTTP frontend, e.g. "localhost:8080".
    pub listen_addr: String,
    /// URI of the node-state store. `None` disables persistence.
    pub redis_uri: Option<String>,
    pub config: Config,
}

/// The complete load balancer: priority queue, node pool, dispatcher and
/// HTTP frontend.
pub struct Server {
    config: Arc<Config>,
    queue: Arc<PrioQueue>,
    pool: Arc<NodePool>,
    listen_addr: String,
    http_shutdown: CancellationToken,
}

impl Server {
    /// Connects the store (if configured) and loads the persisted node set.
    /// A store connection failure or a failing health check of a persisted
    /// node aborts startup.
    pub async fn new(opts: ServerOpts) -> Result<Self, NodeError> {
        let config = Arc::new(opts.config);

        let store = match &opts.redis_uri {
            Some(uri) => {
                info!(%uri, "connecting to node-state store");
                Some(NodeStateStore::connect(uri, &config.redis_prefix).await?)
            }
            None => {
                info!("not persisting nodes, no store uri provided");
                None
            }
        };

        if config.workers_per_node == 0 {
            warn!("workers-per-node is 0, jobs will never be picked up");
        }

        let queue = Arc::new(PrioQueue::new(&config));
        let pool = Arc::new(NodePool::new(store, config.clone()));
        pool.load_from_store().await?;

        Ok(Self {
            config,
            queue,
            pool,
            listen_addr: opts.listen_addr,
            http_shutdown: CancellationToken::new(),
        })
    }

    /// Serves the HTTP frontend and drives the dispatcher. Returns once
    /// [`Server::shutdown`] has run: the queue is drained, the frontend has
    /// stopped and the dispatcher has exited.
    pub async fn run(&self) -> Result<(), ServerError> {
        let state = AppState {
            queue: self.queue.clone(),
            pool: self.pool.clone(),
            config: self.config.clone(),
        };
        let app = http::router(state);

        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "webserver listening");

        let shutdown = self.http_shutdown.clone();
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

        info!("starting dispatcher");
        let dispatcher = Dispatcher::new(self.queue.clone(), self.pool.clone(), self.config.clone());

        let (serve_result, ()) = tokio::join!(async move { serve.await }, dispatcher.run());
        serve_result?;
        Ok(())
    }

    /// Graceful shutdown: refuse new queue items (the dispatcher exits once
    /// drained), stop accepting HTTP connections, then stop every node's
    /// workers and wait for them.
    pub async fn shutdown(&self) {
        info!("shutting down server");
        self.queue.close().await;
        self.http_shutdown.cancel();
        self.pool.shutdown().await;
    }

    /// Admits an execution node; persists the node set when added.
    pub async fn add_node(&self, uri: &str) -> Result<bool, NodeError> {
        self.pool.add_node(uri).await
    }

    /// Current (fast-track, high-prio, low-prio) queue sizes.
    pub async fn queue_sizes(&self) -> (usize, usize, usize) {
        self.queue.len().await
    }

    /// Number of currently live node workers.
    pub async fn num_node_workers_alive(&self) -> u32 {
        self.pool.num_workers_alive().await
    }

    pub fn queue(&self) -> Arc<PrioQueue> {
        self.queue.clone()
    }

    pub fn pool(&self) -> Arc<NodePool> {
        self.pool.clone()
    }
}
