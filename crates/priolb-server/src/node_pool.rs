use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::config::Config;
use crate::error::NodeError;
use crate::job::Job;
use crate::node::{Node, SharedJobReceiver};
use crate::store::NodeStateStore;

/// Dynamic set of execution nodes sharing one inbound job channel.
///
/// All mutations are serialized by the node-list mutex. The job channel is
/// created once at pool construction and outlives every node: removing a
/// node only cancels its workers, jobs already buffered stay claimable by
/// the remaining fleet.
pub struct NodePool {
    nodes: Mutex<Vec<Arc<Node>>>,
    job_tx: mpsc::Sender<Arc<Job>>,
    job_rx: SharedJobReceiver,
    store: Option<NodeStateStore>,
    config: Arc<Config>,
}

impl NodePool {
    pub fn new(store: Option<NodeStateStore>, config: Arc<Config>) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.job_channel_buffer.max(1));
        Self {
            nodes: Mutex::new(Vec::new()),
            job_tx,
            job_rx: Arc::new(Mutex::new(job_rx)),
            store,
            config,
        }
    }

    /// Sending end of the shared job channel, used by the dispatcher.
    pub fn job_sender(&self) -> mpsc::Sender<Arc<Job>> {
        self.job_tx.clone()
    }

    /// Admits a node and persists the new list. A URI already in the pool
    /// is a no-op and returns `Ok(false)`. Admission requires a passing
    /// health check; its workers start immediately after.
    pub async fn add_node(&self, uri: &str) -> Result<bool, NodeError> {
        match self.admit(uri).await? {
            Some(uris) => {
                self.persist(&uris).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Health-checks and admits one node under the list lock. Returns the
    /// resulting URI list when a node was added, `None` on duplicates.
    async fn admit(&self, uri: &str) -> Result<Option<Vec<String>>, NodeError> {
        let mut nodes = self.nodes.lock().await;
        if nodes.iter().any(|node| node.uri == uri) {
            return Ok(None);
        }

        let node = Arc::new(Node::new(uri, self.job_rx.clone(), &self.config)?);
        node.health_check().await?;

        nodes.push(node.clone());
        node.start_workers().await;
        info!(uri, num_nodes = nodes.len(), "node pool: added node");

        Ok(Some(nodes.iter().map(|node| node.uri.clone()).collect()))
    }

    /// Removes a node if present; its workers are signalled to stop but
    /// in-flight upstream calls finish. Returns whether a node was removed.
    pub async fn remove_node(&self, uri: &str) -> bool {
        let uris = {
            let mut nodes = self.nodes.lock().await;
            let Some(idx) = nodes.iter().position(|node| node.uri == uri) else {
                return false;
            };
            let node = nodes.remove(idx);
            node.stop_workers().await;
            info!(uri, num_nodes = nodes.len(), "node pool: removed node");
            nodes.iter().map(|node| node.uri.clone()).collect::<Vec<_>>()
        };
        self.persist(&uris).await;
        true
    }

    /// Snapshot of the current node URIs.
    pub async fn node_uris(&self) -> Vec<String> {
        self.nodes
            .lock()
            .await
            .iter()
            .map(|node| node.uri.clone())
            .collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.lock().await.is_empty()
    }

    /// Number of live workers across the fleet.
    pub async fn num_workers_alive(&self) -> u32 {
        self.nodes
            .lock()
            .await
            .iter()
            .map(|node| node.cur_workers())
            .sum()
    }

    /// Reads the persisted URI list and admits each node. Health-check
    /// failures propagate and abort the load; nothing is re-persisted.
    pub async fn load_from_store(&self) -> Result<(), NodeError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let uris = store.load_nodes().await.map_err(NodeError::Store)?;
        info!(num_nodes = uris.len(), "node pool: loaded nodes from store");
        for uri in uris {
            self.admit(&uri).await?;
        }
        Ok(())
    }

    /// Persistence failures are logged, the in-memory mutation stands.
    async fn persist(&self, uris: &[String]) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save_nodes(uris).await {
                error!(%err, "node pool: saving node list failed");
            }
        }
    }

    /// Stops all workers, waiting for each node to drain its in-flight
    /// calls.
    pub async fn shutdown(&self) {
        let nodes = self.nodes.lock().await.clone();
        for node in nodes {
            node.stop_workers_and_wait().await;
        }
    }
}
