use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::JobError;
use crate::job::JobResult;
use crate::node_pool::NodePool;
use crate::queue::PrioQueue;

/// The single consumer loop moving jobs from the priority queue into the
/// node pool's shared channel.
///
/// The pre-dispatch timeout bounds queue residency independent of node
/// backlog; the bounded send keeps a slow fleet from silently piling up
/// jobs here.
pub struct Dispatcher {
    queue: Arc<PrioQueue>,
    pool: Arc<NodePool>,
    config: Arc<Config>,
}

impl Dispatcher {
    pub fn new(queue: Arc<PrioQueue>, pool: Arc<NodePool>, config: Arc<Config>) -> Self {
        Self {
            queue,
            pool,
            config,
        }
    }

    /// Runs until the queue is closed and drained.
    pub async fn run(&self) {
        let job_tx = self.pool.job_sender();

        loop {
            let Some(job) = self.queue.pop().await else {
                info!("shutting down dispatcher, queue is closed and drained");
                return;
            };

            if job.is_cancelled() {
                continue;
            }

            if job.age() > self.config.request_timeout {
                info!(id = %job.id, "request timed out before dispatch");
                job.deliver(JobResult::failure(JobError::RequestTimeout));
                continue;
            }

            if self.pool.is_empty().await {
                error!("no execution nodes available");
                job.deliver(JobResult::failure(JobError::NoNodesAvailable));
                continue;
            }

            match tokio::time::timeout(self.config.job_send_timeout, job_tx.send(job.clone())).await
            {
                Ok(Ok(())) => {} // job was taken by the pool
                Ok(Err(_)) | Err(_) => {
                    let requests_in_queue = self.queue.num_requests().await;
                    warn!(
                        requests_in_queue,
                        "job was not taken by a node",
                    );
                    job.deliver(JobResult::failure(JobError::NodeTimeout));
                }
            }
        }
    }
}
