use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use reqwest::header;
use reqwest::Url;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{JobError, NodeError};
use crate::job::{Job, JobResult};

/// Receiving end of the pool's shared job channel. Every worker of every
/// node drains the same receiver; the lock is held only while waiting for
/// one job, so free capacity is the union of idle workers across the fleet.
pub type SharedJobReceiver = Arc<Mutex<mpsc::Receiver<Arc<Job>>>>;

/// Fixed probe sent by the admission health check.
const HEALTH_CHECK_PAYLOAD: &str =
    r#"{"jsonrpc":"2.0","method":"net_version","params":[],"id":123}"#;

/// Outcome of one upstream call, before it is folded into a [`JobResult`].
#[derive(Debug)]
pub enum ProxyError {
    /// Upstream answered with status >= 400; the body is kept so it can be
    /// propagated to the client verbatim.
    Status { status: u16, body: Bytes },
    /// Connect, timeout or read failure.
    Transport(String),
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::Status { status, body } => write!(
                f,
                "error in response - status code: {} / {}",
                status,
                String::from_utf8_lossy(body)
            ),
            ProxyError::Transport(err) => write!(f, "proxying request failed: {err}"),
        }
    }
}

/// One upstream execution endpoint plus its cohort of proxy workers.
///
/// All workers read from the shared job channel of the enclosing pool. Each
/// `start_workers` call creates a fresh cancellation token, so an old cohort
/// can be torn down without racing a new one. Nodes are equal iff their URI
/// strings are equal.
pub struct Node {
    pub uri: String,
    pub added_at: SystemTime,
    base_url: Url,
    num_workers: u32,
    cur_workers: Arc<AtomicU32>,
    cohort: Mutex<Option<CancellationToken>>,
    job_rx: SharedJobReceiver,
    client: reqwest::Client,
    request_timeout: Duration,
    proxy_timeout: Duration,
    health_timeout: Duration,
}

impl Node {
    /// Parses the URI (a `_workers=N` query parameter overrides the
    /// configured worker count) and builds the upstream HTTP client. Does
    /// not run the health check or start workers.
    pub fn new(uri: &str, job_rx: SharedJobReceiver, config: &Config) -> Result<Self, NodeError> {
        let base_url = Url::parse(uri).map_err(|err| NodeError::InvalidUri(err.to_string()))?;

        let mut num_workers = config.workers_per_node;
        if let Some((_, value)) = base_url.query_pairs().find(|(key, _)| key == "_workers") {
            match value.parse::<u32>() {
                Ok(n) => {
                    info!(workers = n, uri, "using custom number of workers");
                    num_workers = n;
                }
                Err(err) => error!(%err, uri, "invalid _workers query param"),
            }
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.proxy_max_idle_per_host)
            .pool_idle_timeout(config.proxy_idle_timeout)
            .build()
            .map_err(|err| NodeError::Client(err.to_string()))?;

        Ok(Self {
            uri: uri.to_string(),
            added_at: SystemTime::now(),
            base_url,
            num_workers,
            cur_workers: Arc::new(AtomicU32::new(0)),
            cohort: Mutex::new(None),
            job_rx,
            client,
            request_timeout: config.request_timeout,
            proxy_timeout: config.proxy_request_timeout,
            health_timeout: config.health_check_timeout,
        })
    }

    /// Admission gate: a `net_version` probe that must answer below 400.
    pub async fn health_check(&self) -> Result<(), NodeError> {
        self.proxy_request(Bytes::from_static(HEALTH_CHECK_PAYLOAD.as_bytes()), None, self.health_timeout)
            .await
            .map(|_| ())
            .map_err(|err| NodeError::HealthCheck(err.to_string()))
    }

    /// POSTs the payload to the node and returns the response body.
    ///
    /// Status >= 400 comes back as [`ProxyError::Status`] with the upstream
    /// body; connect/timeout/read failures as [`ProxyError::Transport`].
    pub async fn proxy_request(
        &self,
        payload: Bytes,
        target_path: Option<&str>,
        timeout: Duration,
    ) -> Result<Bytes, ProxyError> {
        let url = match target_path {
            Some(path) => self
                .base_url
                .join(path)
                .map_err(|err| ProxyError::Transport(format!("invalid target path: {err}")))?,
            None => self.base_url.clone(),
        };

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, payload.len())
            .body(payload)
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        if status >= 400 {
            return Err(ProxyError::Status { status, body });
        }
        Ok(body)
    }

    /// Spawns the proxy worker cohort. A cohort that is already running is
    /// cancelled first.
    pub async fn start_workers(self: Arc<Self>) {
        let mut cohort = self.cohort.lock().await;
        if let Some(prev) = cohort.take() {
            prev.cancel();
        }

        let token = CancellationToken::new();
        for id in 1..=self.num_workers {
            let node = self.clone();
            let token = token.clone();
            tokio::spawn(async move { node.worker_loop(id, token).await });
        }
        *cohort = Some(token);
    }

    /// Signals the current cohort to stop. In-flight upstream calls finish.
    pub async fn stop_workers(&self) {
        if let Some(token) = self.cohort.lock().await.as_ref() {
            token.cancel();
        }
    }

    /// Signals the cohort to stop and blocks until every worker has exited.
    pub async fn stop_workers_and_wait(&self) {
        self.stop_workers().await;
        while self.cur_workers.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Number of currently live workers.
    pub fn cur_workers(&self) -> u32 {
        self.cur_workers.load(Ordering::SeqCst)
    }

    /// Configured cohort size.
    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }

    async fn worker_loop(self: Arc<Self>, id: u32, token: CancellationToken) {
        info!(uri = %self.uri, id, "starting proxy node worker");
        self.cur_workers.fetch_add(1, Ordering::SeqCst);

        loop {
            let job = tokio::select! {
                _ = token.cancelled() => break,
                job = next_job(&self.job_rx) => match job {
                    Some(job) => job,
                    // Channel closed: the pool is gone.
                    None => break,
                },
            };
            self.process_job(job).await;
        }

        self.cur_workers.fetch_sub(1, Ordering::SeqCst);
        info!(uri = %self.uri, id, "node worker stopped");
    }

    async fn process_job(&self, job: Arc<Job>) {
        if job.is_cancelled() {
            return;
        }

        if job.age() > self.request_timeout {
            info!(id = %job.id, "request timed out before processing");
            job.deliver(JobResult::failure(JobError::RequestTimeout));
            return;
        }

        job.begin_attempt();
        let started = Instant::now();
        let outcome = self
            .proxy_request(
                job.payload.clone(),
                job.target_path.as_deref(),
                self.proxy_timeout,
            )
            .await;
        let sim_duration = started.elapsed();

        match outcome {
            Ok(body) => {
                let sent = job.deliver(JobResult {
                    payload: body,
                    node_uri: self.uri.clone(),
                    sim_duration,
                    ..Default::default()
                });
                if !sent {
                    warn!(
                        id = %job.id,
                        secs_since_created = job.age().as_secs_f64(),
                        "couldn't deliver node response, nobody is listening",
                    );
                }
            }
            Err(ProxyError::Status { status, body }) => {
                error!(uri = %self.uri, status, "node proxy request returned error status");
                job.deliver(JobResult {
                    status_code: status,
                    payload: body,
                    error: Some(JobError::UpstreamStatus { status }),
                    should_retry: true,
                    node_uri: self.uri.clone(),
                    sim_duration,
                });
            }
            Err(ProxyError::Transport(err)) => {
                error!(uri = %self.uri, %err, "node proxy request failed");
                job.deliver(JobResult {
                    error: Some(JobError::Transport(err)),
                    should_retry: true,
                    node_uri: self.uri.clone(),
                    sim_duration,
                    ..Default::default()
                });
            }
        }
    }
}

async fn next_job(job_rx: &SharedJobReceiver) -> Option<Arc<Job>> {
    job_rx.lock().await.recv().await
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("uri", &self.uri)
            .field("num_workers", &self.num_workers)
            .field("cur_workers", &self.cur_workers())
            .finish()
    }
}
