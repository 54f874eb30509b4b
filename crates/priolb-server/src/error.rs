use thiserror::Error;

/// Failures a job can surface to the waiting client.
///
/// `UpstreamStatus` and `Transport` are retriable (the worker sets the retry
/// hint on the result); the rest are terminal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("request timeout hit before processing")]
    RequestTimeout,

    #[error("node timeout")]
    NodeTimeout,

    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("error in upstream response - status code: {status}")]
    UpstreamStatus { status: u16 },

    #[error("proxying request failed: {0}")]
    Transport(String),
}

/// Failures constructing or admitting a node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid node uri: {0}")]
    InvalidUri(String),

    #[error("building upstream http client failed: {0}")]
    Client(String),

    #[error("health check failed: {0}")]
    HealthCheck(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the node-state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt node list: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Failures running the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
