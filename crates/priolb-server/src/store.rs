use redis::AsyncCommands;
use tracing::debug;

use crate::error::StoreError;

/// Persists the node URI list as a JSON array under a single key, so the
/// node set survives restarts. A missing key means "no nodes yet".
pub struct NodeStateStore {
    conn: redis::aio::ConnectionManager,
    key: String,
}

impl NodeStateStore {
    /// Connects to the store and verifies the connection with a ping, so a
    /// bad store URI fails at startup rather than on the first save.
    pub async fn connect(uri: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(uri)?;
        let mut conn = client.get_connection_manager().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(Self {
            conn,
            key: format!("{prefix}nodes"),
        })
    }

    pub async fn save_nodes(&self, uris: &[String]) -> Result<(), StoreError> {
        let payload = serde_json::to_string(uris)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, payload).await?;
        debug!(num_nodes = uris.len(), "saved node list to store");
        Ok(())
    }

    pub async fn load_nodes(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&self.key).await?;
        match raw {
            None => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }
}
