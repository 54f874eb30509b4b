use std::time::Duration;

use tracing::info;

/// Runtime tunables for the load balancer.
///
/// Every field can be overridden through the environment; the variable name
/// is listed on each field. [`Config::default`] returns the production
/// defaults, [`Config::from_env`] applies the environment on top of them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffer of the shared job channel between the dispatcher and the node
    /// workers (`JOB_CHAN_BUFFER`).
    pub job_channel_buffer: usize,

    /// Maximum attempts per job, counting the first one. 3 means a job is
    /// retried twice and the third error is final (`RETRIES_MAX`).
    pub request_max_tries: u32,

    /// Maximum accepted payload size in bytes. Larger requests are rejected
    /// with 400 (`PAYLOAD_MAX_KB`, in KiB).
    pub payload_max_bytes: usize,

    /// Per-class queue caps; 0 means no limit (`ITEMS_FASTTRACK_MAX`,
    /// `ITEMS_HIGHPRIO_MAX`, `ITEMS_LOWPRIO_MAX`).
    pub max_queue_items_fast_track: usize,
    pub max_queue_items_high_prio: usize,
    pub max_queue_items_low_prio: usize,

    /// How many fast-track items are popped before one high-prio item gets
    /// a turn (`ITEMS_FASTTRACK_PER_HIGHPRIO`).
    pub fast_track_per_high_prio: u32,

    /// Fully drain the fast-track queue before serving any high-prio item,
    /// bypassing the interleave counter (`FASTTRACK_DRAIN_FIRST=1`).
    pub fast_track_drain_first: bool,

    /// Time between job creation and pickup by a worker, after which the
    /// job is not processed anymore (`REQUEST_TIMEOUT`, seconds).
    pub request_timeout: Duration,

    /// How long the dispatcher tries to hand a job to the node pool before
    /// giving up (`JOB_SEND_TIMEOUT`, seconds).
    pub job_send_timeout: Duration,

    /// HTTP timeout for proxy requests to a backend node
    /// (`REQUEST_PROXY_TIMEOUT`, seconds).
    pub proxy_request_timeout: Duration,

    /// HTTP timeout for the admission health check.
    pub health_check_timeout: Duration,

    /// Concurrent proxy workers per node, unless the node URI overrides it
    /// with a `_workers` query parameter (`NUM_NODE_WORKERS`).
    pub workers_per_node: u32,

    /// Key prefix in the node-state store (`REDIS_PREFIX`).
    pub redis_prefix: String,

    /// Connection-pool tuning for the upstream HTTP client
    /// (`PROXY_MAX_IDLE_PER_HOST`, `PROXY_IDLE_TIMEOUT` seconds).
    pub proxy_max_idle_per_host: usize,
    pub proxy_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_channel_buffer: 2,
            request_max_tries: 3,
            payload_max_bytes: 8192 * 1024,
            max_queue_items_fast_track: 0,
            max_queue_items_high_prio: 0,
            max_queue_items_low_prio: 0,
            fast_track_per_high_prio: 2,
            fast_track_drain_first: false,
            request_timeout: Duration::from_secs(5),
            job_send_timeout: Duration::from_secs(2),
            proxy_request_timeout: Duration::from_secs(3),
            health_check_timeout: Duration::from_secs(5),
            workers_per_node: 8,
            redis_prefix: "priolb:".to_string(),
            proxy_max_idle_per_host: 100,
            proxy_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl Config {
    /// Builds a config from the defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            job_channel_buffer: env_usize("JOB_CHAN_BUFFER", defaults.job_channel_buffer),
            request_max_tries: env_u32("RETRIES_MAX", defaults.request_max_tries),
            payload_max_bytes: env_usize("PAYLOAD_MAX_KB", defaults.payload_max_bytes / 1024)
                * 1024,
            max_queue_items_fast_track: env_usize("ITEMS_FASTTRACK_MAX", 0),
            max_queue_items_high_prio: env_usize("ITEMS_HIGHPRIO_MAX", 0),
            max_queue_items_low_prio: env_usize("ITEMS_LOWPRIO_MAX", 0),
            fast_track_per_high_prio: env_u32(
                "ITEMS_FASTTRACK_PER_HIGHPRIO",
                defaults.fast_track_per_high_prio,
            ),
            fast_track_drain_first: env_flag("FASTTRACK_DRAIN_FIRST"),
            request_timeout: env_secs("REQUEST_TIMEOUT", defaults.request_timeout),
            job_send_timeout: env_secs("JOB_SEND_TIMEOUT", defaults.job_send_timeout),
            proxy_request_timeout: env_secs("REQUEST_PROXY_TIMEOUT", defaults.proxy_request_timeout),
            health_check_timeout: defaults.health_check_timeout,
            workers_per_node: env_u32("NUM_NODE_WORKERS", defaults.workers_per_node),
            redis_prefix: env_string("REDIS_PREFIX", &defaults.redis_prefix),
            proxy_max_idle_per_host: env_usize(
                "PROXY_MAX_IDLE_PER_HOST",
                defaults.proxy_max_idle_per_host,
            ),
            proxy_idle_timeout: env_secs("PROXY_IDLE_TIMEOUT", defaults.proxy_idle_timeout),
        }
    }

    /// Logs the effective configuration once at startup.
    pub fn log(&self) {
        info!(
            job_channel_buffer = self.job_channel_buffer,
            request_max_tries = self.request_max_tries,
            payload_max_bytes = self.payload_max_bytes,
            max_queue_items_fast_track = self.max_queue_items_fast_track,
            max_queue_items_high_prio = self.max_queue_items_high_prio,
            max_queue_items_low_prio = self.max_queue_items_low_prio,
            fast_track_per_high_prio = self.fast_track_per_high_prio,
            fast_track_drain_first = self.fast_track_drain_first,
            request_timeout_secs = self.request_timeout.as_secs(),
            job_send_timeout_secs = self.job_send_timeout.as_secs(),
            proxy_request_timeout_secs = self.proxy_request_timeout.as_secs(),
            workers_per_node = self.workers_per_node,
            redis_prefix = %self.redis_prefix,
            proxy_max_idle_per_host = self.proxy_max_idle_per_host,
            proxy_idle_timeout_secs = self.proxy_idle_timeout.as_secs(),
            "config",
        );
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v == "1").unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.job_channel_buffer, 2);
        assert_eq!(config.request_max_tries, 3);
        assert_eq!(config.payload_max_bytes, 8 * 1024 * 1024);
        assert_eq!(config.fast_track_per_high_prio, 2);
        assert!(!config.fast_track_drain_first);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.job_send_timeout, Duration::from_secs(2));
        assert_eq!(config.proxy_request_timeout, Duration::from_secs(3));
        assert_eq!(config.workers_per_node, 8);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("RETRIES_MAX", "5");
        std::env::set_var("PAYLOAD_MAX_KB", "16");
        std::env::set_var("FASTTRACK_DRAIN_FIRST", "1");
        let config = Config::from_env();
        assert_eq!(config.request_max_tries, 5);
        assert_eq!(config.payload_max_bytes, 16 * 1024);
        assert!(config.fast_track_drain_first);
        std::env::remove_var("RETRIES_MAX");
        std::env::remove_var("PAYLOAD_MAX_KB");
        std::env::remove_var("FASTTRACK_DRAIN_FIRST");
    }

    #[test]
    fn test_env_invalid_values_fall_back() {
        std::env::set_var("JOB_SEND_TIMEOUT", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.job_send_timeout, Duration::from_secs(2));
        std::env::remove_var("JOB_SEND_TIMEOUT");
    }
}
