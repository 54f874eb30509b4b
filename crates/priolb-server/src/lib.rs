//! priolb server
//!
//! This crate implements a priority-aware HTTP load balancer for JSON
//! payloads. Clients POST a payload, the frontend buffers it in a
//! three-class priority queue, and a dispatcher hands it to one of several
//! equivalent execution nodes through a shared, bounded job channel.
//!
//! # Architecture
//!
//! ```text
//! client ── POST / ──▶ http frontend ──▶ PrioQueue ──▶ Dispatcher
//!                           ▲                               │
//!                           │ response slot        shared job channel
//!                           │                               │
//!                           └────── node worker ◀───────────┘
//!                                      │
//!                                      ▼
//!                               execution node (POST)
//! ```
//!
//! # Key design decisions
//!
//! ## Fair extraction
//!
//! The queue has three classes: fast-track, high-prio and low-prio.
//! Low-prio is strictly starved by the other two; fast-track and high-prio
//! are interleaved at a configurable ratio (default 2:1) so a busy
//! fast-track lane cannot starve high-prio completely. FIFO order holds
//! within each class.
//!
//! ## Shared job channel
//!
//! Every worker of every node reads from one bounded channel owned by the
//! pool. Free capacity is the union of idle workers across the fleet, and
//! backpressure is a function of total concurrency; there is no per-node
//! routing.
//!
//! ## Response rendezvous
//!
//! Each job owns a capacity-1 response slot with a non-blocking deliver.
//! If the client has disconnected, the delivery simply reports that nobody
//! was listening; that is a normal outcome, not an error.
//!
//! ## Retries
//!
//! Upstream failures marked retriable are re-queued at the tail of their
//! class up to a configurable number of attempts; the final failure is
//! propagated to the client with the upstream status and body when there
//! is one.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod job;
pub mod node;
pub mod node_pool;
pub mod queue;
pub mod server;
pub mod store;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{JobError, NodeError, ServerError, StoreError};
pub use http::{AppState, NodeUriPayload};
pub use job::{CancelOnDrop, Job, JobResult, Priority};
pub use node::{Node, ProxyError, SharedJobReceiver};
pub use node_pool::NodePool;
pub use queue::PrioQueue;
pub use server::{Server, ServerOpts};
pub use store::NodeStateStore;
