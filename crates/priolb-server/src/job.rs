use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::JobError;

/// Priority class of a job. Classes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    FastTrack,
    High,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

/// A queued proxy job.
///
/// Payload and priority are fixed at creation. The response slot is a
/// capacity-1 channel: [`Job::deliver`] never blocks and at most one result
/// fits until the frontend consumes it, so a job can travel through the
/// queue again for a retry after each delivery.
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub priority: Priority,
    pub payload: Bytes,
    pub target_path: Option<String>,
    pub created_at: Instant,
    tries: AtomicU32,
    cancelled: AtomicBool,
    result_tx: mpsc::Sender<JobResult>,
}

impl Job {
    /// Creates a job and hands back the receiving end of its response slot.
    pub fn new(
        id: impl Into<String>,
        priority: Priority,
        payload: impl Into<Bytes>,
        target_path: Option<String>,
    ) -> (Arc<Self>, mpsc::Receiver<JobResult>) {
        let (result_tx, result_rx) = mpsc::channel(1);
        let job = Arc::new(Self {
            id: id.into(),
            priority,
            payload: payload.into(),
            target_path,
            created_at: Instant::now(),
            tries: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            result_tx,
        });
        (job, result_rx)
    }

    /// Delivers a result without blocking. Returns false if the slot is
    /// already occupied or nobody is listening anymore; the result is
    /// dropped in that case, which is a normal outcome after a client
    /// disconnect.
    pub fn deliver(&self, result: JobResult) -> bool {
        self.result_tx.try_send(result).is_ok()
    }

    /// Attempts completed so far.
    pub fn tries(&self) -> u32 {
        self.tries.load(Ordering::SeqCst)
    }

    /// Counts a new attempt and returns the attempt number, starting at 1.
    /// Called by a worker right before the upstream call.
    pub fn begin_attempt(&self) -> u32 {
        self.tries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time since the job was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Outcome of one attempt at a job, delivered through the response slot.
///
/// A `status_code` of 0 means "not set": the frontend promotes it to 200 on
/// success and 500 on error when writing the client response.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub status_code: u16,
    pub payload: Bytes,
    pub error: Option<JobError>,
    /// Meaningful only together with `error`.
    pub should_retry: bool,
    pub node_uri: String,
    /// Duration of just the upstream call.
    pub sim_duration: Duration,
}

impl JobResult {
    /// A terminal failure with no upstream payload.
    pub fn failure(error: JobError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Flips a job's cancelled flag when dropped.
///
/// The frontend arms one of these after enqueueing: if the client
/// disconnects, axum drops the handler future and the guard marks the job
/// so the dispatcher and workers skip it. Disarm before writing the
/// response.
#[derive(Debug)]
pub struct CancelOnDrop {
    job: Option<Arc<Job>>,
}

impl CancelOnDrop {
    pub fn arm(job: Arc<Job>) -> Self {
        Self { job: Some(job) }
    }

    pub fn disarm(mut self) {
        self.job = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deliver_at_most_once_per_slot() {
        let (job, mut rx) = Job::new("1", Priority::High, "foo", None);
        assert!(job.deliver(JobResult::default()));
        // Slot is full until the receiver consumes it.
        assert!(!job.deliver(JobResult::default()));

        assert!(rx.try_recv().is_ok());
        // After consumption the slot is reusable for a retry attempt.
        assert!(job.deliver(JobResult::default()));
    }

    #[test]
    fn test_deliver_without_listener_is_dropped() {
        let (job, rx) = Job::new("1", Priority::Low, "foo", None);
        drop(rx);
        assert!(!job.deliver(JobResult::default()));
    }

    #[test]
    fn test_begin_attempt_counts_up() {
        let (job, _rx) = Job::new("1", Priority::Low, "foo", None);
        assert_eq!(job.tries(), 0);
        assert_eq!(job.begin_attempt(), 1);
        assert_eq!(job.begin_attempt(), 2);
        assert_eq!(job.tries(), 2);
    }

    #[test]
    fn test_cancel_on_drop_guard() {
        let (job, _rx) = Job::new("1", Priority::Low, "foo", None);
        {
            let _guard = CancelOnDrop::arm(job.clone());
        }
        assert!(job.is_cancelled());

        let (job, _rx) = Job::new("2", Priority::Low, "foo", None);
        let guard = CancelOnDrop::arm(job.clone());
        guard.disarm();
        assert!(!job.is_cancelled());
    }

    #[test]
    fn test_default_priority_is_low() {
        assert_eq!(Priority::default(), Priority::Low);
    }
}
