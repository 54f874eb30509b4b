use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::config::Config;
use crate::job::{Job, Priority};

/// Three-class buffered FIFO with a fair extraction policy.
///
/// Classes are served as follows:
/// - low-prio items are only served while fast-track and high-prio are both
///   empty;
/// - between fast-track and high-prio, every `fast_track_per_high_prio`
///   fast-track pops one high-prio item gets a turn (unless
///   `fast_track_drain_first` is set, in which case fast-track is drained
///   completely first);
/// - within a class, strict FIFO.
///
/// Safe for any number of concurrent pushers and poppers; every pushed job
/// is handed to exactly one popper. [`PrioQueue::pop`] blocks while the
/// queue is open and empty and returns `None` only once the queue is closed
/// and drained.
pub struct PrioQueue {
    inner: Mutex<Inner>,
    /// One permit per push; broadcast on close so all poppers observe
    /// termination.
    job_ready: Notify,
    /// Broadcast whenever the queue becomes empty after close.
    drained: Notify,
    closed: AtomicBool,

    max_fast_track: usize,
    max_high_prio: usize,
    max_low_prio: usize,
    fast_track_per_high_prio: u32,
    fast_track_drain_first: bool,
}

#[derive(Default)]
struct Inner {
    fast_track: VecDeque<Arc<Job>>,
    high_prio: VecDeque<Arc<Job>>,
    low_prio: VecDeque<Arc<Job>>,
    /// Fast-track pops since the last high-prio turn.
    n_fast_track: u32,
}

impl Inner {
    fn len(&self) -> usize {
        self.fast_track.len() + self.high_prio.len() + self.low_prio.len()
    }
}

impl PrioQueue {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            job_ready: Notify::new(),
            drained: Notify::new(),
            closed: AtomicBool::new(false),
            max_fast_track: config.max_queue_items_fast_track,
            max_high_prio: config.max_queue_items_high_prio,
            max_low_prio: config.max_queue_items_low_prio,
            fast_track_per_high_prio: config.fast_track_per_high_prio,
            fast_track_drain_first: config.fast_track_drain_first,
        }
    }

    /// Appends a job to its class FIFO and wakes one popper. Returns false
    /// if the queue is closed or the class cap is reached.
    pub async fn push(&self, job: Arc<Job>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        {
            let mut inner = self.inner.lock().await;

            // Closed may have flipped while waiting for the lock.
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }

            let (class, cap) = match job.priority {
                Priority::FastTrack => (&mut inner.fast_track, self.max_fast_track),
                Priority::High => (&mut inner.high_prio, self.max_high_prio),
                Priority::Low => (&mut inner.low_prio, self.max_low_prio),
            };
            if cap > 0 && class.len() >= cap {
                return false;
            }
            class.push_back(job);
        }

        self.job_ready.notify_one();
        true
    }

    /// Takes the next job per the fairness policy. Blocks while the queue
    /// is open and empty; returns `None` once it is closed and drained.
    pub async fn pop(&self) -> Option<Arc<Job>> {
        loop {
            // Register for a wakeup before checking state, so a push or
            // close landing in between cannot be missed.
            let notified = self.job_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = self.take_next(&mut inner) {
                    if self.closed.load(Ordering::SeqCst) && inner.len() == 0 {
                        self.drained.notify_waiters();
                    }
                    return Some(job);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn take_next(&self, inner: &mut Inner) -> Option<Arc<Job>> {
        let mut prefer_fast_track = !inner.fast_track.is_empty();
        if prefer_fast_track {
            if !self.fast_track_drain_first {
                inner.n_fast_track += 1;
                if inner.n_fast_track > self.fast_track_per_high_prio {
                    inner.n_fast_track = 0;
                    prefer_fast_track = false;
                }
            }
        } else {
            inner.n_fast_track = 0;
        }

        if prefer_fast_track {
            inner
                .fast_track
                .pop_front()
                .or_else(|| inner.high_prio.pop_front())
                .or_else(|| inner.low_prio.pop_front())
        } else {
            inner
                .high_prio
                .pop_front()
                .or_else(|| inner.fast_track.pop_front())
                .or_else(|| inner.low_prio.pop_front())
        }
    }

    /// Current (fast-track, high-prio, low-prio) lengths.
    pub async fn len(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().await;
        (
            inner.fast_track.len(),
            inner.high_prio.len(),
            inner.low_prio.len(),
        )
    }

    pub async fn num_requests(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Disallows further pushes and lets blocked poppers return `None` once
    /// the queue is empty.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.job_ready.notify_waiters();
        let inner = self.inner.lock().await;
        if inner.len() == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Closes the queue and blocks until it has been drained by poppers.
    pub async fn close_and_wait(&self) {
        self.close().await;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if self.inner.lock().await.len() == 0 {
                return;
            }
            drained.await;
        }
    }
}
