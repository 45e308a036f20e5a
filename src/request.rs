//! Request serializer: a FIFO single-consumer execution queue
//!
//! All ordering-sensitive herder state transitions run here, giving a single
//! writer for the whole orchestrator. Immediate submissions execute in
//! submission order; delayed submissions execute no earlier than their
//! deadline, interleaved with immediate work by readiness. Delayed
//! submissions return a cancellable [`PendingRequest`] handle.
//!
//! Shutdown closes intake, waits a bounded grace period for the queue to
//! drain, then aborts the consumer. An operation aborted this way may
//! abandon its caller's completion; the loss is bounded to the final
//! in-flight operation.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

type Op = BoxFuture<'static, ()>;

enum Submission {
    Immediate(Op),
    Delayed(DelayedEntry),
}

struct DelayedEntry {
    deadline: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    op: Op,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    // Reversed so the BinaryHeap pops the earliest deadline first; ties
    // resolve by arrival order.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

/// Handle to a scheduled, not-yet-executed operation.
///
/// Identified by a sequence number strictly increasing over the owning
/// serializer's lifetime. Cancellation is idempotent and a no-op once
/// execution has begun.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    seq: u64,
    cancelled: Arc<AtomicBool>,
}

impl PendingRequest {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PendingRequest {}

impl std::hash::Hash for PendingRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

/// The single logical worker executing submitted operations in arrival order.
pub struct RequestSerializer {
    tx: Mutex<Option<mpsc::UnboundedSender<Submission>>>,
    seq: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequestSerializer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx));
        Self {
            tx: Mutex::new(Some(tx)),
            seq: AtomicU64::new(0),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue an operation for immediate execution in arrival order.
    /// Returns false once shutdown has begun.
    pub fn submit<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(Submission::Immediate(Box::pin(fut))).is_ok(),
            None => false,
        }
    }

    /// Schedule an operation to run no earlier than `delay` from now.
    /// Returns `None` once shutdown has begun.
    pub fn submit_delayed<F>(&self, delay: Duration, fut: F) -> Option<PendingRequest>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = DelayedEntry {
            deadline: Instant::now() + delay,
            seq,
            cancelled: cancelled.clone(),
            op: Box::pin(fut),
        };
        let tx = self.tx.lock();
        let sent = match tx.as_ref() {
            Some(tx) => tx.send(Submission::Delayed(entry)).is_ok(),
            None => false,
        };
        sent.then_some(PendingRequest { seq, cancelled })
    }

    /// Stop accepting new work, wait up to `grace` for the queue (including
    /// still-pending delayed operations) to drain, then force-terminate.
    pub async fn shutdown(&self, grace: Duration) {
        self.tx.lock().take();
        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("request queue did not drain within grace period, aborting");
                handle.abort();
            }
        }
    }
}

impl Default for RequestSerializer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Submission>) {
    let mut delayed: BinaryHeap<DelayedEntry> = BinaryHeap::new();
    let mut open = true;
    loop {
        // Run everything whose deadline has passed, in deadline order.
        loop {
            match delayed.peek() {
                Some(entry) if entry.deadline <= Instant::now() => {}
                _ => break,
            }
            if let Some(entry) = delayed.pop() {
                if !entry.cancelled.load(Ordering::SeqCst) {
                    entry.op.await;
                }
            }
        }

        let next_deadline = delayed.peek().map(|e| e.deadline);
        if open {
            if let Some(deadline) = next_deadline {
                tokio::select! {
                    biased;
                    sub = rx.recv() => match sub {
                        Some(Submission::Immediate(op)) => op.await,
                        Some(Submission::Delayed(entry)) => delayed.push(entry),
                        None => open = false,
                    },
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            } else {
                match rx.recv().await {
                    Some(Submission::Immediate(op)) => op.await,
                    Some(Submission::Delayed(entry)) => delayed.push(entry),
                    None => open = false,
                }
            }
        } else if let Some(deadline) = next_deadline {
            // Intake closed: finish remaining scheduled work before exiting.
            tokio::time::sleep_until(deadline).await;
        } else {
            break;
        }
    }
}
