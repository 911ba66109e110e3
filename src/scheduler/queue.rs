//! Per-kind dispatch queues.
//!
//! Each renderer kind owns one bounded channel of generated-asset ids shared
//! by all of its workers. Sends never happen on the caller's task: every
//! [`DispatchQueue::enqueue`] spawns the send onto a [`TaskTracker`], racing a
//! [`CancellationToken`]. [`DispatchQueue::close`] cancels the token and
//! waits for every spawned send to land or be abandoned.
//!
//! ```text
//!  admission / sweep            DispatchQueue                 workers
//!  ─────────────────            ─────────────                 ───────
//!  enqueue(id) ──spawn──► [send | cancelled] ──► mpsc(200) ──► next()
//!                                  ▲
//!  close() ── cancel + wait ───────┘
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Default bounded capacity of a dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Bounded id channel for one renderer kind.
pub struct DispatchQueue {
    kind: String,
    tx: mpsc::Sender<String>,
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl DispatchQueue {
    pub fn new(kind: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            kind: kind.into(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Hands `id` to a background send. Returns false once the queue is
    /// closed; the id is then left for the next process to sweep.
    pub fn enqueue(&self, id: String) -> bool {
        if self.token.is_cancelled() {
            warn!(kind = %self.kind, id = %id, "Dispatch queue closed, dropping id");
            return false;
        }

        let tx = self.tx.clone();
        let token = self.token.clone();
        let kind = self.kind.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!(kind = %kind, id = %id, "Abandoned dispatch on queue close");
                }
                sent = tx.send(id.clone()) => match sent {
                    Ok(()) => debug!(kind = %kind, id = %id, "Dispatched"),
                    Err(_) => warn!(kind = %kind, id = %id, "Dispatch receiver dropped"),
                },
            }
        });
        true
    }

    /// Receiving half shared by the kind's workers.
    pub fn receiver(&self) -> QueueReceiver {
        QueueReceiver {
            rx: Arc::clone(&self.rx),
            token: self.token.clone(),
        }
    }

    /// Sends spawned but not yet delivered or abandoned.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Abandons in-flight sends and waits for their tasks to finish.
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Shared receiving half of a [`DispatchQueue`].
#[derive(Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
    token: CancellationToken,
}

impl QueueReceiver {
    /// Waits for the next id. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.token.cancelled() => None,
            id = rx.recv() => id,
        }
    }
}

/// An admission decision whose enqueue must wait until the asset's status
/// has been persisted.
#[must_use = "a pending dispatch does nothing until dispatched"]
pub struct PendingDispatch {
    queue: Arc<DispatchQueue>,
    id: String,
}

impl PendingDispatch {
    pub fn new(queue: Arc<DispatchQueue>, id: impl Into<String>) -> Self {
        Self {
            queue,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        self.queue.kind()
    }

    pub fn dispatch(self) -> bool {
        self.queue.enqueue(self.id)
    }
}
