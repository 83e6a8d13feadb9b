use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::ServerInstance;

/// Race tickets consumed by the discovery loop
pub(crate) type ProbeTicketQueue = ProbeRaceQueue<Arc<ServerInstance>>;

/// Decouples "submit N concurrent probe jobs" from "consume results as they
/// arrive, bounded by a shrinking deadline".
///
/// Jobs run as fire-and-forget tasks; results funnel through one channel.
/// Jobs never drained (because the caller stopped after a winner) are
/// abandoned, not cancelled: they finish naturally and their results stay
/// buffered for whoever still holds a queue handle.
pub struct ProbeRaceQueue<T> {
    inner: Arc<RaceInner<T>>,
}

struct RaceInner<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
    /// Submitted but not yet drained
    pending: AtomicUsize,
}

impl<T> Clone for ProbeRaceQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ProbeRaceQueue<T>
where T: Send + 'static
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ProbeRaceQueue<T>
where T: Send + 'static
{
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(RaceInner {
                tx,
                rx: Mutex::new(rx),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Enqueues one unit of work on the runtime; never blocks the submitter.
    pub fn submit<F>(
        &self,
        job: F,
    ) where
        F: Future<Output = T> + Send + 'static,
    {
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        let tx = self.inner.tx.clone();
        tokio::spawn(async move {
            // The receiver side may already have been dropped by an abandoned
            // race; the result is simply discarded then.
            let _ = tx.send(job.await);
        });
    }

    /// Waits for the next completed job, bounded by `budget`.
    ///
    /// Returns `None` immediately when every submitted job has already been
    /// drained, or when the budget elapses first. An already-buffered result
    /// is returned even with a zero budget.
    pub async fn drain(
        &self,
        budget: Duration,
    ) -> Option<T> {
        if self.inner.pending.load(Ordering::SeqCst) == 0 {
            return None;
        }

        let mut rx = self.inner.rx.lock().await;
        match tokio::time::timeout(budget, rx.recv()).await {
            Ok(Some(ticket)) => {
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                Some(ticket)
            }
            // Unreachable while this queue holds its sender, kept for safety
            Ok(None) => None,
            Err(_elapsed) => None,
        }
    }

    /// Number of submitted jobs whose results have not been drained yet
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }
}
