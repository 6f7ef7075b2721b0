//! Per-client admission serialization.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use ahash::HashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Funnels concurrent admission calls for one client through a FIFO queue.
///
/// The counter transaction is atomic, but without serialization two calls
/// for the same client could still resolve out of arrival order. The head of
/// a client's queue runs immediately; every later call parks on a one-shot
/// wakeup until its predecessor reaches a terminal outcome. The queue mutex
/// guards queue manipulation only and is never held across an await.
#[derive(Debug, Default)]
pub struct ClientSerializer {
    queues: Mutex<HashMap<String, VecDeque<Waiter>>>,
    next_id: AtomicU64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    /// `None` for the entry currently holding the head slot.
    wakeup: Option<oneshot::Sender<()>>,
}

impl ClientSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` once every earlier call for `client_id` has finished.
    ///
    /// The queue entry is drained on every terminal outcome (completion,
    /// error, or the caller dropping this future), so one abandoned call can
    /// never wedge a client's queue.
    pub async fn run<F, T>(&self, client_id: &str, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wakeup = self.enqueue(client_id, id);
        let _guard = DrainGuard {
            serializer: self,
            client_id: client_id.to_string(),
            id,
        };
        if let Some(wakeup) = wakeup {
            let _ = wakeup.await;
        }
        op.await
    }

    fn enqueue(&self, client_id: &str, id: u64) -> Option<oneshot::Receiver<()>> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(client_id.to_string()).or_default();
        if queue.is_empty() {
            queue.push_back(Waiter { id, wakeup: None });
            None
        } else {
            let (tx, rx) = oneshot::channel();
            queue.push_back(Waiter {
                id,
                wakeup: Some(tx),
            });
            Some(rx)
        }
    }

    fn finish(&self, client_id: &str, id: u64) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(client_id) else {
            return;
        };
        if let Some(position) = queue.iter().position(|waiter| waiter.id == id) {
            queue.remove(position);
            if position == 0 {
                // Promote the next waiter. One whose caller is already gone
                // cannot be woken; skip it, its own guard makes the removal
                // here a no-op.
                while let Some(head) = queue.front_mut() {
                    let Some(wakeup) = head.wakeup.take() else {
                        break;
                    };
                    if wakeup.send(()).is_ok() {
                        break;
                    }
                    queue.pop_front();
                }
            }
        }
        if queue.is_empty() {
            queues.remove(client_id);
        }
    }
}

struct DrainGuard<'a> {
    serializer: &'a ClientSerializer,
    client_id: String,
    id: u64,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.serializer.finish(&self.client_id, self.id);
    }
}
