//! A fixed-size worker pool with admission blocking on saturation.
//!
//! This is the sole backpressure mechanism in the runtime: fetch loops do
//! not read ahead, they block on [`BoundedPool::post`], which bounds
//! in-flight messages at `N` and stops pulling from the broker when
//! handlers are slow. Grounded on the `Arc<Semaphore>` +
//! `acquire_owned`/spawn pattern the teacher inlines per-batch in
//! `messaging::nats::worker::process_batch`, promoted here to a
//! standalone type since the spec makes it the sole backpressure
//! mechanism rather than one worker's implementation detail.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::BrokerError;

/// A fixed worker pool of `N` permits.
pub struct BoundedPool {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl BoundedPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            closed: Arc::new(AtomicBool::new(false)),
            handles: tokio::sync::Mutex::new(Vec::new()),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Block until a permit is available, then submit `task`. Returns
    /// `Err(BrokerError::PoolClosed)` immediately if the pool is
    /// shutting down — shutdown is a gate on new submissions, not an
    /// interrupt of running ones.
    pub async fn post<F>(&self, task: F) -> Result<(), BrokerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::PoolClosed);
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed directly");

        if self.closed.load(Ordering::SeqCst) {
            drop(permit);
            return Err(BrokerError::PoolClosed);
        }

        let handle = tokio::spawn(async move {
            task.await;
            drop(permit);
        });

        self.handles.lock().await.push(handle);
        Ok(())
    }

    /// Forbid new submissions. In-flight tasks keep running.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Join active workers with a deadline. Cancellation beyond the
    /// deadline is not attempted — handlers run to completion or are
    /// abandoned when the process exits. Returns `true` if every handler
    /// finished within `timeout`.
    pub async fn wait_for_termination(&self, timeout: Duration) -> bool {
        let mut handles = self.handles.lock().await;
        let pending = std::mem::take(&mut *handles);
        drop(handles);

        let drain = async {
            for handle in pending {
                if let Err(err) = handle.await {
                    warn!(error = %err, "handler task panicked during shutdown drain");
                }
            }
        };

        tokio::time::timeout(timeout, drain).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn post_runs_task() {
        let pool = BoundedPool::new(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();

        pool.post(async move {
            ran2.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        pool.wait_for_termination(Duration::from_secs(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_blocks_until_permit_frees_up() {
        let pool = Arc::new(BoundedPool::new(1));
        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();

        pool.post(async move {
            notify2.notified().await;
        })
        .await
        .unwrap();

        let pool2 = pool.clone();
        let second = tokio::spawn(async move { pool2.post(async {}).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished(), "second post should block on the held permit");

        notify.notify_one();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn post_rejects_after_shutdown() {
        let pool = BoundedPool::new(2);
        pool.shutdown();

        let result = pool.post(async {}).await;
        assert!(matches!(result, Err(BrokerError::PoolClosed)));
    }

    #[tokio::test]
    async fn wait_for_termination_respects_deadline() {
        let pool = BoundedPool::new(1);
        pool.post(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await
        .unwrap();

        let finished = pool.wait_for_termination(Duration::from_millis(20)).await;
        assert!(!finished, "slow handler should not finish within the deadline");
    }
}
