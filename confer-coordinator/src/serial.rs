//! Per-space serialization
//!
//! Every space gets its own task draining a FIFO of jobs, so requests for
//! one space run strictly one after another in submission order while other
//! spaces proceed independently. A space task retires itself after a quiet
//! period and is recreated on the next submission.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use confer_core::SpaceId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// How long an idle space task waits before retiring
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SpaceSerializer {
    queues: Arc<DashMap<SpaceId, mpsc::UnboundedSender<Job>>>,
    idle_timeout: Duration,
}

impl SpaceSerializer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    #[must_use]
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            idle_timeout,
        }
    }

    /// Queue `job` behind every job already submitted for `space_id`.
    ///
    /// The position is fixed before this returns.
    pub fn submit<F>(&self, space_id: &SpaceId, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::pin(job);
        match self.queues.entry(space_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Err(mpsc::error::SendError(job)) = occupied.get().send(job) {
                    // The space task died; start over with a fresh one
                    let tx = self.spawn_runner(space_id.clone());
                    let _ = tx.send(job);
                    occupied.insert(tx);
                }
            }
            Entry::Vacant(vacant) => {
                let tx = self.spawn_runner(space_id.clone());
                let _ = tx.send(job);
                vacant.insert(tx);
            }
        }
    }

    /// Number of spaces with a running task
    #[must_use]
    pub fn active_spaces(&self) -> usize {
        self.queues.len()
    }

    fn spawn_runner(&self, space_id: SpaceId) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let own = tx.downgrade();
        let queues = Arc::clone(&self.queues);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            debug!(space_id = %space_id, "Space task started");
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(job)) => job.await,
                    Ok(None) => break,
                    Err(_) => {
                        // Submissions hold the map entry while sending, so an
                        // empty queue checked under the same entry stays empty.
                        let retired = queues
                            .remove_if(&space_id, |_, tx| {
                                own.upgrade().is_some_and(|mine| mine.same_channel(tx))
                                    && rx.is_empty()
                            })
                            .is_some();
                        if retired {
                            break;
                        }
                        trace!(space_id = %space_id, "Space task stays, jobs pending");
                    }
                }
            }
            debug!(space_id = %space_id, "Space task retired");
        });

        tx
    }
}

impl Default for SpaceSerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_for_one_space_run_in_order() {
        let serializer = SpaceSerializer::new();
        let space = SpaceId::from("room");
        let log = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel();

        for i in 0..20 {
            let log = Arc::clone(&log);
            serializer.submit(&space, async move {
                // Yield so an unserialized runner would interleave
                tokio::task::yield_now().await;
                log.lock().unwrap().push(i);
            });
        }
        serializer.submit(&space, async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        assert_eq!(*log.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_blocked_space_does_not_stall_others() {
        let serializer = SpaceSerializer::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (other_tx, other_rx) = oneshot::channel();

        serializer.submit(&SpaceId::from("slow"), async move {
            let _ = release_rx.await;
        });
        serializer.submit(&SpaceId::from("fast"), async move {
            let _ = other_tx.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), other_rx)
            .await
            .expect("other space was blocked")
            .unwrap();
        let _ = release_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_space_task_retires_and_restarts() {
        let serializer = SpaceSerializer::with_idle_timeout(Duration::from_millis(100));
        let space = SpaceId::from("room");

        let (tx, rx) = oneshot::channel();
        serializer.submit(&space, async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(serializer.active_spaces(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(serializer.active_spaces(), 0);

        let (tx, rx) = oneshot::channel();
        serializer.submit(&space, async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(serializer.active_spaces(), 1);
    }
}
