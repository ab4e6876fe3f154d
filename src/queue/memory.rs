//! In-process queue built on flume with visibility-timeout redelivery.
//!
//! Each delivery gets a watchdog task: if the consumer settles first the
//! watchdog is woken and exits; if the visibility timeout fires first the
//! job is requeued with `attempt + 1`. A shared settled flag decides the
//! race, so a late ack after a timeout redelivery is a no-op (the duplicate
//! is then absorbed by the worker's status guard, per the at-least-once
//! contract).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::model::ProcessingJob;
use crate::queue::{Delivery, JobQueue, Settle};

pub struct MemoryQueue {
    tx: flume::Sender<ProcessingJob>,
    rx: flume::Receiver<ProcessingJob>,
    dead: Arc<Mutex<Vec<ProcessingJob>>>,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            dead: Arc::new(Mutex::new(Vec::new())),
            visibility_timeout,
        }
    }

    /// Jobs currently waiting for delivery (excludes leased jobs).
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("pending", &self.pending())
            .field("visibility_timeout", &self.visibility_timeout)
            .finish()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: ProcessingJob) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| PipelineError::unavailable("queue", "closed"))
    }

    async fn consume(&self) -> Result<Delivery> {
        let job = self
            .rx
            .recv_async()
            .await
            .map_err(|_| PipelineError::unavailable("queue", "closed"))?;

        let settled = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = oneshot::channel::<()>();

        // Watchdog: requeue unless the consumer settles in time. A dropped
        // settler (consumer died mid-flight) counts as not settled; the lease
        // still runs out before redelivery.
        let watchdog_job = job.clone();
        let watchdog_settled = settled.clone();
        let requeue_tx = self.tx.clone();
        let visibility = self.visibility_timeout;
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + visibility;
            let woken = tokio::select! {
                res = wake_rx => res.is_ok(),
                _ = tokio::time::sleep_until(deadline) => false,
            };
            if !woken {
                tokio::time::sleep_until(deadline).await;
                if !watchdog_settled.swap(true, Ordering::SeqCst) {
                    debug!(
                        document_id = %watchdog_job.document_id,
                        attempt = watchdog_job.attempt,
                        "visibility timeout elapsed, redelivering"
                    );
                    let _ = requeue_tx.send(watchdog_job.retry());
                }
            }
        });

        let settler = MemorySettler {
            job: job.clone(),
            settled,
            wake: wake_tx,
            requeue_tx: self.tx.clone(),
            dead: self.dead.clone(),
        };
        Ok(Delivery::new(job, Box::new(settler)))
    }

    async fn drain_dead_letters(&self) -> Result<Vec<ProcessingJob>> {
        Ok(std::mem::take(&mut *self.dead.lock()))
    }
}

struct MemorySettler {
    job: ProcessingJob,
    settled: Arc<AtomicBool>,
    wake: oneshot::Sender<()>,
    requeue_tx: flume::Sender<ProcessingJob>,
    dead: Arc<Mutex<Vec<ProcessingJob>>>,
}

impl MemorySettler {
    /// First settlement wins; the loser (consumer or watchdog) is a no-op.
    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl Settle for MemorySettler {
    async fn ack(self: Box<Self>) {
        self.claim();
        let _ = self.wake.send(());
    }

    async fn nack(self: Box<Self>) {
        if self.claim() {
            let _ = self.requeue_tx.send(self.job.clone().retry());
        }
        let _ = self.wake.send(());
    }

    async fn dead_letter(self: Box<Self>) {
        if self.claim() {
            self.dead.lock().push(self.job.clone());
        }
        let _ = self.wake.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> ProcessingJob {
        let id = Uuid::new_v4();
        ProcessingJob::new(id, format!("documents/{id}/original"))
    }

    #[tokio::test]
    async fn enqueue_then_consume_delivers_the_job() {
        let queue = MemoryQueue::new(Duration::from_secs(30));
        let sent = job();
        queue.enqueue(sent.clone()).await.unwrap();
        let delivery = queue.consume().await.unwrap();
        assert_eq!(delivery.job, sent);
        delivery.ack().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsettled_delivery_is_redelivered_with_incremented_attempt() {
        let queue = MemoryQueue::new(Duration::from_secs(30));
        queue.enqueue(job()).await.unwrap();

        let first = queue.consume().await.unwrap();
        let document_id = first.job.document_id;
        assert_eq!(first.job.attempt, 0);
        drop(first); // consumer died without settling

        let second = queue.consume().await.unwrap();
        assert_eq!(second.job.document_id, document_id);
        assert_eq!(second.job.attempt, 1);
        second.ack().await;
    }

    #[tokio::test(start_paused = true)]
    async fn acked_delivery_is_never_redelivered() {
        let queue = MemoryQueue::new(Duration::from_secs(30));
        queue.enqueue(job()).await.unwrap();
        queue.consume().await.unwrap().ack().await;

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn nack_requeues_immediately() {
        let queue = MemoryQueue::new(Duration::from_secs(30));
        queue.enqueue(job()).await.unwrap();
        queue.consume().await.unwrap().nack().await;

        let redelivered = queue.consume().await.unwrap();
        assert_eq!(redelivered.job.attempt, 1);
        redelivered.ack().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letter_lands_in_the_sink_exactly_once() {
        let queue = MemoryQueue::new(Duration::from_secs(30));
        let sent = job();
        queue.enqueue(sent.clone()).await.unwrap();
        queue.consume().await.unwrap().dead_letter().await;

        // Dead-lettered jobs are settled: no redelivery even past the
        // visibility timeout.
        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(queue.pending(), 0);

        let drained = queue.drain_dead_letters().await.unwrap();
        assert_eq!(drained, vec![sent]);
        assert!(queue.drain_dead_letters().await.unwrap().is_empty());
    }
}
