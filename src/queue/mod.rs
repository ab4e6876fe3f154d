//! Durable, at-least-once message transport between ingestion and workers.
//!
//! The queue owns redelivery: a delivery that is not settled within the
//! visibility timeout comes back with `attempt + 1`. No cross-job ordering
//! is guaranteed, and duplicate delivery is expected; the worker's status
//! guard is what makes that safe. Jobs that exhaust their retry budget are
//! routed to a dead-letter sink for manual inspection.

pub mod memory;

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::ProcessingJob;

pub use memory::MemoryQueue;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publish a job for processing.
    async fn enqueue(&self, job: ProcessingJob) -> Result<()>;

    /// Await the next delivery.
    ///
    /// Consumers see an infinite lazy sequence of deliveries; once the queue
    /// is closed the sequence ends and every further call fails. There is no
    /// restarting a closed consumer.
    async fn consume(&self) -> Result<Delivery>;

    /// Remove and return everything in the dead-letter sink.
    async fn drain_dead_letters(&self) -> Result<Vec<ProcessingJob>>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Transport-specific settlement of a single delivery.
///
/// Exactly one of the three outcomes may take effect; implementations must
/// tolerate the visibility-timeout watchdog racing a late settlement.
#[async_trait]
pub trait Settle: Send {
    /// The job is done (or a benign duplicate); do not redeliver.
    async fn ack(self: Box<Self>);

    /// Redeliver the job with `attempt + 1`.
    async fn nack(self: Box<Self>);

    /// Route the job to the dead-letter sink; do not redeliver.
    async fn dead_letter(self: Box<Self>);
}

/// A job leased to one consumer until settled or the visibility timeout
/// elapses.
pub struct Delivery {
    pub job: ProcessingJob,
    settler: Box<dyn Settle>,
}

impl Delivery {
    pub fn new(job: ProcessingJob, settler: Box<dyn Settle>) -> Self {
        Self { job, settler }
    }

    pub async fn ack(self) {
        self.settler.ack().await;
    }

    pub async fn nack(self) {
        self.settler.nack().await;
    }

    pub async fn dead_letter(self) {
        self.settler.dead_letter().await;
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("job", &self.job).finish()
    }
}
