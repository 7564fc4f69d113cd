use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{DeployError, Result};
use crate::queue::job::Job;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Something that carries out one dequeued job.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job) -> Result<()>;
}

/// One unit of `outstanding` held by a producer until its job is buffered.
/// Released on drop unless committed.
struct OutstandingSlot<'a> {
    counter: &'a AtomicUsize,
    committed: bool,
}

impl<'a> OutstandingSlot<'a> {
    fn claim(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter,
            committed: false,
        }
    }

    /// The job is now in the buffer; the worker will release the unit.
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OutstandingSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Bounded FIFO of deployment jobs served by a single worker.
///
/// `size()` counts jobs that are buffered, blocked in `enqueue`, or being
/// executed. A job is only subtracted once its runner has returned, so the
/// count never drops to zero while work is still in flight.
#[derive(Debug, Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<Job>,
    outstanding: Arc<AtomicUsize>,
    capacity: usize,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let queue = Self {
            tx,
            outstanding: Arc::new(AtomicUsize::new(0)),
            capacity,
        };

        (queue, rx)
    }

    /// Append a job, waiting for space when the buffer is full.
    ///
    /// The job counts towards `size()` while waiting. If this future is
    /// dropped before the job is handed over, the count is given back.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let job_id = job.id;
        let slot = OutstandingSlot::claim(&self.outstanding);

        if self.tx.send(job).await.is_err() {
            return Err(DeployError::QueueClosed);
        }
        slot.commit();

        tracing::info!(job_id, size = self.size(), "Job enqueued");
        Ok(())
    }

    /// Append a job without waiting. Fails with `QueueFull` when the buffer
    /// has no free slot.
    pub fn try_enqueue(&self, job: Job) -> Result<()> {
        let job_id = job.id;
        self.outstanding.fetch_add(1, Ordering::SeqCst);

        match self.tx.try_send(job) {
            Ok(()) => {
                tracing::info!(job_id, size = self.size(), "Job enqueued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(job_id, capacity = self.capacity, "Update queue full");
                Err(DeployError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                Err(DeployError::QueueClosed)
            }
        }
    }

    /// Outstanding work: queued plus in-flight jobs.
    pub fn size(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Worker loop. Pulls jobs in order and runs them one at a time.
    ///
    /// Each job runs on its own task so a panicking runner is observed as a
    /// `JoinError` and logged; the loop then continues with the next job.
    /// Runs until the task driving it is aborted; the queue itself holds a
    /// sender, so the channel never closes underneath it.
    pub async fn work(&self, mut rx: mpsc::Receiver<Job>, runner: Arc<dyn JobRunner>) {
        tracing::info!("Starting update queue worker");

        while let Some(job) = rx.recv().await {
            let job_id = job.id;
            let target = job.target.to_string();
            tracing::info!(job_id, target = %target, "Processing job");

            let runner = runner.clone();
            let handle = tokio::spawn(async move { runner.run(job).await });

            match handle.await {
                Ok(Ok(())) => {
                    tracing::info!(job_id, target = %target, "Job finished");
                }
                Ok(Err(e)) => {
                    tracing::warn!(job_id, target = %target, error = %e, "Job failed");
                }
                Err(e) => {
                    tracing::error!(job_id, target = %target, error = %e, "Job runner aborted");
                }
            }

            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        tracing::info!("Update queue worker stopped");
    }

    /// Poll `size()` until it reaches zero.
    pub async fn drain(&self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            let size = self.size();
            if size == 0 {
                break;
            }
            tracing::info!(size, "Waiting for update queue to drain");
        }
    }
}
