use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Only one job may wait behind the running one
const QUEUE_CHANNEL_SIZE: usize = 1;

pub type Job = BoxFuture<'static, ()>;

/// A bounded work queue with max-concurrency 1.
///
/// Jobs run one after another on a single worker task, so work submitted to the same
/// queue never overlaps. `cancel` aborts the worker, dropping the running job and
/// everything still queued.
pub struct SerialQueue {
    name: &'static str,
    tx: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl SerialQueue {
    pub fn new(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_CHANNEL_SIZE);

        // Spawn the worker; jobs are awaited in place, never spawned
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            log::debug!("utils::work_queue: {name} drained");
        });

        Self { name, tx, worker }
    }

    /// Enqueues `job` unless the queue already holds a pending job.
    ///
    /// Returns `false` when the job was skipped.
    pub fn try_enqueue(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("utils::work_queue: {} busy, skipping job", self.name);
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("utils::work_queue: {} cancelled, dropping job", self.name);
                false
            }
        }
    }

    /// Enqueues `job`, waiting for room in the queue.
    pub async fn enqueue(&self, job: Job) {
        if self.tx.send(job).await.is_err() {
            log::debug!("utils::work_queue: {} cancelled, dropping job", self.name);
        }
    }

    pub fn cancel(&self) {
        self.worker.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.worker.is_finished()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
