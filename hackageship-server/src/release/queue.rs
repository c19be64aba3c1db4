use super::models::ReleaseJob;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("The release worker is no longer accepting jobs")]
pub struct QueueClosed;

/// Producer side of the release queue. Cheap to clone, one per request.
#[derive(Debug, Clone)]
pub struct ReleaseQueue {
    sender: mpsc::Sender<ReleaseJob>,
}

/// Consumer side of the release queue. There is exactly one, and it belongs
/// to the release worker: every job runs against the same work area, so
/// jobs must never overlap.
#[derive(Debug)]
pub struct ReleaseReceiver {
    receiver: mpsc::Receiver<ReleaseJob>,
}

pub fn release_queue(capacity: usize) -> (ReleaseQueue, ReleaseReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    (ReleaseQueue { sender }, ReleaseReceiver { receiver })
}

impl ReleaseQueue {
    /// Waits for room when the queue is full rather than dropping the job.
    pub async fn enqueue(&self, job: ReleaseJob) -> Result<(), QueueClosed> {
        self.sender.send(job).await.map_err(|_| QueueClosed)
    }

    pub fn max_capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl ReleaseReceiver {
    pub async fn next_job(&mut self) -> Option<ReleaseJob> {
        self.receiver.recv().await
    }
}
