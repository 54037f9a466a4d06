//! Background job dispatcher
//!
//! A lightweight job queue over flume channels. Request handlers dispatch
//! work that must not hold up the update loop (broadcast fanout) and a
//! dedicated worker task drains the queue.

use anyhow::Result;

use crate::broadcast::BroadcastPayload;
use crate::model::UserId;

/// Background jobs that can be dispatched to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Deliver a payload to every known user except the operator who asked.
    ///
    /// The outcome is reported back to the operator when the fanout finishes.
    Broadcast {
        operator: UserId,
        payload: BroadcastPayload,
    },
}

/// Job dispatcher that can be cloned and shared across tasks
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a new job dispatcher and receiver pair
    ///
    /// The dispatcher can be cloned and shared, while the receiver should be
    /// given to the worker task.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Dispatch a job to the background worker
    ///
    /// This is non-blocking and will succeed unless the receiver has been dropped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::debug!(?job, "dispatching job");
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    pub fn dispatch_broadcast(&self, operator: UserId, payload: BroadcastPayload) -> Result<()> {
        self.dispatch(Job::Broadcast { operator, payload })
    }
}

/// Job receiver for the background worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Try to receive a job without blocking
    ///
    /// Returns None if no jobs are available or all senders have been dropped.
    pub fn try_recv(&self) -> Option<Job> {
        self.rx.try_recv().ok()
    }

    /// Get an async stream of jobs, ending once every dispatcher is dropped
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}
