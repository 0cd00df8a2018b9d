//! Durable background job scheduling.
//!
//! Uploads never run inline with the intake loop. They are enqueued as
//! uniquely tagged jobs, executed by a [`Scheduler`] and observed through a
//! per-tag [`JobStatusStream`].
//!
//! - `enqueue_unique()` keeps an existing job with the same tag
//! - `cancel_by_tag()` drops a queued job; a running job finishes
//! - `status_stream()` reports Enqueued, Running, Succeeded, Failed, Cancelled

mod local;

pub use local::LocalScheduler;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use chatsync_core::FailureClass;

use crate::error::{EngineError, RemoteError, StorageError};

/// Conditions a job waits for before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConstraints {
    /// Only run while [`Connectivity`] reports online.
    pub require_network: bool,
}

impl Default for JobConstraints {
    fn default() -> Self {
        Self {
            require_network: true,
        }
    }
}

/// Why a job attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    /// Failure class; decides retry versus halt versus give up.
    pub class: FailureClass,
    /// Human-readable cause.
    pub message: String,
}

impl From<RemoteError> for JobFailure {
    fn from(err: RemoteError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for JobFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Remote(remote) => remote.into(),
            other => Self {
                class: FailureClass::Fatal,
                message: other.to_string(),
            },
        }
    }
}

/// Lifecycle of a tagged job as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// A new job was queued.
    Enqueued,
    /// The job started.
    Running,
    /// The job finished successfully.
    Succeeded,
    /// The attempt failed. Transient failures stay queued for a retry.
    Failed(JobFailure),
    /// A queued job was cancelled before it started.
    Cancelled,
}

impl JobStatus {
    /// Succeeded or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

/// A status change for one tag.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Job tag.
    pub tag: String,
    /// New status.
    pub status: JobStatus,
}

/// Work performed by a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt.
    async fn run(&self, payload: &[u8]) -> Result<(), JobFailure>;
}

/// Capability to schedule durable background jobs.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Attach the handler that runs jobs with `tag`.
    fn register(&self, tag: &str, handler: Arc<dyn JobHandler>);

    /// Queue a job unless one with `tag` is already queued or running.
    ///
    /// Returns whether a new job was queued.
    async fn enqueue_unique(
        &self,
        tag: &str,
        payload: Vec<u8>,
        constraints: JobConstraints,
    ) -> Result<bool, StorageError>;

    /// Drop a queued job that has not started. Returns whether one was dropped.
    async fn cancel_by_tag(&self, tag: &str) -> Result<bool, StorageError>;

    /// Observe status changes for `tag`.
    fn status_stream(&self, tag: &str) -> JobStatusStream;
}

/// Status updates for a single tag.
pub struct JobStatusStream {
    tag: String,
    rx: broadcast::Receiver<StatusUpdate>,
}

impl JobStatusStream {
    /// Filter `rx` down to updates for `tag`.
    pub fn new(tag: &str, rx: broadcast::Receiver<StatusUpdate>) -> Self {
        Self {
            tag: tag.to_string(),
            rx,
        }
    }

    /// Next status for the tag; `None` once the scheduler is gone.
    pub async fn next(&mut self) -> Option<JobStatus> {
        loop {
            match self.rx.recv().await {
                Ok(update) if update.tag == self.tag => return Some(update.status),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(tag = %self.tag, skipped, "job status stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Shared online/offline flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Start in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Update the state; waiting jobs re-check their constraints.
    pub fn set_online(&self, online: bool) {
        let previous = self.tx.send_replace(online);
        if previous != online {
            tracing::info!(online, "connectivity changed");
        }
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
