//! In-process scheduler backed by the `jobs` table.

use super::{
    Connectivity, JobConstraints, JobHandler, JobStatus, JobStatusStream, Scheduler, StatusUpdate,
};
use crate::error::StorageError;
use crate::storage::{now_millis, JobRecord, JobState, JobStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use chatsync_core::{Backoff, FailureClass};

/// What the executor should do after a pass over the queue.
enum Wake {
    /// A job ran; look again right away.
    Now,
    /// Sleep until this time (ms since epoch) or until woken.
    At(i64),
    /// Sleep until woken.
    Idle,
}

/// Scheduler that persists jobs in a [`JobStore`] and runs them on one
/// executor task.
///
/// Transient failures keep the job queued with exponential backoff; every
/// other outcome removes it. Jobs with a network constraint wait for
/// [`Connectivity`].
pub struct LocalScheduler {
    jobs: Arc<dyn JobStore>,
    connectivity: Connectivity,
    backoff: Backoff,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    statuses: broadcast::Sender<StatusUpdate>,
    wakeup: Notify,
}

impl LocalScheduler {
    /// Create a scheduler; call [`spawn`](Self::spawn) to start executing.
    pub fn new(jobs: Arc<dyn JobStore>, connectivity: Connectivity, backoff: Backoff) -> Arc<Self> {
        let (statuses, _) = broadcast::channel(64);
        Arc::new(Self {
            jobs,
            connectivity,
            backoff,
            handlers: RwLock::new(HashMap::new()),
            statuses,
            wakeup: Notify::new(),
        })
    }

    /// Spawn the executor task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            match scheduler.jobs.requeue_running_jobs().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Scheduler: requeued {} interrupted jobs", n),
                Err(e) => tracing::error!("Scheduler: requeue failed: {}", e),
            }

            let mut online = scheduler.connectivity.subscribe();
            tracing::debug!("Scheduler executor started");

            loop {
                let wake = match scheduler.tick().await {
                    Ok(wake) => wake,
                    Err(e) => {
                        tracing::error!("Scheduler error: {}", e);
                        Wake::At(now_millis() + 1_000)
                    }
                };

                let delay = match wake {
                    Wake::Now => continue,
                    Wake::At(at) => Some(Duration::from_millis((at - now_millis()).max(0) as u64)),
                    Wake::Idle => None,
                };

                tokio::select! {
                    _ = scheduler.wakeup.notified() => {}
                    changed = online.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(delay.unwrap_or_default()), if delay.is_some() => {}
                }
            }
        })
    }

    fn publish(&self, tag: &str, status: JobStatus) {
        // No receivers is fine; nobody is watching this tag
        let _ = self.statuses.send(StatusUpdate {
            tag: tag.to_string(),
            status,
        });
    }

    fn handler(&self, tag: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(tag).cloned())
    }

    /// Run the first due job, or report when to look again.
    async fn tick(&self) -> Result<Wake, StorageError> {
        let online = self.connectivity.is_online();
        let now = now_millis();
        let mut next: Option<i64> = None;

        for job in self.jobs.queued_jobs().await? {
            if job.require_network && !online {
                continue;
            }
            let Some(handler) = self.handler(&job.tag) else {
                tracing::debug!(tag = %job.tag, "no handler registered yet");
                continue;
            };
            if job.not_before > now {
                next = Some(next.map_or(job.not_before, |n| n.min(job.not_before)));
                continue;
            }

            self.run(job, handler).await?;
            return Ok(Wake::Now);
        }

        Ok(next.map_or(Wake::Idle, Wake::At))
    }

    async fn run(&self, job: JobRecord, handler: Arc<dyn JobHandler>) -> Result<(), StorageError> {
        self.jobs
            .update_job(&job.tag, JobState::Running, job.attempts, job.not_before)
            .await?;
        self.publish(&job.tag, JobStatus::Running);

        match handler.run(&job.payload).await {
            Ok(()) => {
                self.jobs.delete_job(&job.tag).await?;
                tracing::debug!(tag = %job.tag, "job succeeded");
                self.publish(&job.tag, JobStatus::Succeeded);
            }
            Err(failure) if failure.class == FailureClass::Transient => {
                let attempts = job.attempts.saturating_add(1);
                let delay = self.backoff.delay(attempts);
                let not_before = now_millis() + delay.as_millis() as i64;
                self.jobs
                    .update_job(&job.tag, JobState::Queued, attempts, not_before)
                    .await?;
                tracing::warn!(
                    tag = %job.tag,
                    attempts,
                    "job failed ({}), retrying in {:?}",
                    failure.message,
                    delay
                );
                self.publish(&job.tag, JobStatus::Failed(failure));
            }
            Err(failure) => {
                self.jobs.delete_job(&job.tag).await?;
                tracing::warn!(tag = %job.tag, "job failed: {}", failure.message);
                self.publish(&job.tag, JobStatus::Failed(failure));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn register(&self, tag: &str, handler: Arc<dyn JobHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(tag.to_string(), handler);
        }
        self.wakeup.notify_one();
    }

    async fn enqueue_unique(
        &self,
        tag: &str,
        payload: Vec<u8>,
        constraints: JobConstraints,
    ) -> Result<bool, StorageError> {
        let inserted = self
            .jobs
            .insert_job(tag, &payload, constraints.require_network)
            .await?;
        if inserted {
            tracing::debug!(tag, "job enqueued");
            self.publish(tag, JobStatus::Enqueued);
            self.wakeup.notify_one();
        }
        Ok(inserted)
    }

    async fn cancel_by_tag(&self, tag: &str) -> Result<bool, StorageError> {
        let cancelled = self.jobs.cancel_queued_job(tag).await?;
        if cancelled {
            tracing::debug!(tag, "job cancelled");
            self.publish(tag, JobStatus::Cancelled);
        }
        Ok(cancelled)
    }

    fn status_stream(&self, tag: &str) -> JobStatusStream {
        JobStatusStream::new(tag, self.statuses.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobFailure;
    use crate::storage::SqliteStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Handler that replays scripted outcomes and counts runs.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<(), JobFailure>>>,
        runs: Mutex<u32>,
    }

    impl Scripted {
        fn with(outcomes: Vec<Result<(), JobFailure>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                runs: Mutex::new(0),
            })
        }

        fn runs(&self) -> u32 {
            *self.runs.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobHandler for Scripted {
        async fn run(&self, _payload: &[u8]) -> Result<(), JobFailure> {
            *self.runs.lock().unwrap() += 1;
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn failure(class: FailureClass) -> JobFailure {
        JobFailure {
            class,
            message: "scripted".into(),
        }
    }

    async fn scheduler(online: bool) -> (Arc<LocalScheduler>, Arc<SqliteStore>, Connectivity) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let connectivity = Connectivity::new(online);
        let scheduler = LocalScheduler::new(store.clone(), connectivity.clone(), Backoff::none());
        (scheduler, store, connectivity)
    }

    async fn next_terminal(stream: &mut JobStatusStream) -> JobStatus {
        loop {
            let status = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for job status")
                .expect("scheduler gone");
            if status.is_terminal() {
                return status;
            }
        }
    }

    #[tokio::test]
    async fn enqueue_keeps_existing_job() {
        let (scheduler, store, _) = scheduler(true).await;

        assert!(scheduler
            .enqueue_unique("upload", vec![1], JobConstraints::default())
            .await
            .unwrap());
        assert!(!scheduler
            .enqueue_unique("upload", vec![2], JobConstraints::default())
            .await
            .unwrap());
        assert_eq!(store.job("upload").await.unwrap().unwrap().payload, vec![1]);
    }

    #[tokio::test]
    async fn executor_runs_job_and_reports_success() {
        let (scheduler, store, _) = scheduler(true).await;
        let handler = Scripted::with(vec![Ok(())]);
        scheduler.register("upload", handler.clone());
        let mut stream = scheduler.status_stream("upload");
        let executor = scheduler.spawn();

        scheduler
            .enqueue_unique("upload", Vec::new(), JobConstraints::default())
            .await
            .unwrap();

        assert_eq!(next_terminal(&mut stream).await, JobStatus::Succeeded);
        assert_eq!(handler.runs(), 1);
        assert!(store.job("upload").await.unwrap().is_none());
        executor.abort();
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (scheduler, _, _) = scheduler(true).await;
        let handler = Scripted::with(vec![Err(failure(FailureClass::Transient)), Ok(())]);
        scheduler.register("upload", handler.clone());
        let mut stream = scheduler.status_stream("upload");
        let executor = scheduler.spawn();

        scheduler
            .enqueue_unique("upload", Vec::new(), JobConstraints::default())
            .await
            .unwrap();

        assert!(matches!(next_terminal(&mut stream).await, JobStatus::Failed(_)));
        assert_eq!(next_terminal(&mut stream).await, JobStatus::Succeeded);
        assert_eq!(handler.runs(), 2);
        executor.abort();
    }

    #[tokio::test]
    async fn fatal_failure_removes_job() {
        let (scheduler, store, _) = scheduler(true).await;
        scheduler.register("upload", Scripted::with(vec![Err(failure(FailureClass::Fatal))]));
        let mut stream = scheduler.status_stream("upload");
        let executor = scheduler.spawn();

        scheduler
            .enqueue_unique("upload", Vec::new(), JobConstraints::default())
            .await
            .unwrap();

        let status = next_terminal(&mut stream).await;
        assert!(matches!(status, JobStatus::Failed(JobFailure { class: FailureClass::Fatal, .. })));
        assert!(store.job("upload").await.unwrap().is_none());
        executor.abort();
    }

    #[tokio::test]
    async fn network_constraint_waits_for_connectivity() {
        let (scheduler, _, connectivity) = scheduler(false).await;
        let handler = Scripted::with(vec![Ok(())]);
        scheduler.register("upload", handler.clone());
        let mut stream = scheduler.status_stream("upload");
        let executor = scheduler.spawn();

        scheduler
            .enqueue_unique("upload", Vec::new(), JobConstraints::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.runs(), 0);

        connectivity.set_online(true);
        assert_eq!(next_terminal(&mut stream).await, JobStatus::Succeeded);
        assert_eq!(handler.runs(), 1);
        executor.abort();
    }

    #[tokio::test]
    async fn unconstrained_job_runs_offline() {
        let (scheduler, _, _) = scheduler(false).await;
        scheduler.register("local", Scripted::with(vec![Ok(())]));
        let mut stream = scheduler.status_stream("local");
        let executor = scheduler.spawn();

        scheduler
            .enqueue_unique(
                "local",
                Vec::new(),
                JobConstraints {
                    require_network: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(next_terminal(&mut stream).await, JobStatus::Succeeded);
        executor.abort();
    }

    #[tokio::test]
    async fn cancel_drops_queued_job() {
        let (scheduler, store, _) = scheduler(false).await;
        let mut stream = scheduler.status_stream("upload");

        scheduler
            .enqueue_unique("upload", Vec::new(), JobConstraints::default())
            .await
            .unwrap();
        assert!(scheduler.cancel_by_tag("upload").await.unwrap());
        assert!(!scheduler.cancel_by_tag("upload").await.unwrap());

        assert_eq!(stream.next().await, Some(JobStatus::Enqueued));
        assert_eq!(stream.next().await, Some(JobStatus::Cancelled));
        assert!(store.job("upload").await.unwrap().is_none());
    }
}
