//! Per-account sync session.
//!
//! The [`Synchronizer`] owns the session lifecycle. While running it:
//!
//! - drains one ordered queue fed by both the inbound and outbound feeds
//! - persists local intents as pending and requests an upload
//! - applies confirmed events on top of the account cursor, filling gaps
//!   first
//! - watches the upload job and reacts to its terminal states
//!
//! Lifecycle decisions come from [`SessionState`]; this module only executes
//! the actions it returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use chatsync_core::{
    Admission, SessionAction, SessionEvent, SessionState, UploadDecision,
};
use chatsync_types::{
    ConversationId, ConversationSnapshot, Event, EventBody, EventKind, SyncError, UserId,
};

use crate::config::{SyncConfig, UploadConfig};
use crate::error::{EngineError, Result, StorageError};
use crate::feed::{EventFeed, FeedItem, Origin, SubscriptionId};
use crate::gap::GapFiller;
use crate::media::MediaSource;
use crate::paging::{ConversationPager, HistoryPager};
use crate::remote::RemoteLog;
use crate::scheduler::{JobConstraints, JobStatus, JobStatusStream, Scheduler};
use crate::signal::AppSignal;
use crate::storage::{now_millis, ConfirmedWrite, LocalWrite, ReplicaStore};
use crate::upload::UploadCoordinator;

/// Capacity of the application signal channel.
const SIGNAL_CAPACITY: usize = 256;

/// Attempts to persist a local intent before it is parked.
const PERSIST_ATTEMPTS: u32 = 3;

/// Pause between persist attempts.
const PERSIST_RETRY: Duration = Duration::from_millis(50);

/// How often parked intents are offered to the store while the queue is idle.
const PARKED_RETRY: Duration = Duration::from_millis(200);

/// Scheduler tag of the upload job for `account`.
pub fn upload_tag(account: UserId) -> String {
    format!("upload:{account}")
}

/// Everything a session talks to.
pub struct SessionParts {
    /// Signed-in account.
    pub account: UserId,
    /// The account replica.
    pub store: Arc<dyn ReplicaStore>,
    /// Background job scheduler.
    pub scheduler: Arc<dyn Scheduler>,
    /// Authoritative event log.
    pub remote: Arc<dyn RemoteLog>,
    /// Image bytes for uploads.
    pub media: Arc<dyn MediaSource>,
    /// Confirmed events from the server.
    pub inbound: Arc<EventFeed>,
    /// Local intents from the UI.
    pub outbound: Arc<EventFeed>,
}

/// State shared by the intake loop, the watcher and the public API.
struct SessionCore {
    account: UserId,
    store: Arc<dyn ReplicaStore>,
    scheduler: Arc<dyn Scheduler>,
    filler: GapFiller,
    signals: broadcast::Sender<AppSignal>,
    upload_tag: String,
    constraints: JobConstraints,
    halted: Arc<AtomicBool>,
    last_stamp: AtomicI64,
    /// Echoed local intents the store refused; retried in order.
    parked: std::sync::Mutex<VecDeque<Event>>,
}

#[derive(Default)]
struct SessionTasks {
    queue: Option<mpsc::UnboundedReceiver<FeedItem>>,
    subscriptions: Option<(SubscriptionId, SubscriptionId)>,
    intake: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// A sync session for one signed-in account.
pub struct Synchronizer {
    core: Arc<SessionCore>,
    inbound: Arc<EventFeed>,
    outbound: Arc<EventFeed>,
    conversations: ConversationPager,
    history: HistoryPager,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
}

impl Synchronizer {
    /// Create a stopped session and register its upload handler.
    pub fn new(parts: SessionParts, sync: &SyncConfig, upload: &UploadConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let tag = upload_tag(parts.account);
        let halted = Arc::new(AtomicBool::new(false));

        let coordinator = UploadCoordinator::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.remote),
            parts.media,
            Arc::clone(&parts.inbound),
            signals.clone(),
        )
        .with_ack_timeout(upload.ack_timeout())
        .with_halt_flag(Arc::clone(&halted));
        parts.scheduler.register(&tag, Arc::new(coordinator));

        let core = Arc::new(SessionCore {
            account: parts.account,
            store: Arc::clone(&parts.store),
            scheduler: parts.scheduler,
            filler: GapFiller::new(Arc::clone(&parts.remote), sync.gap_page_size),
            signals,
            upload_tag: tag,
            constraints: JobConstraints {
                require_network: upload.require_network,
            },
            halted,
            last_stamp: AtomicI64::new(0),
            parked: std::sync::Mutex::new(VecDeque::new()),
        });

        Self {
            core,
            inbound: parts.inbound,
            outbound: parts.outbound,
            conversations: ConversationPager::new(
                Arc::clone(&parts.store),
                Arc::clone(&parts.remote),
                sync.page_limit,
            ),
            history: HistoryPager::new(
                parts.store,
                parts.remote,
                sync.page_limit,
                sync.history_retention,
            ),
            state: Mutex::new(SessionState::new()),
            tasks: Mutex::new(SessionTasks::default()),
        }
    }

    /// The session's account.
    pub fn account(&self) -> UserId {
        self.core.account
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Receive application signals.
    pub fn subscribe(&self) -> broadcast::Receiver<AppSignal> {
        self.core.signals.subscribe()
    }

    /// Whether uploads are halted by an authorization failure.
    pub fn is_halted(&self) -> bool {
        self.core.halted.load(Ordering::SeqCst)
    }

    /// Register with both feeds, start the intake loop and the upload
    /// watcher, and request an upload of anything still pending.
    ///
    /// Has no effect unless the session is stopped.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.transition(&mut state, SessionEvent::StartRequested)
            .await?;
        if *state == SessionState::Starting {
            self.transition(&mut state, SessionEvent::FeedsRegistered)
                .await?;
            tracing::info!(account = %self.core.account, "session started");
        }
        Ok(())
    }

    /// Lift an upload halt after credentials were refreshed.
    pub async fn reauthenticated(&self) -> Result<()> {
        self.core.halted.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        self.transition(&mut state, SessionEvent::Reauthenticated)
            .await
    }

    /// End the session: unregister from the feeds, stop both tasks and drop
    /// the queued upload job. A running upload finishes on its own.
    pub async fn logout(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.transition(&mut state, SessionEvent::LogoutRequested)
            .await?;
        tracing::info!(account = %self.core.account, "session logged out");
        Ok(())
    }

    /// Publish a new local intent on the outbound feed.
    pub async fn send(&self, conversation: ConversationId, body: EventBody) -> Result<Event> {
        if !self.state().await.is_running() {
            return Err(EngineError::NotRunning);
        }
        let event = Event::pending(conversation, self.core.account, body, now_millis());
        event.validate()?;
        self.outbound.publish(event.clone());
        Ok(event)
    }

    /// Page the conversation list, most recent first.
    pub async fn conversations(
        &self,
        anchor: Option<ConversationId>,
    ) -> Result<Vec<ConversationSnapshot>> {
        self.conversations.page(anchor).await
    }

    /// Page the events of one conversation, newest first.
    pub async fn history(&self, conversation: ConversationId, before: Option<i64>) -> Result<Vec<Event>> {
        self.history.page(conversation, before).await
    }

    async fn transition(&self, state: &mut SessionState, event: SessionEvent) -> Result<()> {
        let (next, actions) = state.on_event(event);
        if next != *state {
            tracing::debug!(from = ?state, to = ?next, "session transition");
        }
        *state = next;
        for action in actions {
            self.perform(action).await?;
        }
        Ok(())
    }

    async fn perform(&self, action: SessionAction) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        match action {
            SessionAction::RegisterFeeds => {
                let (tx, rx) = mpsc::unbounded_channel();
                let inbound = self.inbound.register(tx.clone());
                let outbound = self.outbound.register(tx);
                tasks.subscriptions = Some((inbound, outbound));
                tasks.queue = Some(rx);
            }
            SessionAction::UnregisterFeeds => {
                if let Some((inbound, outbound)) = tasks.subscriptions.take() {
                    self.inbound.unregister(inbound);
                    self.outbound.unregister(outbound);
                }
                tasks.queue = None;
            }
            SessionAction::SpawnIntake => {
                if let Some(queue) = tasks.queue.take() {
                    let core = Arc::clone(&self.core);
                    tasks.intake = Some(tokio::spawn(run_intake(core, queue)));
                }
            }
            SessionAction::CancelIntake => {
                if let Some(handle) = tasks.intake.take() {
                    handle.abort();
                }
            }
            SessionAction::SpawnWatcher => {
                // Subscribe before the first upload is scheduled
                let statuses = self.core.scheduler.status_stream(&self.core.upload_tag);
                let core = Arc::clone(&self.core);
                tasks.watcher = Some(tokio::spawn(run_watcher(core, statuses)));
            }
            SessionAction::CancelWatcher => {
                if let Some(handle) = tasks.watcher.take() {
                    handle.abort();
                }
            }
            SessionAction::ScheduleUpload => {
                drop(tasks);
                self.core.request_upload().await?;
            }
            SessionAction::CancelUploads => {
                drop(tasks);
                self.core
                    .scheduler
                    .cancel_by_tag(&self.core.upload_tag)
                    .await?;
            }
        }
        Ok(())
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        for handle in [tasks.intake.take(), tasks.watcher.take()].into_iter().flatten() {
            handle.abort();
        }
        if let Some((inbound, outbound)) = tasks.subscriptions.take() {
            self.inbound.unregister(inbound);
            self.outbound.unregister(outbound);
        }
    }
}

async fn run_intake(core: Arc<SessionCore>, mut queue: mpsc::UnboundedReceiver<FeedItem>) {
    tracing::debug!(account = %core.account, "intake loop started");
    loop {
        let next = if core.has_parked() {
            match tokio::time::timeout(PARKED_RETRY, queue.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    core.retry_parked().await;
                    continue;
                }
            }
        } else {
            queue.recv().await
        };
        let Some(item) = next else {
            break;
        };
        if core.has_parked() {
            core.retry_parked().await;
        }

        let id = item.event.id;
        if let Err(e) = core.handle(item).await {
            tracing::warn!(%id, "intake dropped event: {}", e);
        }
    }
    tracing::debug!(account = %core.account, "intake loop finished");
}

async fn run_watcher(core: Arc<SessionCore>, mut statuses: JobStatusStream) {
    while let Some(status) = statuses.next().await {
        if let Err(e) = core.on_upload_status(status).await {
            tracing::error!("upload watcher: {}", e);
        }
    }
}

impl SessionCore {
    async fn handle(&self, item: FeedItem) -> Result<()> {
        match (item.origin, item.event.version) {
            (Origin::Outbound, None) => self.handle_local(item.event).await,
            (Origin::Inbound, Some(_)) => self.handle_confirmed(item.event).await,
            (Origin::Outbound, Some(_)) => Err(SyncError::Validation(format!(
                "confirmed event {} on the outbound feed",
                item.event.id
            ))
            .into()),
            (Origin::Inbound, None) => Err(SyncError::Validation(format!(
                "pending event {} on the inbound feed",
                item.event.id
            ))
            .into()),
        }
    }

    async fn handle_local(&self, mut event: Event) -> Result<()> {
        event.validate()?;
        if event.sender != self.account {
            return Err(SyncError::Validation(format!(
                "local event {} not authored by {}",
                event.id, self.account
            ))
            .into());
        }

        if event.kind() == EventKind::Seen {
            if let Some(pending) = self
                .store
                .find_oldest_unconfirmed_of_kind(event.conversation, EventKind::Seen)
                .await?
            {
                tracing::debug!(id = %event.id, pending = %pending.id, "seen already pending");
                return Ok(());
            }
        }

        event.received_at = self.stamp();
        event.committed = false;
        let _ = self.signals.send(AppSignal::LocalEcho(event.clone()));

        let mut attempt = 1;
        loop {
            match self.store.persist_local(&event).await {
                Ok(write) => return self.local_written(&event, write).await,
                Err(e) if attempt < PERSIST_ATTEMPTS => {
                    tracing::warn!(id = %event.id, attempt, "failed to persist local event: {}", e);
                    attempt += 1;
                    tokio::time::sleep(PERSIST_RETRY).await;
                }
                Err(e) => {
                    tracing::error!(id = %event.id, "failed to persist local event; parking it: {}", e);
                    self.park(event);
                    return Ok(());
                }
            }
        }
    }

    async fn local_written(&self, event: &Event, write: LocalWrite) -> Result<()> {
        match write {
            LocalWrite::Inserted => {
                tracing::debug!(id = %event.id, kind = %event.kind(), "local event persisted");
                self.request_upload().await
            }
            LocalWrite::Duplicate => {
                tracing::debug!(id = %event.id, "local event already stored");
                Ok(())
            }
            LocalWrite::SeenSuppressed { pending } => {
                tracing::debug!(id = %event.id, %pending, "seen already pending");
                Ok(())
            }
        }
    }

    fn park(&self, event: Event) {
        if let Ok(mut parked) = self.parked.lock() {
            parked.push_back(event);
        }
    }

    fn has_parked(&self) -> bool {
        self.parked.lock().map(|parked| !parked.is_empty()).unwrap_or(false)
    }

    /// Offer every parked intent to the store again, keeping the ones it
    /// still refuses.
    async fn retry_parked(&self) {
        let parked: Vec<Event> = match self.parked.lock() {
            Ok(mut parked) => parked.drain(..).collect(),
            Err(_) => return,
        };
        for event in parked {
            match self.store.persist_local(&event).await {
                Ok(write) => {
                    tracing::info!(id = %event.id, "parked local event persisted");
                    if let Err(e) = self.local_written(&event, write).await {
                        tracing::warn!(id = %event.id, "after persisting parked event: {}", e);
                    }
                }
                Err(e) => {
                    tracing::debug!(id = %event.id, "parked local event still refused: {}", e);
                    self.park(event);
                }
            }
        }
    }

    async fn handle_confirmed(&self, event: Event) -> Result<()> {
        event.validate()?;
        if !event.conversation.contains(self.account) {
            return Err(SyncError::Validation(format!(
                "event {} belongs to {}, not to {}",
                event.id, event.conversation, self.account
            ))
            .into());
        }
        let Some(version) = event.version else {
            return Ok(());
        };

        let cursor = self.store.cursor().await?;
        match chatsync_core::admit(cursor, version) {
            Admission::Stale => {
                tracing::debug!(%version, %cursor, "discarding redelivered event");
                return Ok(());
            }
            Admission::Next => self.apply(event).await?,
            Admission::Gap(range) => {
                tracing::info!(from = %range.start, to = %range.end, "version gap detected");
                for missing in self.filler.fetch(range).await? {
                    self.apply(missing).await?;
                }
                self.apply(event).await?;
            }
        }

        if self.store.has_unconfirmed().await? {
            self.request_upload().await?;
        }
        Ok(())
    }

    async fn apply(&self, mut event: Event) -> Result<()> {
        let cursor = self.store.cursor().await?;
        event.received_at = self.stamp();
        match self.store.apply_confirmed(&event).await {
            Ok(ConfirmedWrite::Applied { reconciled }) => {
                tracing::debug!(id = %event.id, version = ?event.version, reconciled, "event applied");
                event.committed = true;
                let _ = self.signals.send(AppSignal::Committed(event));
                Ok(())
            }
            Ok(ConfirmedWrite::Stale) => Ok(()),
            Err(StorageError::NotContiguous { cursor, version }) => {
                Err(EngineError::Consistency { from: cursor, to: version })
            }
            Err(e) => {
                tracing::error!(%cursor, "failed to apply confirmed event: {}", e);
                Err(e.into())
            }
        }
    }

    async fn request_upload(&self) -> Result<()> {
        if self.halted.load(Ordering::SeqCst) {
            tracing::debug!(account = %self.account, "uploads halted; not scheduling");
            return Ok(());
        }
        self.scheduler
            .enqueue_unique(&self.upload_tag, Vec::new(), self.constraints)
            .await?;
        Ok(())
    }

    async fn on_upload_status(&self, status: JobStatus) -> Result<()> {
        match status {
            JobStatus::Succeeded => {
                if self.store.has_unconfirmed().await? {
                    self.request_upload().await?;
                }
            }
            JobStatus::Failed(failure) => match failure.class.decision() {
                UploadDecision::Retry => self.request_upload().await?,
                UploadDecision::Halt { status } => {
                    self.halted.store(true, Ordering::SeqCst);
                    tracing::warn!(account = %self.account, status, "upload unauthorized; halting");
                    let _ = self.signals.send(AppSignal::Unauthorized {
                        account: self.account,
                        status,
                    });
                }
                UploadDecision::GiveUp => {
                    tracing::error!(account = %self.account, "upload failed: {}", failure.message);
                }
            },
            JobStatus::Enqueued | JobStatus::Running | JobStatus::Cancelled => {}
        }
        Ok(())
    }

    fn stamp(&self) -> i64 {
        next_stamp(&self.last_stamp, now_millis())
    }
}

/// Receive time for an event entering the replica; strictly increasing
/// within the session even when the clock stalls or steps back.
fn next_stamp(last: &AtomicI64, now: i64) -> i64 {
    let (Ok(previous) | Err(previous)) =
        last.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        });
    now.max(previous + 1)
}
