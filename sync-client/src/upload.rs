//! Upload of pending events, one at a time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use chatsync_core::FailureClass;
use chatsync_types::{Event, EventBody, EventId};

use crate::error::{RemoteError, Result};
use crate::feed::EventFeed;
use crate::media::MediaSource;
use crate::remote::RemoteLog;
use crate::scheduler::{JobFailure, JobHandler};
use crate::signal::AppSignal;
use crate::storage::ReplicaStore;

/// How long to wait for an acknowledged event to be applied.
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// What one upload attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// No pending events.
    Idle,
    /// The oldest pending event was acknowledged by the server.
    Sent(Event),
    /// The oldest pending event was already acknowledged but is not yet
    /// applied; the acknowledgement was offered again instead of a resend.
    AwaitingApply(EventId),
    /// Uploads are halted by an authorization failure.
    Halted,
}

/// Sends the oldest pending event and forwards the acknowledgement.
///
/// Runs as the handler of the per-account upload job, so at most one upload
/// is in flight. The coordinator never writes to the replica: the confirmed
/// copy is published on the inbound feed and applied by the intake loop like
/// any other confirmed event. An acknowledgement that was not applied (for
/// example because the gap below it could not be filled) is published again
/// on the next attempt.
pub struct UploadCoordinator {
    store: Arc<dyn ReplicaStore>,
    remote: Arc<dyn RemoteLog>,
    media: Arc<dyn MediaSource>,
    inbound: Arc<EventFeed>,
    signals: broadcast::Sender<AppSignal>,
    last_acked: Mutex<Option<Event>>,
    halted: Arc<AtomicBool>,
    ack_timeout: Duration,
}

impl UploadCoordinator {
    /// Create a coordinator.
    ///
    /// `signals` is the session's signal channel; the coordinator listens on
    /// it for the [`AppSignal::Committed`] of each event it sent.
    pub fn new(
        store: Arc<dyn ReplicaStore>,
        remote: Arc<dyn RemoteLog>,
        media: Arc<dyn MediaSource>,
        inbound: Arc<EventFeed>,
        signals: broadcast::Sender<AppSignal>,
    ) -> Self {
        Self {
            store,
            remote,
            media,
            inbound,
            signals,
            last_acked: Mutex::new(None),
            halted: Arc::new(AtomicBool::new(false)),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Override how long an attempt waits for its acknowledgement to be applied.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Share the session's upload halt flag. The coordinator sets it as soon
    /// as the server rejects the credentials and sends nothing while it is set.
    pub fn with_halt_flag(mut self, halted: Arc<AtomicBool>) -> Self {
        self.halted = halted;
        self
    }

    /// Upload the oldest pending event.
    pub async fn upload_next(&self) -> Result<UploadOutcome> {
        if self.halted.load(Ordering::SeqCst) {
            tracing::debug!("uploads halted; not sending");
            return Ok(UploadOutcome::Halted);
        }
        let Some(pending) = self.store.find_oldest_unconfirmed().await? else {
            tracing::debug!("nothing to upload");
            return Ok(UploadOutcome::Idle);
        };

        if let Some(ack) = self.last_acked().filter(|ack| ack.id == pending.id) {
            tracing::info!(
                id = %ack.id,
                version = ?ack.version,
                "acknowledged event not applied; offering it again"
            );
            let commits = self.signals.subscribe();
            self.inbound.publish(ack);
            self.await_commit(pending.id, commits).await;
            return Ok(UploadOutcome::AwaitingApply(pending.id));
        }

        let ack = match self.dispatch(&pending).await {
            Ok(ack) => ack,
            Err(e) => {
                if let FailureClass::Unauthorized(status) = e.class() {
                    tracing::warn!(id = %pending.id, status, "upload rejected; halting uploads");
                    self.halted.store(true, Ordering::SeqCst);
                }
                return Err(e.into());
            }
        };
        if ack.id != pending.id || ack.version.is_none() {
            return Err(RemoteError::Protocol(format!(
                "acknowledgement for {} does not match the sent event",
                pending.id
            ))
            .into());
        }

        tracing::info!(
            id = %ack.id,
            kind = %ack.kind(),
            version = ?ack.version,
            "event uploaded"
        );
        self.set_last_acked(ack.clone());

        // Subscribe before publishing so the commit cannot be missed
        let commits = self.signals.subscribe();
        self.inbound.publish(ack.clone());
        self.await_commit(ack.id, commits).await;

        Ok(UploadOutcome::Sent(ack))
    }

    async fn dispatch(&self, event: &Event) -> std::result::Result<Event, RemoteError> {
        match &event.body {
            EventBody::Text { .. } => self.remote.send_text(event).await,
            EventBody::Icon { .. } => self.remote.send_icon(event).await,
            EventBody::Seen { .. } => self.remote.send_seen(event).await,
            EventBody::Image(image) => {
                let bytes = self.media.read(image).await.map_err(|e| {
                    RemoteError::Media(format!("{}: {}", image.filename, e))
                })?;
                self.remote.send_image(event, bytes).await
            }
        }
    }

    async fn await_commit(&self, id: EventId, mut commits: broadcast::Receiver<AppSignal>) {
        let wait = async {
            loop {
                match commits.recv().await {
                    Ok(AppSignal::Committed(event)) if event.id == id => return,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.is_confirmed(id).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        };

        if self.is_confirmed(id).await {
            return;
        }
        if tokio::time::timeout(self.ack_timeout, wait).await.is_err() {
            tracing::warn!(%id, "acknowledgement not applied within {:?}", self.ack_timeout);
        }
    }

    async fn is_confirmed(&self, id: EventId) -> bool {
        matches!(self.store.event(id).await, Ok(Some(event)) if event.version.is_some())
    }

    fn last_acked(&self) -> Option<Event> {
        self.last_acked.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_last_acked(&self, ack: Event) {
        if let Ok(mut guard) = self.last_acked.lock() {
            *guard = Some(ack);
        }
    }
}

#[async_trait]
impl JobHandler for UploadCoordinator {
    async fn run(&self, _payload: &[u8]) -> std::result::Result<(), JobFailure> {
        self.upload_next().await.map(|_| ()).map_err(JobFailure::from)
    }
}
