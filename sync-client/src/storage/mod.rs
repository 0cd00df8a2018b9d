//! Storage layer for sync-client.
//!
//! The replica keeps conversations, events, the account cursor and the two
//! conversation orderings in one database per account. Every multi-row change
//! (applying a confirmed event, persisting a local intent, expanding the
//! conversation list) happens in a single transaction.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

use chatsync_core::OrderingInstance;
use chatsync_types::{
    ConversationId, ConversationRecord, ConversationSnapshot, Event, EventId, EventKind, Version,
};

use crate::error::StorageResult;

/// Result of persisting a local (pending) event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalWrite {
    /// A new pending row was written.
    Inserted,
    /// A row with the same id already exists; nothing changed.
    Duplicate,
    /// A Seen for the same conversation is still pending; the new one was
    /// dropped.
    SeenSuppressed {
        /// The Seen that is still waiting for confirmation.
        pending: EventId,
    },
}

/// Result of applying a server-confirmed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmedWrite {
    /// The event was applied and the cursor advanced to its version.
    Applied {
        /// Whether an existing pending row was confirmed in place.
        reconciled: bool,
    },
    /// The version is at or below the cursor; nothing changed.
    Stale,
}

/// Trait for the account replica.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Highest server version fully applied.
    async fn cursor(&self) -> StorageResult<Version>;

    /// Idempotent append by id.
    ///
    /// A new id inserts a row (and the conversation record if needed). An
    /// existing id has version and committed state merged in; its receive
    /// time is kept. Returns `true` when a new row was inserted.
    async fn append(&self, event: &Event) -> StorageResult<bool>;

    /// Persist a local intent as pending and move its conversation to the
    /// front of the Local ordering (messages only).
    ///
    /// At most one Seen per conversation may be pending.
    async fn persist_local(&self, event: &Event) -> StorageResult<LocalWrite>;

    /// Apply a confirmed event on top of the cursor.
    ///
    /// The cursor check and advance happen in the same transaction as the
    /// event write and the ordering update (Remote and Local, messages only).
    /// A version beyond `cursor + 1` is rejected with
    /// [`StorageError::NotContiguous`](crate::StorageError::NotContiguous).
    async fn apply_confirmed(&self, event: &Event) -> StorageResult<ConfirmedWrite>;

    /// Look up a single event.
    async fn event(&self, id: EventId) -> StorageResult<Option<Event>>;

    /// Events of a conversation, newest first, strictly older than `before`
    /// (receive time, ms).
    async fn list_events(
        &self,
        conversation: ConversationId,
        before: Option<i64>,
        limit: u32,
    ) -> StorageResult<Vec<Event>>;

    /// The pending event with the lowest receive time.
    async fn find_oldest_unconfirmed(&self) -> StorageResult<Option<Event>>;

    /// The oldest pending event of `kind` in a conversation.
    async fn find_oldest_unconfirmed_of_kind(
        &self,
        conversation: ConversationId,
        kind: EventKind,
    ) -> StorageResult<Option<Event>>;

    /// Whether any pending event exists.
    async fn has_unconfirmed(&self) -> StorageResult<bool>;

    /// Number of confirmed events in a conversation.
    async fn count_confirmed(&self, conversation: ConversationId) -> StorageResult<u64>;

    /// Lowest confirmed version stored for a conversation.
    async fn oldest_confirmed_version(
        &self,
        conversation: ConversationId,
    ) -> StorageResult<Option<Version>>;

    /// Store confirmed history fetched outside the cursor path.
    ///
    /// Pending events are ignored. Returns the number of new rows.
    async fn store_history(&self, events: &[Event]) -> StorageResult<usize>;

    /// Look up a conversation record.
    async fn conversation(&self, id: ConversationId) -> StorageResult<Option<ConversationRecord>>;

    /// Store snapshots from the remote conversation list and thread their
    /// conversations onto the tail of both orderings.
    ///
    /// Nothing is written when the cursor is no longer `expected_cursor`.
    /// Returns whether the snapshots were stored.
    async fn expand_conversations(
        &self,
        expected_cursor: Version,
        snapshots: &[ConversationSnapshot],
    ) -> StorageResult<bool>;

    /// Move a conversation to the head of an ordering.
    async fn promote(&self, instance: OrderingInstance, id: ConversationId) -> StorageResult<()>;

    /// Thread a conversation after the tail of an ordering.
    async fn append_tail(&self, instance: OrderingInstance, id: ConversationId)
        -> StorageResult<()>;

    /// Most recent conversation of an ordering.
    async fn head(&self, instance: OrderingInstance) -> StorageResult<Option<ConversationId>>;

    /// Oldest conversation of an ordering.
    async fn tail(&self, instance: OrderingInstance) -> StorageResult<Option<ConversationId>>;

    /// `anchor` followed by up to `count` next-older conversations.
    async fn list_ordering(
        &self,
        instance: OrderingInstance,
        anchor: ConversationId,
        count: u32,
    ) -> StorageResult<Vec<ConversationId>>;
}

/// State of a persisted scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for its constraints and backoff.
    Queued,
    /// Picked up by the executor.
    Running,
}

impl JobState {
    fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
        }
    }
}

/// A persisted scheduler job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Unique tag (one job per tag).
    pub tag: String,
    /// Opaque payload for the handler.
    pub payload: Vec<u8>,
    /// Current state.
    pub state: JobState,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest start time (ms since epoch).
    pub not_before: i64,
    /// Whether the job waits for connectivity.
    pub require_network: bool,
}

/// Trait for durable job bookkeeping.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a queued job unless one with the tag exists.
    ///
    /// Returns `false` when a job with the tag is already queued or running.
    async fn insert_job(&self, tag: &str, payload: &[u8], require_network: bool)
        -> StorageResult<bool>;

    /// Look up a job.
    async fn job(&self, tag: &str) -> StorageResult<Option<JobRecord>>;

    /// Update state, attempts and earliest start of a job.
    async fn update_job(
        &self,
        tag: &str,
        state: JobState,
        attempts: u32,
        not_before: i64,
    ) -> StorageResult<()>;

    /// Remove a job.
    async fn delete_job(&self, tag: &str) -> StorageResult<()>;

    /// Remove a job only if it has not started. Returns whether it was removed.
    async fn cancel_queued_job(&self, tag: &str) -> StorageResult<bool>;

    /// All queued jobs, earliest start first.
    async fn queued_jobs(&self) -> StorageResult<Vec<JobRecord>>;

    /// Put jobs left running by a previous process back in the queue.
    async fn requeue_running_jobs(&self) -> StorageResult<u64>;
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
