//! Paged reads of the replica with remote fallback.
//!
//! [`ConversationPager`] walks the Local ordering and expands it from the
//! remote conversation list once local pages run short. [`HistoryPager`]
//! walks one conversation backwards and backfills older confirmed events.

use std::collections::HashSet;
use std::sync::Arc;

use chatsync_core::OrderingInstance;
use chatsync_types::{ConversationId, ConversationSnapshot, Event, Version};

use crate::error::Result;
use crate::remote::RemoteLog;
use crate::storage::ReplicaStore;

/// Events included with each listed conversation.
const SNAPSHOT_EVENTS: u32 = 1;

/// Pages the conversation list, most recent first.
pub struct ConversationPager {
    store: Arc<dyn ReplicaStore>,
    remote: Arc<dyn RemoteLog>,
    page_limit: u32,
}

impl ConversationPager {
    /// Create a pager returning up to `page_limit` conversations per page.
    pub fn new(store: Arc<dyn ReplicaStore>, remote: Arc<dyn RemoteLog>, page_limit: u32) -> Self {
        Self {
            store,
            remote,
            page_limit: page_limit.max(1),
        }
    }

    /// Conversations after `anchor` (from the most recent when `None`).
    ///
    /// A short local page triggers one expansion from the remote list; the
    /// page is then read again. Remote failures are logged and the local page
    /// is returned as is.
    pub async fn page(&self, anchor: Option<ConversationId>) -> Result<Vec<ConversationSnapshot>> {
        let mut ids = self.local_page(anchor).await?;

        if (ids.len() as u32) < self.page_limit {
            match self.expand().await {
                Ok(true) => ids = self.local_page(anchor).await?,
                Ok(false) => {}
                Err(e) => tracing::warn!("conversation list expansion failed: {}", e),
            }
        }

        let mut page = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(conversation) = self.store.conversation(id).await? else {
                tracing::warn!(%id, "ordered conversation has no record");
                continue;
            };
            let events = self.store.list_events(id, None, SNAPSHOT_EVENTS).await?;
            page.push(ConversationSnapshot {
                conversation,
                events,
            });
        }
        Ok(page)
    }

    async fn local_page(&self, anchor: Option<ConversationId>) -> Result<Vec<ConversationId>> {
        let ids = match anchor {
            Some(anchor) => {
                let mut ids = self
                    .store
                    .list_ordering(OrderingInstance::Local, anchor, self.page_limit)
                    .await?;
                if !ids.is_empty() {
                    ids.remove(0);
                }
                ids
            }
            None => match self.store.head(OrderingInstance::Local).await? {
                Some(head) => {
                    self.store
                        .list_ordering(OrderingInstance::Local, head, self.page_limit - 1)
                        .await?
                }
                None => Vec::new(),
            },
        };
        Ok(ids)
    }

    /// Pull the next remote page of conversations behind the Remote tail.
    ///
    /// Returns whether anything new was stored.
    pub async fn expand(&self) -> Result<bool> {
        let cursor = self.store.cursor().await?;
        let tail = self.store.tail(OrderingInstance::Remote).await?;
        let mut snapshots = self.remote.list_conversations(cursor, tail).await?;

        if let Some(tail) = tail {
            match snapshots.first() {
                Some(first) if first.id() == tail => {
                    snapshots.remove(0);
                }
                Some(first) => {
                    tracing::warn!(
                        expected = %tail,
                        got = %first.id(),
                        "remote conversation page does not start at the anchor"
                    );
                    return Ok(false);
                }
                None => return Ok(false),
            }
        }

        if snapshots.is_empty() {
            return Ok(false);
        }

        let stored = self.store.expand_conversations(cursor, &snapshots).await?;
        if stored {
            tracing::debug!(count = snapshots.len(), "conversation list expanded");
        } else {
            tracing::debug!("cursor moved during expansion; page discarded");
        }
        Ok(stored)
    }
}

/// Pages the events of one conversation, newest first.
pub struct HistoryPager {
    store: Arc<dyn ReplicaStore>,
    remote: Arc<dyn RemoteLog>,
    page_limit: u32,
    retention: u64,
}

impl HistoryPager {
    /// Create a pager. Backfilled history is only stored while a
    /// conversation holds fewer than `retention` confirmed events.
    pub fn new(
        store: Arc<dyn ReplicaStore>,
        remote: Arc<dyn RemoteLog>,
        page_limit: u32,
        retention: u64,
    ) -> Self {
        Self {
            store,
            remote,
            page_limit: page_limit.max(1),
            retention,
        }
    }

    /// Events of `conversation` received strictly before `before`.
    ///
    /// A short local page is completed from the remote log, walking down from
    /// the version below the oldest one already known: the oldest in this
    /// page, or else the oldest confirmed version held locally.
    pub async fn page(&self, conversation: ConversationId, before: Option<i64>) -> Result<Vec<Event>> {
        let mut events = self
            .store
            .list_events(conversation, before, self.page_limit)
            .await?;
        if events.len() as u32 >= self.page_limit {
            return Ok(events);
        }

        let oldest_in_page = events.iter().filter_map(|event| event.version).min();
        let mut at_version = match oldest_in_page {
            Some(oldest) => oldest.prev(),
            None => match self.store.oldest_confirmed_version(conversation).await? {
                Some(oldest) => oldest.prev(),
                None => self.store.cursor().await?,
            },
        };

        let mut seen: HashSet<_> = events.iter().map(|event| event.id).collect();
        while (events.len() as u32) < self.page_limit && at_version > Version::zero() {
            let fetched = match self
                .remote
                .list_conversation_events(conversation, at_version)
                .await
            {
                Ok(fetched) => fetched,
                Err(e) => {
                    tracing::warn!(%conversation, "history backfill failed: {}", e);
                    break;
                }
            };

            let fetched: Vec<Event> = fetched
                .into_iter()
                .filter(|event| event.conversation == conversation)
                .filter(|event| event.version.is_some_and(|v| v <= at_version))
                .map(|mut event| {
                    event.received_at = event.created_at;
                    event
                })
                .collect();
            let Some(lowest) = fetched.iter().filter_map(|event| event.version).min() else {
                break;
            };
            at_version = lowest.prev();

            if self.store.count_confirmed(conversation).await? < self.retention {
                let stored = self.store.store_history(&fetched).await?;
                tracing::debug!(%conversation, stored, "history backfilled");
            }

            let room = (self.page_limit as usize).saturating_sub(events.len());
            let older: Vec<Event> = fetched
                .into_iter()
                .filter(|event| before.map_or(true, |before| event.received_at < before))
                .filter(|event| seen.insert(event.id))
                .take(room)
                .collect();
            events.extend(older);
        }
        Ok(events)
    }
}
