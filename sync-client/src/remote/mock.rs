//! Mock remote log for testing.
//!
//! Holds an in-memory account log, assigns versions to submitted events and
//! allows injecting failures.

use super::RemoteLog;
use crate::error::RemoteError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chatsync_types::{
    ConversationId, ConversationRecord, ConversationSnapshot, Event, EventKind, Version,
};

/// Events returned per conversation history page.
const HISTORY_PAGE: usize = 20;
/// Conversations returned per list page (anchor included).
const LIST_PAGE: usize = 21;
/// Newest events included in each conversation snapshot.
const SNAPSHOT_EVENTS: usize = 1;

/// Mock remote log for testing.
#[derive(Debug, Default)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    log: BTreeMap<Version, Event>,
    conversations: HashMap<ConversationId, i64>,
    sent: Vec<Event>,
    image_bytes: Vec<usize>,
    offline: bool,
    send_failures: VecDeque<RemoteError>,
    failing_pages: HashSet<Version>,
    hidden: HashSet<Version>,
    page_requests: Vec<(Version, u32)>,
}

impl MockRemoteInner {
    fn confirm(&mut self, event: &Event) -> Event {
        let version = Version::new(self.log.len() as u64 + 1);
        let confirmed = event.confirmed(version);
        self.conversations
            .entry(event.conversation)
            .or_insert(event.created_at);
        self.log.insert(version, confirmed.clone());
        confirmed
    }

    fn submit(&mut self, event: &Event, kind: EventKind) -> Result<Event, RemoteError> {
        if self.offline {
            return Err(RemoteError::Network("offline".into()));
        }
        if let Some(err) = self.send_failures.pop_front() {
            return Err(err);
        }
        if event.kind() != kind {
            return Err(RemoteError::Protocol(format!(
                "{} event sent to {} endpoint",
                event.kind(),
                kind
            )));
        }
        self.sent.push(event.clone());
        Ok(self.confirm(event))
    }
}

impl MockRemote {
    /// Create an empty remote log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to the log as if another device had sent it.
    ///
    /// Returns the confirmed copy carrying the next version.
    pub fn append_confirmed(&self, event: &Event) -> Event {
        let mut inner = self.inner.lock().unwrap();
        inner.confirm(event)
    }

    /// The confirmed event at `version`.
    pub fn event_at(&self, version: Version) -> Option<Event> {
        let inner = self.inner.lock().unwrap();
        inner.log.get(&version).cloned()
    }

    /// Highest version in the log.
    pub fn head_version(&self) -> Version {
        let inner = self.inner.lock().unwrap();
        Version::new(inner.log.len() as u64)
    }

    /// All events submitted through `send_*`.
    pub fn sent(&self) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Sizes of the image payloads submitted.
    pub fn image_uploads(&self) -> Vec<usize> {
        let inner = self.inner.lock().unwrap();
        inner.image_bytes.clone()
    }

    /// Make every `send_*` fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.offline = offline;
    }

    /// Cause the next `send_*` to fail with the given error.
    pub fn fail_next_send(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner.send_failures.push_back(error);
    }

    /// Cause account pages starting after `after` to fail.
    pub fn fail_page_after(&self, after: Version) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_pages.insert(after);
    }

    /// Let account pages starting after `after` succeed again.
    pub fn recover_page_after(&self, after: Version) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_pages.remove(&after);
    }

    /// Leave `version` out of every account page.
    pub fn hide_version(&self, version: Version) {
        let mut inner = self.inner.lock().unwrap();
        inner.hidden.insert(version);
    }

    /// `(after, limit)` of every account page request, in call order.
    pub fn page_requests(&self) -> Vec<(Version, u32)> {
        let inner = self.inner.lock().unwrap();
        inner.page_requests.clone()
    }
}

impl Clone for MockRemote {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteLog for MockRemote {
    async fn list_account_events(
        &self,
        after: Version,
        limit: u32,
    ) -> Result<Vec<Event>, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.page_requests.push((after, limit));

        if inner.failing_pages.contains(&after) {
            return Err(RemoteError::Network(format!("page after {after} failed")));
        }

        Ok(inner
            .log
            .range(after.next()..)
            .take(limit as usize)
            .filter(|(version, _)| !inner.hidden.contains(version))
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn list_conversation_events(
        &self,
        conversation: ConversationId,
        at_version: Version,
    ) -> Result<Vec<Event>, RemoteError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .log
            .range(..=at_version)
            .rev()
            .map(|(_, event)| event)
            .filter(|event| event.conversation == conversation)
            .take(HISTORY_PAGE)
            .cloned()
            .collect())
    }

    async fn list_conversations(
        &self,
        after_version: Version,
        anchor: Option<ConversationId>,
    ) -> Result<Vec<ConversationSnapshot>, RemoteError> {
        let inner = self.inner.lock().unwrap();

        // Recency is the version of the last message, as the server orders it
        let mut last_message: HashMap<ConversationId, Version> = HashMap::new();
        for (version, event) in inner.log.range(..=after_version) {
            if event.is_message() {
                last_message.insert(event.conversation, *version);
            }
        }
        let mut order: Vec<(ConversationId, Version)> = last_message.into_iter().collect();
        order.sort_by(|a, b| b.1.cmp(&a.1));

        let start = match anchor {
            Some(anchor) => match order.iter().position(|(id, _)| *id == anchor) {
                Some(position) => position,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };

        Ok(order
            .into_iter()
            .skip(start)
            .take(LIST_PAGE)
            .map(|(id, _)| {
                let created_at = inner.conversations.get(&id).copied().unwrap_or(0);
                let events = inner
                    .log
                    .range(..=after_version)
                    .rev()
                    .map(|(_, event)| event)
                    .filter(|event| event.conversation == id)
                    .take(SNAPSHOT_EVENTS)
                    .cloned()
                    .collect();
                ConversationSnapshot {
                    conversation: ConversationRecord::new(id, created_at),
                    events,
                }
            })
            .collect())
    }

    async fn send_text(&self, event: &Event) -> Result<Event, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.submit(event, EventKind::Text)
    }

    async fn send_icon(&self, event: &Event) -> Result<Event, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.submit(event, EventKind::Icon)
    }

    async fn send_seen(&self, event: &Event) -> Result<Event, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.submit(event, EventKind::Seen)
    }

    async fn send_image(&self, event: &Event, bytes: Vec<u8>) -> Result<Event, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        let confirmed = inner.submit(event, EventKind::Image)?;
        inner.image_bytes.push(bytes.len());
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_types::{EventBody, UserId};

    fn text(conversation: ConversationId, sender: UserId, at: i64) -> Event {
        Event::pending(
            conversation,
            sender,
            EventBody::Text {
                content: format!("at {at}"),
            },
            at,
        )
    }

    fn conversation() -> (UserId, ConversationId) {
        let me = UserId::random();
        (me, ConversationId::new(me, UserId::random()).unwrap())
    }

    #[tokio::test]
    async fn submitted_events_get_consecutive_versions() {
        let remote = MockRemote::new();
        let (me, id) = conversation();

        let first = remote.send_text(&text(id, me, 1)).await.unwrap();
        let second = remote.send_text(&text(id, me, 2)).await.unwrap();

        assert_eq!(first.version, Some(Version::new(1)));
        assert_eq!(second.version, Some(Version::new(2)));
        assert_eq!(remote.sent().len(), 2);
    }

    #[tokio::test]
    async fn wrong_endpoint_is_rejected() {
        let remote = MockRemote::new();
        let (me, id) = conversation();
        let err = remote.send_seen(&text(id, me, 1)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
    }

    #[tokio::test]
    async fn offline_sends_fail_with_network_error() {
        let remote = MockRemote::new();
        let (me, id) = conversation();
        remote.set_offline(true);

        let err = remote.send_text(&text(id, me, 1)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
        assert!(remote.sent().is_empty());
    }

    #[tokio::test]
    async fn account_pages_are_ascending_and_bounded() {
        let remote = MockRemote::new();
        let (me, id) = conversation();
        for at in 1..=10 {
            remote.append_confirmed(&text(id, me, at));
        }

        let page = remote.list_account_events(Version::new(3), 4).await.unwrap();
        let versions: Vec<u64> = page.iter().map(|e| e.version.unwrap().value()).collect();
        assert_eq!(versions, vec![4, 5, 6, 7]);
        assert_eq!(remote.page_requests(), vec![(Version::new(3), 4)]);
    }

    #[tokio::test]
    async fn conversation_history_is_newest_first() {
        let remote = MockRemote::new();
        let (me, id) = conversation();
        let (other_me, other) = conversation();
        remote.append_confirmed(&text(id, me, 1));
        remote.append_confirmed(&text(other, other_me, 2));
        remote.append_confirmed(&text(id, me, 3));
        remote.append_confirmed(&text(id, me, 4));

        let events = remote
            .list_conversation_events(id, Version::new(3))
            .await
            .unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version.unwrap().value()).collect();
        assert_eq!(versions, vec![3, 1]);
    }

    #[tokio::test]
    async fn conversation_list_starts_at_anchor() {
        let remote = MockRemote::new();
        let (a_me, a) = conversation();
        let (b_me, b) = conversation();
        let (c_me, c) = conversation();
        remote.append_confirmed(&text(a, a_me, 1));
        remote.append_confirmed(&text(b, b_me, 2));
        remote.append_confirmed(&text(c, c_me, 3));

        let all = remote.list_conversations(Version::new(3), None).await.unwrap();
        let ids: Vec<ConversationId> = all.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![c, b, a]);

        let from_b = remote.list_conversations(Version::new(3), Some(b)).await.unwrap();
        let ids: Vec<ConversationId> = from_b.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(from_b[0].events.len(), 1);

        // As of version 2, conversation c does not exist yet
        let earlier = remote.list_conversations(Version::new(2), None).await.unwrap();
        assert_eq!(earlier.len(), 2);
    }
}
