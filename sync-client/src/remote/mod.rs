//! Remote event log abstraction.
//!
//! The server keeps the authoritative, per-account log of confirmed events
//! ordered by [`Version`]. The engine only talks to it through [`RemoteLog`]:
//!
//! - `list_account_events()` pages the account log (gap filling)
//! - `list_conversation_events()` pages one conversation backwards (history)
//! - `list_conversations()` pages the conversation list (list expansion)
//! - `send_*()` submit a pending event and return its confirmed copy
//!
//! [`HttpRemote`] talks to the real API; [`MockRemote`] is an in-memory log
//! for tests.

mod http;
mod mock;

pub use http::HttpRemote;
pub use mock::MockRemote;

use async_trait::async_trait;

use chatsync_types::{ConversationId, ConversationSnapshot, Event, Version};

use crate::error::RemoteError;

/// The authoritative event log of one account.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Confirmed events with versions strictly after `after`, ascending, at
    /// most `limit` of them.
    async fn list_account_events(
        &self,
        after: Version,
        limit: u32,
    ) -> Result<Vec<Event>, RemoteError>;

    /// Confirmed events of one conversation with versions up to and including
    /// `at_version`, newest first.
    async fn list_conversation_events(
        &self,
        conversation: ConversationId,
        at_version: Version,
    ) -> Result<Vec<Event>, RemoteError>;

    /// Conversations by recency as of `after_version`.
    ///
    /// With an anchor, the first element is the anchor itself followed by
    /// older conversations. Without one, the list starts at the most recent
    /// conversation.
    async fn list_conversations(
        &self,
        after_version: Version,
        anchor: Option<ConversationId>,
    ) -> Result<Vec<ConversationSnapshot>, RemoteError>;

    /// Submit a text message.
    async fn send_text(&self, event: &Event) -> Result<Event, RemoteError>;

    /// Submit an icon message.
    async fn send_icon(&self, event: &Event) -> Result<Event, RemoteError>;

    /// Submit a read receipt.
    async fn send_seen(&self, event: &Event) -> Result<Event, RemoteError>;

    /// Submit an image message with the image bytes.
    async fn send_image(&self, event: &Event, bytes: Vec<u8>) -> Result<Event, RemoteError>;
}

/// Source of the bearer token for remote calls.
#[async_trait]
pub trait Credentials: Send + Sync {
    /// Current token, if signed in.
    async fn bearer_token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl Credentials for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// No token; requests go out unauthenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl Credentials for Anonymous {
    async fn bearer_token(&self) -> Option<String> {
        None
    }
}
