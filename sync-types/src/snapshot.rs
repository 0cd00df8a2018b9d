//! Conversation records and list snapshots.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, Event};

/// A conversation known to the replica.
///
/// Created on the first event between the pair and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Canonical identity (carries both participants).
    pub id: ConversationId,
    /// When the record was first seen (ms since epoch).
    pub created_at: i64,
}

impl ConversationRecord {
    /// Create a record for `id`.
    pub fn new(id: ConversationId, created_at: i64) -> Self {
        Self { id, created_at }
    }
}

/// A conversation together with its newest events.
///
/// Returned by the remote conversation list endpoint and by local
/// conversation paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// The conversation.
    pub conversation: ConversationRecord,
    /// Newest events first.
    #[serde(default)]
    pub events: Vec<Event>,
}

impl ConversationSnapshot {
    /// The conversation identity.
    pub fn id(&self) -> ConversationId {
        self.conversation.id
    }
}
