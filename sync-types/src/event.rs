//! Conversation events.
//!
//! An [`Event`] is the unit of replication. Its payload is a closed
//! [`EventBody`] union with exactly one active variant. Events without a
//! [`Version`] are pending (created locally, not yet accepted by the server);
//! events with one are confirmed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ConversationId, EventId, SyncError, UserId, Version};

/// Dimensions and location of an image attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Original file name.
    pub filename: String,
    /// Location of the cached local copy (or remote URL once uploaded).
    pub uri: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The payload of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventBody {
    /// Plain text message.
    Text {
        /// Message text.
        content: String,
    },
    /// Image message.
    Image(ImageSpec),
    /// Sticker/icon message.
    Icon {
        /// Identifier of the icon resource.
        resource_id: u32,
    },
    /// Read receipt.
    Seen {
        /// When the partner's messages were seen (ms since epoch).
        at: i64,
    },
}

impl EventBody {
    /// The discriminator of this body.
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::Text { .. } => EventKind::Text,
            EventBody::Image(_) => EventKind::Image,
            EventBody::Icon { .. } => EventKind::Icon,
            EventBody::Seen { .. } => EventKind::Seen,
        }
    }

    /// Serialize to MessagePack bytes (storage form).
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

/// Event discriminator, also used as the storage column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`EventBody::Text`]
    Text,
    /// [`EventBody::Image`]
    Image,
    /// [`EventBody::Icon`]
    Icon,
    /// [`EventBody::Seen`]
    Seen,
}

impl EventKind {
    /// Stable text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "TEXT",
            EventKind::Image => "IMAGE",
            EventKind::Icon => "ICON",
            EventKind::Seen => "SEEN",
        }
    }

    /// Message kinds move a conversation to the front; Seen does not.
    pub fn is_message(&self) -> bool {
        !matches!(self, EventKind::Seen)
    }
}

impl FromStr for EventKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(EventKind::Text),
            "IMAGE" => Ok(EventKind::Image),
            "ICON" => Ok(EventKind::Icon),
            "SEEN" => Ok(EventKind::Seen),
            other => Err(SyncError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Dedup key, stable across local and remote copies.
    pub id: EventId,
    /// Conversation this event belongs to.
    pub conversation: ConversationId,
    /// Participant that produced the event.
    pub sender: UserId,
    /// Payload.
    pub body: EventBody,
    /// Creation time on the sending device (ms since epoch).
    pub created_at: i64,
    /// Local receive time (ms since epoch); display ordering key.
    #[serde(default)]
    pub received_at: i64,
    /// Server-assigned version; `None` while pending.
    #[serde(default)]
    pub version: Option<Version>,
    /// Whether the event has been durably persisted locally.
    #[serde(default, skip_serializing)]
    pub committed: bool,
}

impl Event {
    /// Create a new pending event authored by `sender`.
    ///
    /// `received_at` starts equal to `created_at` and is restamped when the
    /// event enters the local replica.
    pub fn pending(
        conversation: ConversationId,
        sender: UserId,
        body: EventBody,
        created_at: i64,
    ) -> Self {
        Self {
            id: EventId::new(),
            conversation,
            sender,
            body,
            created_at,
            received_at: created_at,
            version: None,
            committed: false,
        }
    }

    /// Copy of this event as the server would confirm it.
    pub fn confirmed(&self, version: Version) -> Self {
        Self {
            version: Some(version),
            committed: false,
            ..self.clone()
        }
    }

    /// The discriminator of the body.
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Whether this event reorders conversations (Text/Image/Icon).
    pub fn is_message(&self) -> bool {
        self.kind().is_message()
    }

    /// An event without a server version.
    pub fn is_pending(&self) -> bool {
        self.version.is_none()
    }

    /// Structural checks every stored event must pass.
    ///
    /// The sender must take part in the conversation.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.conversation.contains(self.sender) {
            return Err(SyncError::Validation(format!(
                "event {} sender {} is not a participant of {}",
                self.id, self.sender, self.conversation
            )));
        }
        if let Some(version) = self.version {
            if version == Version::zero() {
                return Err(SyncError::Validation(format!(
                    "event {} carries version 0",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
