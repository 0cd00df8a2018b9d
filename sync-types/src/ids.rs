//! Identity and ordering types for chatsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SyncError;

/// A unique identifier for a user (account or conversation partner).
///
/// UUID format. Users are totally ordered by their UUID, which is what
/// canonicalises a [`ConversationId`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Create a new random UserId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for UserId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidId(format!("user id {s:?}")))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", &self.to_string()[..8])
    }
}

/// Identity of a two-party conversation.
///
/// An unordered pair of participants, stored with the smaller id first so
/// that `ConversationId::new(a, b) == ConversationId::new(b, a)`.
/// Text form is `"<first>+<second>"`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId {
    first: UserId,
    second: UserId,
}

impl ConversationId {
    /// Build the canonical identity for the pair `(a, b)`.
    ///
    /// Returns an error when both participants are the same user.
    pub fn new(a: UserId, b: UserId) -> Result<Self, SyncError> {
        if a == b {
            return Err(SyncError::Validation(format!(
                "conversation needs two distinct participants, got {a} twice"
            )));
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { first, second })
    }

    /// The participant with the smaller id.
    pub fn first(&self) -> UserId {
        self.first
    }

    /// The participant with the larger id.
    pub fn second(&self) -> UserId {
        self.second
    }

    /// Check whether `user` takes part in this conversation.
    pub fn contains(&self, user: UserId) -> bool {
        self.first == user || self.second == user
    }

    /// The other participant, seen from `user`.
    ///
    /// Returns `None` if `user` is not a participant.
    pub fn partner_of(&self, user: UserId) -> Option<UserId> {
        if self.first == user {
            Some(self.second)
        } else if self.second == user {
            Some(self.first)
        } else {
            None
        }
    }
}

impl FromStr for ConversationId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once('+')
            .ok_or_else(|| SyncError::InvalidId(format!("conversation id {s:?}")))?;
        Self::new(a.parse()?, b.parse()?)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.first, self.second)
    }
}

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConversationId({}+{})",
            &self.first.to_string()[..8],
            &self.second.to_string()[..8]
        )
    }
}

/// A unique identifier for an event.
///
/// UUID v4 format, minted by the device that creates the event and kept
/// unchanged when the server confirms it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(uuid::Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for EventId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SyncError::InvalidId(format!("event id {s:?}")))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// A per-account, strictly increasing version assigned by the server.
///
/// Versions are more reliable than timestamps because device clocks can
/// drift. `Version(0)` means nothing has been applied yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// Create a new Version with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Version.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The version before anything was applied.
    pub fn zero() -> Self {
        Self(0)
    }

    /// The version directly after this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The version directly before this one (saturating at zero).
    pub fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}
