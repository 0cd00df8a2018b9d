//! # sync-types
//!
//! Event and identity types for the chatsync conversation replica.
//!
//! This crate provides the foundational types used across all chatsync crates:
//! - [`UserId`], [`ConversationId`], [`EventId`], [`Version`] - Identity and ordering types
//! - [`Event`], [`EventBody`] - The closed set of conversation events
//! - [`ConversationRecord`], [`ConversationSnapshot`] - Conversation metadata
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod snapshot;

pub use error::SyncError;
pub use event::{Event, EventBody, EventKind, ImageSpec};
pub use ids::{ConversationId, EventId, UserId, Version};
pub use snapshot::{ConversationRecord, ConversationSnapshot};
