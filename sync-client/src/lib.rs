//! # sync-client
//!
//! Local-first sync engine for two-party conversations.
//!
//! One [`Synchronizer`] per signed-in account keeps a SQLite replica of the
//! account's conversations in step with the server's versioned event log:
//!
//! - **Local intents first**: sends are persisted as pending and shown right
//!   away, then uploaded one at a time by a durable background job
//! - **Gapless cursor**: confirmed events are applied strictly in version
//!   order; missing versions are fetched in parallel pages first
//! - **Recency orderings**: Local and Remote conversation orderings kept as
//!   persistent move-to-front lists
//! - **Pure core**: lifecycle, cursor and ordering decisions come from
//!   sync-core
//!
//! ## Example
//!
//! ```ignore
//! use chatsync_client::{Config, EventFeed, SessionParts, Synchronizer};
//!
//! let sync = Synchronizer::new(parts, &config.sync, &config.upload);
//! sync.start().await?;
//! sync.send(conversation, EventBody::Text { content: "hi".into() }).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod feed;
pub mod gap;
pub mod media;
pub mod paging;
pub mod remote;
pub mod scheduler;
pub mod signal;
pub mod storage;
pub mod synchronizer;
pub mod upload;

pub use config::{Config, ConfigError};
pub use error::{EngineError, RemoteError, Result, StorageError};
pub use feed::{EventFeed, FeedItem, Origin};
pub use gap::GapFiller;
pub use media::{FileCache, MediaSource};
pub use paging::{ConversationPager, HistoryPager};
pub use remote::{Credentials, HttpRemote, MockRemote, RemoteLog, StaticToken};
pub use scheduler::{
    Connectivity, JobConstraints, JobFailure, JobHandler, JobStatus, LocalScheduler, Scheduler,
};
pub use signal::AppSignal;
pub use storage::{ReplicaStore, SqliteStore};
pub use synchronizer::{upload_tag, SessionParts, Synchronizer};
pub use upload::{UploadCoordinator, UploadOutcome};
