//! # sync-core
//!
//! Pure logic for chatsync (no I/O, instant tests).
//!
//! This crate holds the algorithms of the sync engine without any network or
//! disk access:
//!
//! - [`ordering`]: move-to-front conversation chain, planned as ops
//! - [`cursor`]: account cursor admission, gap paging and completeness checks
//! - [`state`]: session lifecycle state machine
//! - [`upload`]: upload failure classes and retry backoff
//!
//! The actual I/O (SQLite, HTTP, tasks) is performed by `sync-client`, which
//! interprets the plans and actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod ordering;
pub mod state;
pub mod upload;

pub use cursor::{admit, assemble, plan_pages, AccountCursor, Admission, GapError, PageRequest, VersionRange};
pub use ordering::{
    plan_append, plan_promote, MemoryOrdering, Neighbourhood, OrderingError, OrderingInstance,
    OrderingOp,
};
pub use state::{SessionAction, SessionEvent, SessionState};
pub use upload::{Backoff, FailureClass, UploadDecision};
