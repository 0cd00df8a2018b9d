//! Notifications published by a session to the application.

use chatsync_types::{Event, UserId};

/// Something the application may want to react to.
#[derive(Debug, Clone)]
pub enum AppSignal {
    /// A local intent entered the session, before it is persisted.
    LocalEcho(Event),
    /// A confirmed event was applied to the replica.
    Committed(Event),
    /// The server rejected the account's credentials; uploads are halted
    /// until the session is reauthenticated.
    Unauthorized {
        /// Account of the session.
        account: UserId,
        /// HTTP status the server answered with.
        status: u16,
    },
}
