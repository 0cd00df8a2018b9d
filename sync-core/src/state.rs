//! Session lifecycle state machine.
//!
//! A pure, side-effect-free state machine for one signed-in account. It takes
//! lifecycle events and produces a new state plus the actions to execute.
//! The synchronizer in sync-client performs the actual work (feeds, tasks,
//! scheduler calls).

/// Lifecycle of an account session. `LoggedOut` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing registered, no tasks running.
    #[default]
    Stopped,
    /// Registering with the inbound and outbound feeds.
    Starting,
    /// Intake loop and upload watcher are running.
    Running,
    /// Session ended; nothing restarts it.
    LoggedOut,
}

impl SessionState {
    /// Create a new session in the Stopped state.
    pub fn new() -> Self {
        Self::Stopped
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: SessionEvent) -> (Self, Vec<SessionAction>) {
        use SessionAction::*;

        match (self, event) {
            (Self::Stopped, SessionEvent::StartRequested) => (Self::Starting, vec![RegisterFeeds]),

            (Self::Starting, SessionEvent::FeedsRegistered) => (
                Self::Running,
                vec![SpawnIntake, SpawnWatcher, ScheduleUpload],
            ),

            (Self::Running, SessionEvent::Reauthenticated) => (Self::Running, vec![ScheduleUpload]),

            (Self::Running, SessionEvent::LogoutRequested) => (
                Self::LoggedOut,
                vec![UnregisterFeeds, CancelIntake, CancelWatcher, CancelUploads],
            ),
            (Self::Starting, SessionEvent::LogoutRequested) => {
                (Self::LoggedOut, vec![UnregisterFeeds, CancelUploads])
            }
            (Self::Stopped, SessionEvent::LogoutRequested) => {
                (Self::LoggedOut, vec![CancelUploads])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether the intake loop should be consuming events.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Events that drive the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The application started the session.
    StartRequested,
    /// Both feed registrations completed.
    FeedsRegistered,
    /// Credentials were refreshed after an authorization failure.
    Reauthenticated,
    /// The user logged out.
    LogoutRequested,
}

/// Work the synchronizer must perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Register with the inbound and outbound feeds.
    RegisterFeeds,
    /// Unregister from both feeds.
    UnregisterFeeds,
    /// Start the ordered intake loop.
    SpawnIntake,
    /// Stop the intake loop.
    CancelIntake,
    /// Start the upload-status watcher.
    SpawnWatcher,
    /// Stop the upload-status watcher.
    CancelWatcher,
    /// Enqueue the single-flight upload job.
    ScheduleUpload,
    /// Drop queued upload jobs for the account.
    CancelUploads,
}
