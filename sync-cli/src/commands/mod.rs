//! CLI command implementations.

pub mod conversations;
pub mod history;
pub mod status;

use anyhow::Result;
use std::sync::Arc;

use chatsync_client::remote::{Anonymous, Credentials};
use chatsync_client::{
    Config, ConversationPager, HistoryPager, HttpRemote, MockRemote, RemoteLog, SqliteStore,
    StaticToken,
};

/// An opened replica plus the pagers reading it.
pub struct Replica {
    /// The replica database.
    pub store: Arc<SqliteStore>,
    /// Conversation list pager.
    pub conversations: ConversationPager,
    /// Conversation history pager.
    pub history: HistoryPager,
    /// Where the database lives, for display.
    pub location: String,
}

impl Replica {
    /// Open the configured database and connect the pagers to a remote.
    pub async fn open(config: &Config, mock: bool, token: Option<String>) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(&config.storage.database).await?);
        let remote: Arc<dyn RemoteLog> = if mock {
            Arc::new(MockRemote::new())
        } else {
            let credentials: Arc<dyn Credentials> = match token {
                Some(token) => Arc::new(StaticToken(token)),
                None => Arc::new(Anonymous),
            };
            Arc::new(HttpRemote::new(&config.remote, credentials)?)
        };
        Ok(Self::with_parts(
            store,
            remote,
            config,
            config.storage.database.display().to_string(),
        ))
    }

    /// Assemble a replica from already opened parts.
    pub fn with_parts(
        store: Arc<SqliteStore>,
        remote: Arc<dyn RemoteLog>,
        config: &Config,
        location: String,
    ) -> Self {
        Self {
            conversations: ConversationPager::new(
                store.clone(),
                remote.clone(),
                config.sync.page_limit,
            ),
            history: HistoryPager::new(
                store.clone(),
                remote,
                config.sync.page_limit,
                config.sync.history_retention,
            ),
            store,
            location,
        }
    }
}
