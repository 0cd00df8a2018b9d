//! SQLite storage backend for sync-client.

use super::{ConfirmedWrite, JobRecord, JobState, JobStore, LocalWrite, ReplicaStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use chatsync_core::{
    plan_append, plan_promote, AccountCursor, Admission, Neighbourhood, OrderingInstance,
    OrderingOp,
};
use chatsync_types::{
    ConversationId, ConversationRecord, ConversationSnapshot, Event, EventBody, EventId, EventKind,
    Version,
};

const EVENT_COLUMNS: &str =
    "id, conversation, sender, kind, body, created_at, received_at, version, committed";

/// SQLite-based replica storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the replica database at `path`.
    pub async fn new(path: &Path) -> StorageResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory replica (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS account_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                version INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                first_user TEXT NOT NULL,
                second_user TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                conversation TEXT NOT NULL,
                sender TEXT NOT NULL,
                kind TEXT NOT NULL,
                body BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                received_at INTEGER NOT NULL,
                version INTEGER,
                committed INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ordering_nodes (
                instance TEXT NOT NULL,
                conversation TEXT NOT NULL,
                next TEXT,
                PRIMARY KEY (instance, conversation)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ordering_anchors (
                instance TEXT PRIMARY KEY,
                head TEXT,
                tail TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                tag TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                not_before INTEGER NOT NULL DEFAULT 0,
                require_network INTEGER NOT NULL DEFAULT 1
            )
            "#,
            "INSERT OR IGNORE INTO account_cursor (id, version) VALUES (0, 0)",
            "CREATE INDEX IF NOT EXISTS idx_events_conversation_received ON events(conversation, received_at)",
            "CREATE INDEX IF NOT EXISTS idx_events_pending ON events(version, received_at)",
            "CREATE INDEX IF NOT EXISTS idx_events_conversation_version ON events(conversation, version)",
            "CREATE INDEX IF NOT EXISTS idx_ordering_next ON ordering_nodes(instance, next)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// Row-level helpers shared by the trait methods. All of them run on a
// connection so they compose inside one transaction.

async fn read_cursor(conn: &mut SqliteConnection) -> StorageResult<Version> {
    let version: i64 = sqlx::query_scalar("SELECT version FROM account_cursor WHERE id = 0")
        .fetch_one(&mut *conn)
        .await?;
    Ok(Version::new(version as u64))
}

async fn write_cursor(conn: &mut SqliteConnection, version: Version) -> StorageResult<()> {
    sqlx::query("UPDATE account_cursor SET version = ?1 WHERE id = 0")
        .bind(version.value() as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn ensure_conversation(
    conn: &mut SqliteConnection,
    id: ConversationId,
    created_at: i64,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO conversations (id, first_user, second_user, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(id.to_string())
    .bind(id.first().to_string())
    .bind(id.second().to_string())
    .bind(created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn load_event(conn: &mut SqliteConnection, id: EventId) -> StorageResult<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Event::try_from).transpose()
}

async fn oldest_unconfirmed_of_kind(
    conn: &mut SqliteConnection,
    conversation: ConversationId,
    kind: EventKind,
) -> StorageResult<Option<Event>> {
    let row = sqlx::query_as::<_, EventRow>(&format!(
        r#"
        SELECT {EVENT_COLUMNS} FROM events
        WHERE version IS NULL AND conversation = ?1 AND kind = ?2
        ORDER BY received_at ASC
        LIMIT 1
        "#
    ))
    .bind(conversation.to_string())
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Event::try_from).transpose()
}

async fn insert_event(conn: &mut SqliteConnection, event: &Event) -> StorageResult<()> {
    sqlx::query(&format!(
        "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)"
    ))
    .bind(event.id.to_string())
    .bind(event.conversation.to_string())
    .bind(event.sender.to_string())
    .bind(event.kind().as_str())
    .bind(event.body.to_bytes()?)
    .bind(event.created_at)
    .bind(event.received_at)
    .bind(event.version.map(|v| v.value() as i64))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert or merge by id. Returns `true` when a new row was inserted.
async fn upsert_event(conn: &mut SqliteConnection, event: &Event) -> StorageResult<bool> {
    ensure_conversation(conn, event.conversation, event.created_at).await?;

    if load_event(conn, event.id).await?.is_some() {
        // Merge confirmation into the existing row; receive time stays.
        sqlx::query(
            r#"
            UPDATE events
            SET version = COALESCE(?2, version), committed = 1
            WHERE id = ?1
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.version.map(|v| v.value() as i64))
        .execute(&mut *conn)
        .await?;
        return Ok(false);
    }

    insert_event(conn, event).await?;
    Ok(true)
}

fn parse_conversation(text: &str) -> StorageResult<ConversationId> {
    text.parse()
        .map_err(|_| StorageError::Corrupt(format!("conversation id {text:?}")))
}

async fn anchors(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
) -> StorageResult<(Option<ConversationId>, Option<ConversationId>)> {
    let row: Option<(Option<String>, Option<String>)> =
        sqlx::query_as("SELECT head, tail FROM ordering_anchors WHERE instance = ?1")
            .bind(instance.as_str())
            .fetch_optional(&mut *conn)
            .await?;

    let (head, tail) = row.unwrap_or((None, None));
    Ok((
        head.as_deref().map(parse_conversation).transpose()?,
        tail.as_deref().map(parse_conversation).transpose()?,
    ))
}

async fn next_of(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
    id: ConversationId,
) -> StorageResult<Option<Option<ConversationId>>> {
    let next: Option<Option<String>> = sqlx::query_scalar(
        "SELECT next FROM ordering_nodes WHERE instance = ?1 AND conversation = ?2",
    )
    .bind(instance.as_str())
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    match next {
        Some(next) => Ok(Some(next.as_deref().map(parse_conversation).transpose()?)),
        None => Ok(None),
    }
}

async fn neighbourhood(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
    id: ConversationId,
) -> StorageResult<Neighbourhood<ConversationId>> {
    let (head, tail) = anchors(conn, instance).await?;

    let Some(successor) = next_of(conn, instance, id).await? else {
        return Ok(Neighbourhood::absent(head, tail));
    };

    let predecessor: Option<String> = sqlx::query_scalar(
        "SELECT conversation FROM ordering_nodes WHERE instance = ?1 AND next = ?2 LIMIT 1",
    )
    .bind(instance.as_str())
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(Neighbourhood {
        head,
        tail,
        present: true,
        predecessor: predecessor.as_deref().map(parse_conversation).transpose()?,
        successor,
    })
}

async fn apply_ops(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
    ops: &[OrderingOp<ConversationId>],
) -> StorageResult<()> {
    for op in ops {
        match op {
            OrderingOp::SetNext { node, next } => {
                sqlx::query(
                    r#"
                    INSERT INTO ordering_nodes (instance, conversation, next)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(instance, conversation) DO UPDATE SET next = excluded.next
                    "#,
                )
                .bind(instance.as_str())
                .bind(node.to_string())
                .bind(next.map(|n| n.to_string()))
                .execute(&mut *conn)
                .await?;
            }
            OrderingOp::SetHead(node) => {
                sqlx::query(
                    r#"
                    INSERT INTO ordering_anchors (instance, head, tail) VALUES (?1, ?2, NULL)
                    ON CONFLICT(instance) DO UPDATE SET head = excluded.head
                    "#,
                )
                .bind(instance.as_str())
                .bind(node.to_string())
                .execute(&mut *conn)
                .await?;
            }
            OrderingOp::SetTail(node) => {
                sqlx::query(
                    r#"
                    INSERT INTO ordering_anchors (instance, head, tail) VALUES (?1, NULL, ?2)
                    ON CONFLICT(instance) DO UPDATE SET tail = excluded.tail
                    "#,
                )
                .bind(instance.as_str())
                .bind(node.to_string())
                .execute(&mut *conn)
                .await?;
            }
        }
    }
    Ok(())
}

async fn promote_in(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
    id: ConversationId,
) -> StorageResult<()> {
    let n = neighbourhood(conn, instance, id).await?;
    let ops = plan_promote(id, &n)?;
    apply_ops(conn, instance, &ops).await
}

async fn append_tail_in(
    conn: &mut SqliteConnection,
    instance: OrderingInstance,
    id: ConversationId,
) -> StorageResult<()> {
    let n = neighbourhood(conn, instance, id).await?;
    let ops = plan_append(id, &n);
    apply_ops(conn, instance, &ops).await
}

async fn insert_history(conn: &mut SqliteConnection, event: &Event) -> StorageResult<bool> {
    if event.is_pending() {
        return Ok(false);
    }
    event.validate()?;
    upsert_event(conn, event).await
}

#[async_trait]
impl ReplicaStore for SqliteStore {
    async fn cursor(&self) -> StorageResult<Version> {
        let mut conn = self.pool.acquire().await?;
        read_cursor(&mut conn).await
    }

    async fn append(&self, event: &Event) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;
        let inserted = upsert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn persist_local(&self, event: &Event) -> StorageResult<LocalWrite> {
        let mut tx = self.pool.begin().await?;

        if load_event(&mut tx, event.id).await?.is_some() {
            return Ok(LocalWrite::Duplicate);
        }

        if event.kind() == EventKind::Seen {
            if let Some(pending) =
                oldest_unconfirmed_of_kind(&mut tx, event.conversation, EventKind::Seen).await?
            {
                return Ok(LocalWrite::SeenSuppressed { pending: pending.id });
            }
        }

        ensure_conversation(&mut tx, event.conversation, event.created_at).await?;
        insert_event(&mut tx, event).await?;
        if event.is_message() {
            promote_in(&mut tx, OrderingInstance::Local, event.conversation).await?;
        }

        tx.commit().await?;
        Ok(LocalWrite::Inserted)
    }

    async fn apply_confirmed(&self, event: &Event) -> StorageResult<ConfirmedWrite> {
        let version = event.version.ok_or_else(|| {
            StorageError::Corrupt(format!("event {} has no version", event.id))
        })?;

        let mut tx = self.pool.begin().await?;
        let mut cursor = AccountCursor::at(read_cursor(&mut tx).await?);

        match cursor.admit(version) {
            Admission::Stale => return Ok(ConfirmedWrite::Stale),
            Admission::Gap(_) => {
                return Err(StorageError::NotContiguous {
                    cursor: cursor.value(),
                    version,
                })
            }
            Admission::Next => {}
        }

        let inserted = upsert_event(&mut tx, event).await?;
        if event.is_message() {
            promote_in(&mut tx, OrderingInstance::Remote, event.conversation).await?;
            promote_in(&mut tx, OrderingInstance::Local, event.conversation).await?;
        }
        cursor.advance(version)?;
        write_cursor(&mut tx, cursor.value()).await?;

        tx.commit().await?;
        Ok(ConfirmedWrite::Applied {
            reconciled: !inserted,
        })
    }

    async fn event(&self, id: EventId) -> StorageResult<Option<Event>> {
        let mut conn = self.pool.acquire().await?;
        load_event(&mut conn, id).await
    }

    async fn list_events(
        &self,
        conversation: ConversationId,
        before: Option<i64>,
        limit: u32,
    ) -> StorageResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE conversation = ?1 AND received_at < ?2
            ORDER BY received_at DESC
            LIMIT ?3
            "#
        ))
        .bind(conversation.to_string())
        .bind(before.unwrap_or(i64::MAX))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn find_oldest_unconfirmed(&self) -> StorageResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE version IS NULL
            ORDER BY received_at ASC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Event::try_from).transpose()
    }

    async fn find_oldest_unconfirmed_of_kind(
        &self,
        conversation: ConversationId,
        kind: EventKind,
    ) -> StorageResult<Option<Event>> {
        let mut conn = self.pool.acquire().await?;
        oldest_unconfirmed_of_kind(&mut conn, conversation, kind).await
    }

    async fn has_unconfirmed(&self) -> StorageResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE version IS NULL)")
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn count_confirmed(&self, conversation: ConversationId) -> StorageResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM events WHERE conversation = ?1 AND version IS NOT NULL",
        )
        .bind(conversation.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn oldest_confirmed_version(
        &self,
        conversation: ConversationId,
    ) -> StorageResult<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MIN(version) FROM events WHERE conversation = ?1")
                .bind(conversation.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(version.map(|v| Version::new(v as u64)))
    }

    async fn store_history(&self, events: &[Event]) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for event in events {
            if insert_history(&mut tx, event).await? {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn conversation(&self, id: ConversationId) -> StorageResult<Option<ConversationRecord>> {
        let created_at: Option<i64> =
            sqlx::query_scalar("SELECT created_at FROM conversations WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(created_at.map(|created_at| ConversationRecord::new(id, created_at)))
    }

    async fn expand_conversations(
        &self,
        expected_cursor: Version,
        snapshots: &[ConversationSnapshot],
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        if read_cursor(&mut tx).await? != expected_cursor {
            return Ok(false);
        }

        for snapshot in snapshots {
            let id = snapshot.id();
            ensure_conversation(&mut tx, id, snapshot.conversation.created_at).await?;
            for event in &snapshot.events {
                let mut event = event.clone();
                event.received_at = event.created_at;
                insert_history(&mut tx, &event).await?;
            }
            append_tail_in(&mut tx, OrderingInstance::Remote, id).await?;
            append_tail_in(&mut tx, OrderingInstance::Local, id).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn promote(&self, instance: OrderingInstance, id: ConversationId) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        promote_in(&mut tx, instance, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_tail(
        &self,
        instance: OrderingInstance,
        id: ConversationId,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        append_tail_in(&mut tx, instance, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn head(&self, instance: OrderingInstance) -> StorageResult<Option<ConversationId>> {
        let mut conn = self.pool.acquire().await?;
        Ok(anchors(&mut conn, instance).await?.0)
    }

    async fn tail(&self, instance: OrderingInstance) -> StorageResult<Option<ConversationId>> {
        let mut conn = self.pool.acquire().await?;
        Ok(anchors(&mut conn, instance).await?.1)
    }

    async fn list_ordering(
        &self,
        instance: OrderingInstance,
        anchor: ConversationId,
        count: u32,
    ) -> StorageResult<Vec<ConversationId>> {
        let mut conn = self.pool.acquire().await?;

        let Some(mut next) = next_of(&mut conn, instance, anchor).await? else {
            return Ok(Vec::new());
        };

        let mut out = vec![anchor];
        while out.len() <= count as usize {
            let Some(id) = next else { break };
            out.push(id);
            next = next_of(&mut conn, instance, id).await?.flatten();
        }
        Ok(out)
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert_job(
        &self,
        tag: &str,
        payload: &[u8],
        require_network: bool,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (tag, payload, state, attempts, not_before, require_network)
            VALUES (?1, ?2, ?3, 0, 0, ?4)
            "#,
        )
        .bind(tag)
        .bind(payload)
        .bind(JobState::Queued.as_str())
        .bind(require_network)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn job(&self, tag: &str) -> StorageResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT tag, payload, state, attempts, not_before, require_network FROM jobs WHERE tag = ?1",
        )
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn update_job(
        &self,
        tag: &str,
        state: JobState,
        attempts: u32,
        not_before: i64,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE jobs SET state = ?2, attempts = ?3, not_before = ?4 WHERE tag = ?1")
            .bind(tag)
            .bind(state.as_str())
            .bind(attempts as i64)
            .bind(not_before)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_job(&self, tag: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM jobs WHERE tag = ?1")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_queued_job(&self, tag: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE tag = ?1 AND state = ?2")
            .bind(tag)
            .bind(JobState::Queued.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn queued_jobs(&self) -> StorageResult<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT tag, payload, state, attempts, not_before, require_network FROM jobs
            WHERE state = ?1
            ORDER BY not_before ASC
            "#,
        )
        .bind(JobState::Queued.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn requeue_running_jobs(&self) -> StorageResult<u64> {
        let result = sqlx::query("UPDATE jobs SET state = ?1 WHERE state = ?2")
            .bind(JobState::Queued.as_str())
            .bind(JobState::Running.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Internal row type for event queries.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    conversation: String,
    sender: String,
    kind: String,
    body: Vec<u8>,
    created_at: i64,
    received_at: i64,
    version: Option<i64>,
    committed: bool,
}

impl TryFrom<EventRow> for Event {
    type Error = StorageError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let body = EventBody::from_bytes(&row.body)?;
        let kind: EventKind = row.kind.parse()?;
        if body.kind() != kind {
            return Err(StorageError::Corrupt(format!(
                "event {} stored as {} but body is {}",
                row.id,
                kind,
                body.kind()
            )));
        }

        Ok(Event {
            id: row.id.parse()?,
            conversation: parse_conversation(&row.conversation)?,
            sender: row.sender.parse()?,
            body,
            created_at: row.created_at,
            received_at: row.received_at,
            version: row.version.map(|v| Version::new(v as u64)),
            committed: row.committed,
        })
    }
}

/// Internal row type for job queries.
#[derive(sqlx::FromRow)]
struct JobRow {
    tag: String,
    payload: Vec<u8>,
    state: String,
    attempts: i64,
    not_before: i64,
    require_network: bool,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = match row.state.as_str() {
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            other => {
                return Err(StorageError::Corrupt(format!(
                    "job {} in unknown state {other:?}",
                    row.tag
                )))
            }
        };
        Ok(JobRecord {
            tag: row.tag,
            payload: row.payload,
            state,
            attempts: row.attempts as u32,
            not_before: row.not_before,
            require_network: row.require_network,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_core::MemoryOrdering;
    use chatsync_types::UserId;

    struct Pair {
        me: UserId,
        id: ConversationId,
    }

    fn pair() -> Pair {
        let me = UserId::random();
        let id = ConversationId::new(me, UserId::random()).unwrap();
        Pair { me, id }
    }

    fn text(pair: &Pair, content: &str, at: i64) -> Event {
        Event::pending(
            pair.id,
            pair.me,
            EventBody::Text {
                content: content.into(),
            },
            at,
        )
    }

    fn seen(pair: &Pair, at: i64) -> Event {
        Event::pending(pair.id, pair.me, EventBody::Seen { at }, at)
    }

    #[tokio::test]
    async fn fresh_store_starts_at_version_zero() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Version::zero());
        assert!(!store.has_unconfirmed().await.unwrap());
    }

    #[tokio::test]
    async fn append_same_id_twice_keeps_one_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let pending = text(&p, "hello", 1_000);

        assert!(store.append(&pending).await.unwrap());
        let confirmed = Event {
            received_at: 9_999,
            ..pending.confirmed(Version::new(1))
        };
        assert!(!store.append(&confirmed).await.unwrap());

        let events = store.list_events(p.id, None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, Some(Version::new(1)));
        assert_eq!(events[0].received_at, 1_000);
        assert!(events[0].committed);
    }

    #[tokio::test]
    async fn persist_local_creates_conversation_and_promotes_local() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();

        let write = store.persist_local(&text(&p, "hi", 10)).await.unwrap();
        assert_eq!(write, LocalWrite::Inserted);

        assert!(store.conversation(p.id).await.unwrap().is_some());
        assert_eq!(store.head(OrderingInstance::Local).await.unwrap(), Some(p.id));
        assert_eq!(store.head(OrderingInstance::Remote).await.unwrap(), None);
        assert!(store.has_unconfirmed().await.unwrap());
    }

    #[tokio::test]
    async fn persist_local_twice_is_duplicate() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let event = text(&p, "hi", 10);

        store.persist_local(&event).await.unwrap();
        assert_eq!(store.persist_local(&event).await.unwrap(), LocalWrite::Duplicate);
        assert_eq!(store.list_events(p.id, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_pending_seen_is_suppressed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let first = seen(&p, 1);

        assert_eq!(store.persist_local(&first).await.unwrap(), LocalWrite::Inserted);
        assert_eq!(
            store.persist_local(&seen(&p, 2)).await.unwrap(),
            LocalWrite::SeenSuppressed { pending: first.id }
        );

        // Seen never reorders
        assert_eq!(store.head(OrderingInstance::Local).await.unwrap(), None);

        // Once confirmed, a new Seen may be queued
        store.apply_confirmed(&first.confirmed(Version::new(1))).await.unwrap();
        assert_eq!(store.persist_local(&seen(&p, 3)).await.unwrap(), LocalWrite::Inserted);
    }

    #[tokio::test]
    async fn pending_seen_is_per_conversation() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b) = (pair(), pair());

        store.persist_local(&seen(&a, 1)).await.unwrap();
        assert_eq!(store.persist_local(&seen(&b, 2)).await.unwrap(), LocalWrite::Inserted);
    }

    #[tokio::test]
    async fn apply_confirmed_reconciles_pending_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let pending = text(&p, "M1", 100);
        store.persist_local(&pending).await.unwrap();

        let write = store
            .apply_confirmed(&pending.confirmed(Version::new(1)))
            .await
            .unwrap();

        assert_eq!(write, ConfirmedWrite::Applied { reconciled: true });
        assert_eq!(store.cursor().await.unwrap(), Version::new(1));
        assert_eq!(store.count_confirmed(p.id).await.unwrap(), 1);
        assert!(!store.has_unconfirmed().await.unwrap());
        assert_eq!(store.head(OrderingInstance::Remote).await.unwrap(), Some(p.id));
    }

    #[tokio::test]
    async fn apply_confirmed_discards_stale_versions() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let event = text(&p, "once", 1).confirmed(Version::new(1));

        store.apply_confirmed(&event).await.unwrap();
        assert_eq!(store.apply_confirmed(&event).await.unwrap(), ConfirmedWrite::Stale);

        let other = text(&p, "other", 2).confirmed(Version::new(1));
        assert_eq!(store.apply_confirmed(&other).await.unwrap(), ConfirmedWrite::Stale);
        assert_eq!(store.list_events(p.id, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn apply_confirmed_rejects_gap_without_writing() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let event = text(&p, "far", 1).confirmed(Version::new(3));

        let err = store.apply_confirmed(&event).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::NotContiguous { cursor, version }
                if cursor == Version::zero() && version == Version::new(3)
        ));
        assert_eq!(store.cursor().await.unwrap(), Version::zero());
        assert!(store.event(event.id).await.unwrap().is_none());
        assert_eq!(store.head(OrderingInstance::Remote).await.unwrap(), None);
    }

    #[tokio::test]
    async fn confirmed_seen_does_not_reorder() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b) = (pair(), pair());

        store
            .apply_confirmed(&text(&a, "a", 1).confirmed(Version::new(1)))
            .await
            .unwrap();
        store
            .apply_confirmed(&text(&b, "b", 2).confirmed(Version::new(2)))
            .await
            .unwrap();
        store
            .apply_confirmed(&seen(&a, 3).confirmed(Version::new(3)))
            .await
            .unwrap();

        assert_eq!(store.head(OrderingInstance::Remote).await.unwrap(), Some(b.id));
        assert_eq!(store.cursor().await.unwrap(), Version::new(3));
    }

    #[tokio::test]
    async fn message_for_older_conversation_moves_it_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b) = (pair(), pair());

        for (n, p) in [(1, &a), (2, &b), (3, &a)] {
            store
                .apply_confirmed(&text(p, "m", n).confirmed(Version::new(n as u64)))
                .await
                .unwrap();
        }

        for instance in [OrderingInstance::Remote, OrderingInstance::Local] {
            assert_eq!(store.head(instance).await.unwrap(), Some(a.id));
            assert_eq!(
                store.list_ordering(instance, a.id, 10).await.unwrap(),
                vec![a.id, b.id]
            );
            assert_eq!(store.tail(instance).await.unwrap(), Some(b.id));
        }
    }

    #[tokio::test]
    async fn stored_ordering_matches_memory_ordering() {
        let store = SqliteStore::in_memory().await.unwrap();
        let ids: Vec<ConversationId> = (0..8).map(|_| pair().id).collect();
        let mut memory = MemoryOrdering::new();

        let mut seed = 7_u64;
        for step in 0..120 {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let id = ids[((seed >> 33) % ids.len() as u64) as usize];
            if step % 5 == 0 {
                store.append_tail(OrderingInstance::Local, id).await.unwrap();
                memory.append_tail(id);
            } else {
                store.promote(OrderingInstance::Local, id).await.unwrap();
                memory.promote(id).unwrap();
            }
        }

        let expected = memory.traverse().unwrap();
        let head = store.head(OrderingInstance::Local).await.unwrap().unwrap();
        let stored = store
            .list_ordering(OrderingInstance::Local, head, ids.len() as u32)
            .await
            .unwrap();
        assert_eq!(stored, expected);
        assert_eq!(store.tail(OrderingInstance::Local).await.unwrap(), memory.tail());
    }

    #[tokio::test]
    async fn list_ordering_of_unknown_anchor_is_empty() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store
            .list_ordering(OrderingInstance::Local, pair().id, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_events_pages_by_receive_time() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        for at in 1..=5 {
            store.append(&text(&p, &format!("m{at}"), at)).await.unwrap();
        }

        let first = store.list_events(p.id, None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|e| e.received_at).collect::<Vec<_>>(),
            vec![5, 4]
        );

        let second = store.list_events(p.id, Some(4), 10).await.unwrap();
        assert_eq!(
            second.iter().map(|e| e.received_at).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );
    }

    #[tokio::test]
    async fn oldest_unconfirmed_is_by_receive_time() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let later = text(&p, "later", 20);
        let earlier = text(&p, "earlier", 10);
        store.persist_local(&later).await.unwrap();
        store.persist_local(&earlier).await.unwrap();

        let oldest = store.find_oldest_unconfirmed().await.unwrap().unwrap();
        assert_eq!(oldest.id, earlier.id);

        assert!(store
            .find_oldest_unconfirmed_of_kind(p.id, EventKind::Seen)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn store_history_skips_pending_and_keeps_cursor() {
        let store = SqliteStore::in_memory().await.unwrap();
        let p = pair();
        let events = vec![
            text(&p, "v3", 3).confirmed(Version::new(3)),
            text(&p, "v2", 2).confirmed(Version::new(2)),
            text(&p, "pending", 4),
        ];

        assert_eq!(store.store_history(&events).await.unwrap(), 2);
        assert_eq!(store.cursor().await.unwrap(), Version::zero());
        assert_eq!(store.count_confirmed(p.id).await.unwrap(), 2);
        assert_eq!(
            store.oldest_confirmed_version(p.id).await.unwrap(),
            Some(Version::new(2))
        );
    }

    #[tokio::test]
    async fn expand_threads_onto_both_tails() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b, c) = (pair(), pair(), pair());
        store
            .apply_confirmed(&text(&a, "a", 50).confirmed(Version::new(1)))
            .await
            .unwrap();

        let snapshot = |p: &Pair, at: i64| ConversationSnapshot {
            conversation: ConversationRecord::new(p.id, at),
            events: vec![Event {
                received_at: 0,
                ..text(p, "old", at).confirmed(Version::new(1))
            }],
        };
        let stored = store
            .expand_conversations(Version::new(1), &[snapshot(&b, 7), snapshot(&c, 5)])
            .await
            .unwrap();
        assert!(stored);

        for instance in [OrderingInstance::Remote, OrderingInstance::Local] {
            assert_eq!(
                store.list_ordering(instance, a.id, 10).await.unwrap(),
                vec![a.id, b.id, c.id]
            );
        }
        let history = store.list_events(b.id, None, 10).await.unwrap();
        assert_eq!(history[0].received_at, history[0].created_at);
        assert_eq!(store.cursor().await.unwrap(), Version::new(1));
    }

    #[tokio::test]
    async fn expand_is_skipped_when_cursor_moved() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (a, b) = (pair(), pair());
        store
            .apply_confirmed(&text(&a, "a", 1).confirmed(Version::new(1)))
            .await
            .unwrap();

        let snapshot = ConversationSnapshot {
            conversation: ConversationRecord::new(b.id, 1),
            events: Vec::new(),
        };
        let stored = store
            .expand_conversations(Version::zero(), &[snapshot])
            .await
            .unwrap();

        assert!(!stored);
        assert!(store.conversation(b.id).await.unwrap().is_none());
        assert_eq!(store.tail(OrderingInstance::Local).await.unwrap(), Some(a.id));
    }

    #[tokio::test]
    async fn jobs_keep_existing_tag() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(store.insert_job("upload", b"one", true).await.unwrap());
        assert!(!store.insert_job("upload", b"two", true).await.unwrap());

        let job = store.job("upload").await.unwrap().unwrap();
        assert_eq!(job.payload, b"one".to_vec());
        assert_eq!(job.state, JobState::Queued);
        assert!(job.require_network);
    }

    #[tokio::test]
    async fn cancel_only_drops_queued_jobs() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_job("queued", b"", false).await.unwrap();
        store.insert_job("running", b"", false).await.unwrap();
        store
            .update_job("running", JobState::Running, 0, 0)
            .await
            .unwrap();

        assert!(store.cancel_queued_job("queued").await.unwrap());
        assert!(!store.cancel_queued_job("running").await.unwrap());
        assert!(store.job("running").await.unwrap().is_some());

        assert_eq!(store.requeue_running_jobs().await.unwrap(), 1);
        assert_eq!(store.queued_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");
        let p = pair();

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store
                .apply_confirmed(&text(&p, "kept", 1).confirmed(Version::new(1)))
                .await
                .unwrap();
        }

        let store = SqliteStore::new(&path).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Version::new(1));
        assert_eq!(store.head(OrderingInstance::Local).await.unwrap(), Some(p.id));
    }
}
