//! Show replica status.

use anyhow::Result;

use chatsync_client::storage::{JobStore, ReplicaStore};
use chatsync_core::OrderingInstance;

use super::Replica;

/// Run the status command.
pub async fn run(replica: &Replica) -> Result<()> {
    let store = &replica.store;

    println!("=== chatsync status ===");
    println!();
    println!("Replica: {}", replica.location);
    println!("  Cursor: {}", store.cursor().await?);

    match store.find_oldest_unconfirmed().await? {
        Some(event) => println!(
            "  Pending: yes (oldest {} {} in {})",
            event.kind(),
            event.id,
            event.conversation
        ),
        None => println!("  Pending: none"),
    }

    println!();
    println!("Orderings:");
    for instance in [OrderingInstance::Local, OrderingInstance::Remote] {
        let head = store.head(instance).await?;
        let tail = store.tail(instance).await?;
        match (head, tail) {
            (Some(head), Some(tail)) => {
                println!("  {:<6} head {}", instance.as_str(), head);
                println!("  {:<6} tail {}", "", tail);
            }
            _ => println!("  {:<6} empty", instance.as_str()),
        }
    }

    println!();
    let jobs = store.queued_jobs().await?;
    if jobs.is_empty() {
        println!("Upload jobs: none queued");
    } else {
        println!("Upload jobs:");
        for job in jobs {
            println!(
                "  {} (attempts: {}, network: {})",
                job.tag,
                job.attempts,
                if job.require_network { "required" } else { "any" }
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_client::{Config, MockRemote, SqliteStore};
    use chatsync_types::{ConversationId, Event, EventBody, UserId};
    use std::sync::Arc;

    async fn replica() -> Replica {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        Replica::with_parts(
            store,
            Arc::new(MockRemote::new()),
            &Config::default(),
            ":memory:".into(),
        )
    }

    #[tokio::test]
    async fn status_of_empty_replica() {
        let replica = replica().await;
        assert!(run(&replica).await.is_ok());
    }

    #[tokio::test]
    async fn status_with_pending_event_and_job() {
        let replica = replica().await;
        let me = UserId::random();
        let id = ConversationId::new(me, UserId::random()).unwrap();
        replica
            .store
            .persist_local(&Event::pending(
                id,
                me,
                EventBody::Text {
                    content: "hi".into(),
                },
                1,
            ))
            .await
            .unwrap();
        replica.store.insert_job("upload:me", &[], true).await.unwrap();

        assert!(run(&replica).await.is_ok());
    }

    #[tokio::test]
    async fn status_of_on_disk_replica() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.database = dir.path().join("replica.db");

        let replica = Replica::open(&config, true, None).await.unwrap();
        assert!(run(&replica).await.is_ok());
        assert!(config.storage.database.exists());
    }
}
