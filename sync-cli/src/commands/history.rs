//! Show the events of one conversation.

use anyhow::Result;

use chatsync_types::ConversationId;

use super::conversations::summary;
use super::Replica;

/// Run the history command.
pub async fn run(replica: &Replica, conversation: ConversationId, before: Option<i64>) -> Result<()> {
    let events = replica.history.page(conversation, before).await?;

    if events.is_empty() {
        println!("No events in {conversation}.");
        return Ok(());
    }

    println!("Conversation {conversation}:");
    for event in &events {
        println!("  {}  {}  {}", event.received_at, event.sender, summary(event));
    }

    if let Some(oldest) = events.last() {
        println!();
        println!(
            "Older: chatsync history {} --before {}",
            conversation, oldest.received_at
        );
    }
    Ok(())
}
