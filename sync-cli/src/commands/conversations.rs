//! List conversations.

use anyhow::Result;

use chatsync_types::{ConversationId, Event, EventBody};

use super::Replica;

/// Run the conversations command.
pub async fn run(replica: &Replica, anchor: Option<ConversationId>) -> Result<()> {
    let page = replica.conversations.page(anchor).await?;

    if page.is_empty() {
        println!("No conversations.");
        return Ok(());
    }

    for snapshot in &page {
        let latest = snapshot
            .events
            .first()
            .map(summary)
            .unwrap_or_else(|| "(no events)".to_string());
        println!("{}  {}", snapshot.id(), latest);
    }

    if let Some(last) = page.last() {
        println!();
        println!("Next page: chatsync conversations --anchor {}", last.id());
    }
    Ok(())
}

/// One-line description of an event.
pub fn summary(event: &Event) -> String {
    let state = match event.version {
        Some(version) => format!("v{version}"),
        None => "pending".to_string(),
    };
    let body = match &event.body {
        EventBody::Text { content } => content.clone(),
        EventBody::Image(image) => format!("[image {}x{}] {}", image.width, image.height, image.filename),
        EventBody::Icon { resource_id } => format!("[icon {resource_id}]"),
        EventBody::Seen { at } => format!("[seen at {at}]"),
    };
    format!("({state}) {body}")
}
