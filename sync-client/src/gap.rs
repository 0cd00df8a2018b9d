//! Parallel fetching of missing account versions.

use futures_util::future::join_all;
use std::sync::Arc;

use chatsync_core::{assemble, plan_pages, VersionRange};
use chatsync_types::Event;

use crate::error::{EngineError, Result};
use crate::remote::RemoteLog;

/// Fetches a missing version range from the remote log.
///
/// The range is split into pages that are requested concurrently. The result
/// is only returned if it covers every version of the range; a partial result
/// is never handed back.
pub struct GapFiller {
    remote: Arc<dyn RemoteLog>,
    page_size: u32,
}

impl GapFiller {
    /// Create a filler requesting `page_size` versions per call.
    pub fn new(remote: Arc<dyn RemoteLog>, page_size: u32) -> Self {
        Self {
            remote,
            page_size: page_size.max(1),
        }
    }

    /// Fetch every event in `range`, ascending by version.
    ///
    /// A failed page surfaces as [`EngineError::Remote`]; a short result as
    /// [`EngineError::Consistency`].
    pub async fn fetch(&self, range: VersionRange) -> Result<Vec<Event>> {
        let pages = plan_pages(range, self.page_size);
        tracing::debug!(
            from = %range.start,
            to = %range.end,
            pages = pages.len(),
            "fetching gap"
        );

        let results = join_all(
            pages
                .iter()
                .map(|page| self.remote.list_account_events(page.after, page.limit)),
        )
        .await;

        let mut fetched = Vec::new();
        for result in results {
            fetched.extend(result?);
        }

        assemble(range, fetched).map_err(|e| {
            tracing::warn!("gap fill rejected: {}", e);
            EngineError::Consistency {
                from: range.start.prev(),
                to: range.end,
            }
        })
    }
}
