//! Per-session cache of the account's recent posts

use tracing::debug;

use crate::error::Result;
use crate::timeline::RemoteTimeline;
use crate::types::{HistoricalPost, MediaDescriptor};

/// Caches one fetch of recent posts for a single account
///
/// The first [`recent_posts`](Self::recent_posts) call hits the network; later
/// calls return the stored sequence until [`invalidate`](Self::invalidate).
/// A failed fetch is not cached, so the next call retries.
#[derive(Debug)]
pub struct HistoryCache {
    account_id: String,
    posts: Vec<HistoricalPost>,
    populated: bool,
}

impl HistoryCache {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            posts: Vec::new(),
            populated: false,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Recent posts as returned by the remote side, newest first
    pub async fn recent_posts(&mut self, timeline: &dyn RemoteTimeline) -> Result<&[HistoricalPost]> {
        if !self.populated {
            debug!(account_id = %self.account_id, "Fetching recent posts");
            self.posts = timeline.fetch_recent_posts(&self.account_id).await?;
            self.populated = true;
        }
        Ok(&self.posts)
    }

    /// Drop the cached posts so the next call fetches again
    pub fn invalidate(&mut self) {
        self.posts.clear();
        self.populated = false;
    }
}

/// Every media attachment used by the given posts, in post order
///
/// Media uploaded but never attached to a post is invisible here.
pub fn media_inventory(posts: &[HistoricalPost]) -> Vec<&MediaDescriptor> {
    posts.iter().flat_map(|post| post.media.iter()).collect()
}
