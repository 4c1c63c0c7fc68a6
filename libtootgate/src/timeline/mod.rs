//! Remote timeline abstraction
//!
//! The posting core never talks to a social network directly. Everything it
//! needs from the remote side goes through [`RemoteTimeline`]: verifying the
//! credential, reading the account's recent posts, uploading a media file and
//! creating a status.
//!
//! # Examples
//!
//! ```no_run
//! use libtootgate::timeline::{RemoteTimeline, mastodon::MastodonTimeline};
//! use libtootgate::Config;
//!
//! # async fn example() -> libtootgate::error::Result<()> {
//! let config = Config::load()?;
//! let mut timeline = MastodonTimeline::from_config(&config)?;
//!
//! let account = timeline.authenticate().await?;
//! let recent = timeline.fetch_recent_posts(&account.id).await?;
//! println!("{} has {} recent posts", account, recent.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, HistoricalPost, MediaHandle, PostReceipt, StatusRequest};

pub mod mastodon;

// Available outside of cfg(test) so integration tests can script the remote side
pub mod mock;

/// Capability interface to the remote social network
///
/// Every call is awaited to completion before the next one is issued. No
/// timeout is applied beyond the one the transport provides.
#[async_trait]
pub trait RemoteTimeline: Send + Sync {
    /// Verify the credential and return the account it belongs to
    ///
    /// # Errors
    ///
    /// Returns `TimelineError::Authentication` for an invalid credential.
    async fn authenticate(&mut self) -> Result<Account>;

    /// Fetch the account's recent posts, newest first
    ///
    /// # Errors
    ///
    /// Returns `TimelineError::Transport` on network or API failure.
    async fn fetch_recent_posts(&self, account_id: &str) -> Result<Vec<HistoricalPost>>;

    /// Upload a media file with its alt text
    ///
    /// The caller checks that `file_path` exists before calling.
    ///
    /// # Errors
    ///
    /// Returns `TimelineError::Upload` if the server rejects the file.
    async fn upload_media(&self, file_path: &Path, alt_text: &str) -> Result<MediaHandle>;

    /// Publish a status
    ///
    /// # Errors
    ///
    /// Returns `TimelineError::Publish` if the status is not created.
    async fn create_status(&self, request: &StatusRequest) -> Result<PostReceipt>;

    /// Lowercase identifier of the backend, e.g. `"mastodon"`
    fn name(&self) -> &str;

    /// Where this timeline lives, for operator-facing summaries
    fn location(&self) -> &str;
}
