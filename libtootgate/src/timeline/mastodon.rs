//! Mastodon timeline implementation
//!
//! Talks to Mastodon and other Fediverse servers that implement the Mastodon
//! API through the megalodon library.

use std::path::Path;

use async_trait::async_trait;
use megalodon::megalodon::{PostStatusInputOptions, PostStatusOutput, UploadMediaInputOptions};
use megalodon::{Megalodon, SNS};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, TimelineError};
use crate::timeline::RemoteTimeline;
use crate::types::{
    Account, HistoricalPost, MediaDescriptor, MediaHandle, PostReceipt, StatusRequest, Visibility,
};

/// Which remote operation failed, used to pick the error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Authenticate,
    FetchStatuses,
    UploadMedia,
    PostStatus,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Authenticate => "authenticate",
            Operation::FetchStatuses => "fetch recent statuses",
            Operation::UploadMedia => "upload media",
            Operation::PostStatus => "post status",
        }
    }
}

/// Mastodon timeline client
pub struct MastodonTimeline {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
}

impl MastodonTimeline {
    /// Create a client for `instance_url` using an OAuth access token
    pub fn new(instance_url: String, access_token: &SecretString) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token.expose_secret().to_string()),
            None,
        )
        .map_err(|e| {
            TimelineError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
        })
    }

    /// Create a client from configuration, reading the token file
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.read_access_token()?;
        Self::new(config.instance_url(), &token)
    }
}

#[async_trait]
impl RemoteTimeline for MastodonTimeline {
    async fn authenticate(&mut self) -> Result<Account> {
        let response = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, Operation::Authenticate))?;

        let account = response.json;
        Ok(Account {
            id: account.id,
            handle: account.username,
            display_name: account.display_name,
        })
    }

    async fn fetch_recent_posts(&self, account_id: &str) -> Result<Vec<HistoricalPost>> {
        let response = self
            .client
            .get_account_statuses(account_id.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, Operation::FetchStatuses))?;

        let posts: Vec<HistoricalPost> = response.json.into_iter().map(to_historical).collect();
        debug!(count = posts.len(), "Fetched recent statuses");
        Ok(posts)
    }

    async fn upload_media(&self, file_path: &Path, alt_text: &str) -> Result<MediaHandle> {
        let options = UploadMediaInputOptions {
            description: Some(alt_text.to_string()),
            focus: None,
        };

        let response = self
            .client
            .upload_media(file_path.to_string_lossy().into_owned(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, Operation::UploadMedia))?;

        let id = match response.json {
            megalodon::entities::UploadMedia::Attachment(attachment) => attachment.id,
            megalodon::entities::UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };

        Ok(MediaHandle(id))
    }

    async fn create_status(&self, request: &StatusRequest) -> Result<PostReceipt> {
        let options = PostStatusInputOptions {
            media_ids: request.media.as_ref().map(|m| vec![m.0.clone()]),
            sensitive: Some(request.sensitive),
            spoiler_text: request.spoiler_text.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(request.text.clone(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, Operation::PostStatus))?;

        let receipt = match response.json {
            PostStatusOutput::Status(status) => PostReceipt {
                id: status.id,
                url: status.url,
                created_at: Some(status.created_at),
            },
            PostStatusOutput::ScheduledStatus(scheduled) => PostReceipt {
                id: scheduled.id,
                url: None,
                created_at: None,
            },
        };

        Ok(receipt)
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn location(&self) -> &str {
        &self.instance_url
    }
}

fn to_historical(status: megalodon::entities::Status) -> HistoricalPost {
    let media = status
        .media_attachments
        .into_iter()
        .map(|attachment| MediaDescriptor {
            id: attachment.id,
            kind: format!("{:?}", attachment.r#type).to_lowercase(),
            url: attachment.url,
            description: attachment.description,
        })
        .collect();

    HistoricalPost {
        id: status.id,
        raw_html_body: status.content,
        created_at: status.created_at,
        is_reblog: status.reblog.is_some(),
        visibility: parse_visibility(&status.visibility.to_string()),
        media,
        url: status.url,
        tags: status.tags.into_iter().map(|tag| tag.name).collect(),
    }
}

/// Map the server's visibility name; instance-local posts count as unlisted
fn parse_visibility(raw: &str) -> Visibility {
    match raw.to_lowercase().as_str() {
        "public" => Visibility::Public,
        "private" => Visibility::Private,
        "direct" => Visibility::Direct,
        _ => Visibility::Unlisted,
    }
}

/// Map megalodon errors to TimelineError
///
/// - HTTP 401/403 → `Authentication`
/// - HTTP 429 → `RateLimit`
/// - anything else → the variant owned by the failed operation
///   (`Authentication`, `Transport`, `Upload` or `Publish`)
fn map_megalodon_error(error: megalodon::error::Error, operation: Operation) -> TimelineError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();
    let context = operation.label();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => TimelineError::Authentication(format!(
            "Mastodon rejected the access token ({}): {}. \
                Suggestion: Verify your OAuth token is valid and has not expired.",
            context, error_str
        )),
        Some(429) => TimelineError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}. \
                Suggestion: Wait a few minutes before retrying.",
            context, error_str
        )),
        None if error_lower.contains("unauthorized") || error_lower.contains("forbidden") => {
            TimelineError::Authentication(format!(
                "Mastodon authentication failed ({}): {}",
                context, error_str
            ))
        }
        None if error_lower.contains("rate limit") || error_lower.contains("too many requests") => {
            TimelineError::RateLimit(format!(
                "Mastodon rate limit exceeded ({}): {}",
                context, error_str
            ))
        }
        _ => {
            let message = format!("Mastodon error ({}): {}", context, error_str);
            match operation {
                Operation::Authenticate => TimelineError::Authentication(message),
                Operation::FetchStatuses => TimelineError::Transport(message),
                Operation::UploadMedia => TimelineError::Upload(message),
                Operation::PostStatus => TimelineError::Publish(message),
            }
        }
    }
}

/// Extract HTTP status code from error message
///
/// Looks for patterns like "HTTP 401", "status 403", "code: 429" or a bare
/// three-digit code followed by ':' or a space.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let prefixes = ["HTTP ", "status ", "code: ", "status_code: "];

    for prefix in &prefixes {
        if let Some(pos) = error_str.find(prefix) {
            let after_prefix = &error_str[pos + prefix.len()..];
            if let Some(code) = after_prefix.get(0..3).and_then(|s| s.parse::<u16>().ok()) {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    let bytes = error_str.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        if window[0].is_ascii_digit()
            && window[1].is_ascii_digit()
            && window[2].is_ascii_digit()
            && (window[3] == b':' || window[3] == b' ')
            && (i == 0 || !bytes[i - 1].is_ascii_digit())
        {
            let code = std::str::from_utf8(&window[0..3])
                .ok()
                .and_then(|s| s.parse::<u16>().ok());
            if let Some(code) = code {
                if (100..=599).contains(&code) {
                    return Some(code);
                }
            }
        }
    }

    None
}
