//! Core types for Tootgate

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TootgateError};

// ============================================================================
// Candidate post
// ============================================================================

/// Ceilings checked when a candidate is composed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateLimits {
    pub max_text_length: usize,
    pub max_alt_text_length: usize,
}

impl Default for CandidateLimits {
    fn default() -> Self {
        Self {
            max_text_length: 500,
            max_alt_text_length: 1500,
        }
    }
}

/// Raw candidate as read from a post file, before composition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateDraft {
    pub month: u32,
    pub day: u32,
    /// Image path as written in the post file; resolved by the caller
    pub image: Option<String>,
    pub image_alt_text: String,
    /// Free-form tag list, e.g. `"OTD, Toronto #BWPhotography"`
    pub tags: String,
    pub post_text: String,
    pub spoiler_text: Option<String>,
    pub sensitive: bool,
    pub url: Option<String>,
}

impl CandidateDraft {
    /// Parse and check a post file's contents
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let draft: CandidateDraft = toml::from_str(content)
            .map_err(|e| TootgateError::InvalidInput(format!("Invalid post file: {}", e)))?;
        draft.validate()?;
        Ok(draft)
    }

    /// Read a post file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TootgateError::InvalidInput(format!("Failed to read post file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.post_text.trim().is_empty() {
            return Err(TootgateError::InvalidInput("post_text cannot be empty".to_string()));
        }
        if !(1..=12).contains(&self.month) || !(1..=31).contains(&self.day) {
            return Err(TootgateError::InvalidInput(format!(
                "month/day out of range: {}/{}",
                self.month, self.day
            )));
        }
        Ok(())
    }
}

/// Non-fatal problems found while composing a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateWarning {
    TextTooLong { length: usize, limit: usize },
    AltTextTooLong { length: usize, limit: usize },
}

impl fmt::Display for CandidateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateWarning::TextTooLong { length, limit } => write!(
                f,
                "full post text with tags and URL is {} characters, over the {} limit",
                length, limit
            ),
            CandidateWarning::AltTextTooLong { length, limit } => write!(
                f,
                "image alt text is {} characters, over the {} limit",
                length, limit
            ),
        }
    }
}

/// A post ready to be vetted and published. Read-only once composed.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub month: u32,
    pub day: u32,
    pub image_path: Option<PathBuf>,
    pub image_alt_text: String,
    pub tags: Vec<String>,
    pub post_text: String,
    pub spoiler_text: Option<String>,
    pub sensitive: bool,
    pub url: Option<String>,
    composed_text: String,
    warnings: Vec<CandidateWarning>,
}

impl Candidate {
    /// Compose a candidate from its parts
    ///
    /// Lengths are measured in bytes, which never undercounts the characters
    /// the server will see. Exceeding a ceiling records a warning; construction
    /// itself never fails.
    pub fn compose(draft: CandidateDraft, image_path: Option<PathBuf>, limits: CandidateLimits) -> Self {
        let tags = normalize_tags(&draft.tags);
        let url = draft.url.filter(|u| !u.trim().is_empty());
        let spoiler_text = draft.spoiler_text.filter(|s| !s.trim().is_empty());

        let joined_tags = tags.join(" ");
        let composed_text = [draft.post_text.trim(), joined_tags.as_str(), url.as_deref().unwrap_or("")]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        let mut warnings = Vec::new();
        if composed_text.len() > limits.max_text_length {
            warnings.push(CandidateWarning::TextTooLong {
                length: composed_text.len(),
                limit: limits.max_text_length,
            });
        }
        if draft.image_alt_text.len() > limits.max_alt_text_length {
            warnings.push(CandidateWarning::AltTextTooLong {
                length: draft.image_alt_text.len(),
                limit: limits.max_alt_text_length,
            });
        }

        Self {
            month: draft.month,
            day: draft.day,
            image_path,
            image_alt_text: draft.image_alt_text,
            tags,
            post_text: draft.post_text,
            spoiler_text,
            sensitive: draft.sensitive,
            url,
            composed_text,
            warnings,
        }
    }

    /// Post text, tags and URL as they will be published
    pub fn composed_text(&self) -> &str {
        &self.composed_text
    }

    pub fn warnings(&self) -> &[CandidateWarning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// File name of the attached image, if any
    pub fn image_name(&self) -> Option<String> {
        self.image_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Normalize a free-form tag list into `#`-prefixed tags
///
/// Commas are dropped, tokens are split on whitespace and a `#` is added to
/// any token that lacks one. Already-prefixed tags are left untouched.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    raw.replace(',', " ")
        .split_whitespace()
        .map(|tag| {
            if tag.starts_with('#') {
                tag.to_string()
            } else {
                format!("#{}", tag)
            }
        })
        .collect()
}

// ============================================================================
// Remote timeline records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Unlisted => write!(f, "unlisted"),
            Visibility::Private => write!(f, "private"),
            Visibility::Direct => write!(f, "direct"),
        }
    }
}

/// A media attachment already used by a published post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub id: String,
    pub kind: String,
    pub url: String,
    pub description: Option<String>,
}

/// One post from the account's recent history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPost {
    pub id: String,
    pub raw_html_body: String,
    pub created_at: DateTime<Utc>,
    pub is_reblog: bool,
    pub visibility: Visibility,
    pub media: Vec<MediaDescriptor>,
    pub url: Option<String>,
    pub tags: Vec<String>,
}

impl HistoricalPost {
    /// A plain public original post, mostly useful for tests and fixtures
    pub fn new(id: impl Into<String>, raw_html_body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            raw_html_body: raw_html_body.into(),
            created_at,
            is_reblog: false,
            visibility: Visibility::Public,
            media: Vec::new(),
            url: None,
            tags: Vec::new(),
        }
    }
}

/// The account a credential belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub handle: String,
    pub display_name: String,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'@{}' - {}", self.handle, self.display_name)
    }
}

/// Server-side reference to an uploaded media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle(pub String);

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments of a status-create call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRequest {
    pub text: String,
    pub spoiler_text: Option<String>,
    pub sensitive: bool,
    pub media: Option<MediaHandle>,
}

/// What the server returned for a published status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReceipt {
    pub id: String,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
