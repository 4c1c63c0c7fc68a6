//! Duplicate detection against the account's recent posts
//!
//! Server-side post bodies are HTML. A body is reduced to plain text by
//! removing every `<...>` tag and decoding `&#39;` and `&amp;`, then compared
//! byte for byte with the candidate's composed text. Other entities and
//! Unicode normalization differences are not handled and will read as "new".

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::audit::AuditLog;
use crate::types::{Candidate, HistoricalPost};

/// Audit task recorded when the candidate was already posted
pub const TASK_DUPLICATE: &str = "no_new_post";
/// Audit task recorded when no earlier post matches
pub const TASK_NEW_POST: &str = "new_post";

/// The earlier post a candidate duplicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateMatch {
    pub post_id: String,
    pub created_at: DateTime<Utc>,
}

fn markup_pattern() -> &'static Regex {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    MARKUP.get_or_init(|| Regex::new(r"<[^>]*>").expect("markup pattern is valid"))
}

/// Remove every `<...>` tag
///
/// Idempotent: a `<` left behind has no `>` after it.
pub fn strip_markup(html: &str) -> String {
    markup_pattern().replace_all(html, "").into_owned()
}

/// Decode the two entities the server emits for plain posts
pub fn decode_entities(text: &str) -> String {
    text.replace("&#39;", "'").replace("&amp;", "&")
}

/// Plain-text form of a server-side post body
pub fn plain_text(html: &str) -> String {
    decode_entities(&strip_markup(html))
}

/// First post in `history` whose plain text equals the candidate's composed text
pub fn find_duplicate(candidate: &Candidate, history: &[HistoricalPost]) -> Option<DuplicateMatch> {
    history
        .iter()
        .find(|post| plain_text(&post.raw_html_body) == candidate.composed_text())
        .map(|post| DuplicateMatch {
            post_id: post.id.clone(),
            created_at: post.created_at,
        })
}

/// Scan `history` for the candidate and record the verdict in the audit log
pub fn check(candidate: &Candidate, history: &[HistoricalPost], audit: &mut AuditLog) -> Option<DuplicateMatch> {
    let found = find_duplicate(candidate, history);
    match &found {
        Some(m) => {
            audit.append(
                TASK_DUPLICATE,
                format!(
                    "Already posted as {} at {}: {}",
                    m.post_id,
                    m.created_at.to_rfc3339(),
                    candidate.composed_text()
                ),
            );
        }
        None => {
            audit.append(
                TASK_NEW_POST,
                format!("No match among {} recent posts", history.len()),
            );
        }
    }
    found
}

/// `true` if the candidate was already posted; records the verdict
pub fn is_duplicate(candidate: &Candidate, history: &[HistoricalPost], audit: &mut AuditLog) -> bool {
    check(candidate, history, audit).is_some()
}
