//! Attribution of mirrored writes and the do-not-sync marker.
//!
//! A wiki edit mirrored into git keeps the human author (via the mapping's
//! usermap) and the edit summary as the commit message. A git commit
//! mirrored onto the wiki gets an edit summary naming the committer, the
//! commit id, and the first line of the commit message.

use std::sync::OnceLock;

use regex::Regex;

use wikibridge_core::types::RevisionId;

/// Placeholder used when the origin side supplied no summary at all.
pub const EMPTY_SUMMARY: &str = "(no edit summary)";

/// Longest summary fragment carried over before truncation.
const SUMMARY_LIMIT: usize = 400;

/// Origin metadata carried on an apply decision: who made the change and
/// what they said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub author: String,
    pub summary: Option<String>,
}

impl Attribution {
    /// Attribution for changes whose origin event was not observed (e.g.
    /// a drift caught by a current-state read). The writer still needs a
    /// summary; the author falls through the usermap untouched.
    pub fn unattributed() -> Self {
        Self {
            author: "wikibridge".to_string(),
            summary: None,
        }
    }
}

/// Commits and edits carrying this marker are never mirrored.
pub fn is_do_not_sync(summary: &str) -> bool {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| {
        Regex::new(r"(?i)\bDO\s+NOT\s+(MERGE|SYNC)\b").expect("marker regex is valid")
    });
    marker.is_match(summary)
}

/// Commit message for a wiki edit mirrored into git: the edit summary,
/// newline-flattened and truncated, or the empty-summary placeholder.
pub fn commit_message(summary: Option<&str>) -> String {
    match summary {
        Some(s) if !s.trim().is_empty() => flatten_and_truncate(s),
        _ => EMPTY_SUMMARY.to_string(),
    }
}

/// Wiki edit summary for a git commit mirrored onto the wiki:
/// `<committer> | <commit id> | <message subject>`.
pub fn edit_summary(author: &str, commit: &RevisionId, message: Option<&str>) -> String {
    let subject = match message {
        Some(m) if !m.trim().is_empty() => flatten_and_truncate(m),
        _ => EMPTY_SUMMARY.to_string(),
    };
    format!("{author} | {commit} | {subject}")
}

fn flatten_and_truncate(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= SUMMARY_LIMIT {
        return flat.to_string();
    }
    let truncated: String = flat.chars().take(SUMMARY_LIMIT).collect();
    format!("{truncated}..")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
