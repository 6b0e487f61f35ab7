//! Defensive parsing of the AI response into validated review comments.
//!
//! The model is asked for a JSON array of comment entries, but the response
//! is never trusted: primary parsing is followed by a best-effort extraction
//! of the outermost array, and total failure degrades to
//! [`ParsedResponse::Degraded`] (an empty comment list downstream) instead
//! of failing the run.

use serde::Deserialize;
use tracing::warn;

use crate::record::{ReviewComment, Severity};

/// Tagged result of parsing the raw AI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    /// Validated, severity-normalized comment entries (possibly empty).
    Comments(Vec<ReviewComment>),
    /// The response held no parseable comment list. Treated as "no comments
    /// found", never as a run failure.
    Degraded,
}

impl ParsedResponse {
    pub fn into_comments(self) -> Vec<ReviewComment> {
        match self {
            Self::Comments(comments) => comments,
            Self::Degraded => Vec::new(),
        }
    }
}

/// Raw comment entry as the model produced it, before validation.
#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(alias = "file")]
    path: Option<String>,
    #[serde(alias = "lineNumber")]
    line: Option<u64>,
    severity: Option<String>,
    category: Option<String>,
    #[serde(alias = "body")]
    comment: Option<String>,
    suggestion: Option<String>,
}

/// Parse the raw response text into review comments.
pub fn parse_review_comments(raw: &str) -> ParsedResponse {
    // Primary: the response is exactly the requested array.
    if let Ok(entries) = serde_json::from_str::<Vec<RawComment>>(raw) {
        return ParsedResponse::Comments(validate(entries));
    }

    // The model sometimes wraps the array in an object.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(comments) = value.get("comments") {
            if let Ok(entries) = serde_json::from_value::<Vec<RawComment>>(comments.clone()) {
                return ParsedResponse::Comments(validate(entries));
            }
        }
    }

    // Secondary: locate the outermost array delimiters and parse that
    // substring (handles prose or code fences around the JSON).
    if let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) {
        if start < end {
            if let Ok(entries) = serde_json::from_str::<Vec<RawComment>>(&raw[start..=end]) {
                return ParsedResponse::Comments(validate(entries));
            }
        }
    }

    warn!("AI response contained no parseable comment list, degrading to empty");
    ParsedResponse::Degraded
}

/// Drop entries missing required fields and normalize the rest.
fn validate(entries: Vec<RawComment>) -> Vec<ReviewComment> {
    entries.into_iter().filter_map(normalize).collect()
}

fn normalize(raw: RawComment) -> Option<ReviewComment> {
    let path = raw.path.filter(|p| !p.trim().is_empty())?;
    let comment = raw.comment.filter(|c| !c.trim().is_empty())?;
    let line = raw.line?;

    Some(ReviewComment {
        path,
        line,
        severity: normalize_severity(raw.severity.as_deref()),
        category: raw
            .category
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "general".to_string()),
        comment,
        suggestion: raw.suggestion.filter(|s| !s.trim().is_empty()),
    })
}

/// Normalize a free-form severity into the closed set. Unknown or missing
/// severities fall back to `Suggestion`: the bot does not invent errors the
/// model never claimed.
fn normalize_severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("error") => Severity::Error,
        Some("warning") | Some("warn") => Severity::Warning,
        Some("suggestion") | Some("info") | Some("nit") => Severity::Suggestion,
        _ => Severity::Suggestion,
    }
}
