//! Human-readable summary of a comment list.

use std::collections::BTreeMap;

use crate::record::{ReviewComment, Severity};

/// Render the summary comment posted alongside the review: counts by
/// severity and category, or an all-clear message when there is nothing to
/// say.
pub fn render_summary(comments: &[ReviewComment]) -> String {
    if comments.is_empty() {
        return "🤖 **Automated code review**\n\n✅ No issues found. Looks good!".to_string();
    }

    let errors = comments.iter().filter(|c| c.severity == Severity::Error).count();
    let warnings = comments.iter().filter(|c| c.severity == Severity::Warning).count();
    let suggestions = comments
        .iter()
        .filter(|c| c.severity == Severity::Suggestion)
        .count();

    // BTreeMap for stable category ordering in the rendered text.
    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for comment in comments {
        *by_category.entry(comment.category.as_str()).or_insert(0) += 1;
    }

    let categories = by_category
        .iter()
        .map(|(category, count)| format!("{} ({})", category, count))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "🤖 **Automated code review**\n\nFound {} {}: {} error(s), {} warning(s), \
         {} suggestion(s).\n\nBy category: {}.",
        comments.len(),
        if comments.len() == 1 { "issue" } else { "issues" },
        errors,
        warnings,
        suggestions,
        categories
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(severity: Severity, category: &str) -> ReviewComment {
        ReviewComment {
            path: "src/lib.rs".to_string(),
            line: 1,
            severity,
            category: category.to_string(),
            comment: "something".to_string(),
            suggestion: None,
        }
    }

    #[test]
    fn test_empty_comments_render_all_clear() {
        let summary = render_summary(&[]);
        assert!(summary.contains("No issues found"));
    }

    #[test]
    fn test_counts_by_severity_and_category() {
        let comments = vec![
            comment(Severity::Error, "logic"),
            comment(Severity::Warning, "logic"),
            comment(Severity::Suggestion, "style"),
        ];
        let summary = render_summary(&comments);
        assert!(summary.contains("Found 3 issues"));
        assert!(summary.contains("1 error(s)"));
        assert!(summary.contains("1 warning(s)"));
        assert!(summary.contains("1 suggestion(s)"));
        assert!(summary.contains("logic (2)"));
        assert!(summary.contains("style (1)"));
    }

    #[test]
    fn test_singular_issue() {
        let summary = render_summary(&[comment(Severity::Error, "logic")]);
        assert!(summary.contains("Found 1 issue:"));
    }
}
