//! The durable review record and its status transitions.
//!
//! One record exists per (owner, repo, pull-request number). The status
//! graph is `pending → in_progress → {completed | failed}`; a retry request
//! or a synchronize refresh moves a record back to `pending`, and `skipped`
//! is only ever produced by the trigger gate, never by the orchestrator.
//! Every transition helper validates the edge it is asked to take, so a
//! record can never reach a terminal state without passing through
//! `in_progress` first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clients::ChangedFile;
use crate::error::ReviewError;

/// Newtype for a record store identifier.
///
/// Assigned by the record store on creation; `RecordId(0)` means the record
/// has not been persisted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a pull request across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
}

impl RecordKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, pr_number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            pr_number,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.pr_number)
    }
}

/// Review lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns true if no further automatic transition will occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a single review comment.
///
/// Severities coming back from the model are normalized into this closed set
/// at the parse boundary; nothing downstream sees a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Suggestion,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single review comment attached to a file and line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: u64,
    pub severity: Severity,
    pub category: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A file that survived filtering and was included in the review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewedFile {
    pub path: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
}

impl From<&ChangedFile> for ReviewedFile {
    fn from(file: &ChangedFile) -> Self {
        Self {
            path: file.path.clone(),
            status: file.status.clone(),
            additions: file.additions,
            deletions: file.deletions,
            changes: file.changes,
        }
    }
}

/// Snapshot of the pull request a review was computed against.
///
/// `head_sha` always reflects the commit the current comments and summary
/// were generated for; a synchronize refresh overwrites the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSnapshot {
    pub repo_full_name: String,
    pub title: String,
    pub body: Option<String>,
    pub author: String,
    pub base_branch: String,
    pub head_branch: String,
    pub head_sha: String,
}

/// Durable state for one pull request's review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: RecordId,
    pub key: RecordKey,
    pub snapshot: PrSnapshot,
    pub status: ReviewStatus,
    pub comments: Vec<ReviewComment>,
    pub summary_comment: Option<String>,
    pub files_reviewed: Vec<ReviewedFile>,
    pub external_review_id: Option<u64>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub review_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl ReviewRecord {
    /// Create a fresh pending record. The id is assigned by the store.
    pub fn new(key: RecordKey, snapshot: PrSnapshot) -> Self {
        Self {
            id: RecordId(0),
            key,
            snapshot,
            status: ReviewStatus::Pending,
            comments: Vec::new(),
            summary_comment: None,
            files_reviewed: Vec::new(),
            external_review_id: None,
            review_started_at: None,
            review_completed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }

    /// pending → in_progress. Sets `review_started_at`.
    pub fn mark_in_progress(&mut self) -> Result<(), ReviewError> {
        if self.status != ReviewStatus::Pending {
            return Err(ReviewError::InvalidState {
                operation: "mark_in_progress",
                status: self.status,
            });
        }
        self.status = ReviewStatus::InProgress;
        self.review_started_at = Some(Utc::now());
        Ok(())
    }

    /// in_progress → completed. The external review id may be absent when no
    /// review was posted (already reviewed, or nothing to review).
    pub fn mark_completed(&mut self, external_review_id: Option<u64>) -> Result<(), ReviewError> {
        if self.status != ReviewStatus::InProgress {
            return Err(ReviewError::InvalidState {
                operation: "mark_completed",
                status: self.status,
            });
        }
        self.status = ReviewStatus::Completed;
        self.review_completed_at = Some(Utc::now());
        if external_review_id.is_some() {
            self.external_review_id = external_review_id;
        }
        Ok(())
    }

    /// in_progress → failed. Records the failure message.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), ReviewError> {
        if self.status != ReviewStatus::InProgress {
            return Err(ReviewError::InvalidState {
                operation: "mark_failed",
                status: self.status,
            });
        }
        self.status = ReviewStatus::Failed;
        self.review_completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
        Ok(())
    }

    /// (failed | pending) → pending. Increments the retry counter and clears
    /// the previous failure. Rejected while completed or in_progress, so a
    /// retry can never stomp on a run that is still working.
    pub fn increment_retry(&mut self) -> Result<(), ReviewError> {
        match self.status {
            ReviewStatus::Failed | ReviewStatus::Pending => {
                self.status = ReviewStatus::Pending;
                self.retry_count += 1;
                self.error_message = None;
                Ok(())
            }
            status => Err(ReviewError::InvalidState {
                operation: "increment_retry",
                status,
            }),
        }
    }

    /// Reset the record for a fresh run against a new snapshot.
    ///
    /// Used by the trigger gate on synchronize (new push) and on re-opened
    /// PRs without a completed review: the old comments and summary are
    /// dropped because they no longer describe the current head commit, and
    /// the retry counter starts over for the new commit.
    pub fn refresh_for_new_run(&mut self, snapshot: PrSnapshot) {
        self.snapshot = snapshot;
        self.status = ReviewStatus::Pending;
        self.comments.clear();
        self.summary_comment = None;
        self.files_reviewed.clear();
        self.external_review_id = None;
        self.review_started_at = None;
        self.review_completed_at = None;
        self.error_message = None;
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> PrSnapshot {
        PrSnapshot {
            repo_full_name: "octo/widgets".to_string(),
            title: "Add widget".to_string(),
            body: Some("Adds a widget".to_string()),
            author: "octocat".to_string(),
            base_branch: "main".to_string(),
            head_branch: "feature/widget".to_string(),
            head_sha: "abc123".to_string(),
        }
    }

    fn record() -> ReviewRecord {
        ReviewRecord::new(RecordKey::new("octo", "widgets", 7), snapshot())
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::InProgress,
            ReviewStatus::Completed,
            ReviewStatus::Failed,
            ReviewStatus::Skipped,
        ] {
            assert_eq!(ReviewStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReviewStatus::parse("bogus"), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = record();
        record.mark_in_progress().expect("pending -> in_progress");
        assert_eq!(record.status, ReviewStatus::InProgress);
        assert!(record.review_started_at.is_some());

        record.mark_completed(Some(42)).expect("-> completed");
        assert_eq!(record.status, ReviewStatus::Completed);
        assert_eq!(record.external_review_id, Some(42));

        let started = record.review_started_at.expect("started_at set");
        let completed = record.review_completed_at.expect("completed_at set");
        assert!(started <= completed);
    }

    #[test]
    fn test_cannot_complete_without_in_progress() {
        let mut record = record();
        let err = record.mark_completed(None).unwrap_err();
        assert!(matches!(
            err,
            ReviewError::InvalidState {
                operation: "mark_completed",
                status: ReviewStatus::Pending,
            }
        ));
    }

    #[test]
    fn test_cannot_fail_without_in_progress() {
        let mut record = record();
        assert!(record.mark_failed("boom").is_err());
        record.mark_in_progress().unwrap();
        record.mark_failed("boom").unwrap();
        assert_eq!(record.status, ReviewStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
        assert!(record.review_completed_at.is_some());
    }

    #[test]
    fn test_mark_in_progress_rejects_in_progress() {
        // A concurrent run that already claimed the record must not be
        // claimed again.
        let mut record = record();
        record.mark_in_progress().unwrap();
        assert!(record.mark_in_progress().is_err());
    }

    #[test]
    fn test_increment_retry_from_failed() {
        let mut record = record();
        record.mark_in_progress().unwrap();
        record.mark_failed("AI exploded").unwrap();

        record.increment_retry().expect("failed -> pending");
        assert_eq!(record.status, ReviewStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.error_message, None);

        record.increment_retry().expect("pending -> pending");
        assert_eq!(record.retry_count, 2);
    }

    #[test]
    fn test_increment_retry_rejects_completed_and_in_progress() {
        let mut record = record();
        record.mark_in_progress().unwrap();
        assert!(record.increment_retry().is_err());

        record.mark_completed(None).unwrap();
        assert!(record.increment_retry().is_err());
    }

    #[test]
    fn test_refresh_for_new_run_resets_everything() {
        let mut record = record();
        record.mark_in_progress().unwrap();
        record.comments.push(ReviewComment {
            path: "src/lib.rs".to_string(),
            line: 10,
            severity: Severity::Warning,
            category: "logic".to_string(),
            comment: "off by one".to_string(),
            suggestion: None,
        });
        record.summary_comment = Some("summary".to_string());
        record.mark_failed("boom").unwrap();
        record.increment_retry().unwrap();
        assert_eq!(record.retry_count, 1);

        let mut new_snapshot = snapshot();
        new_snapshot.head_sha = "def456".to_string();
        record.refresh_for_new_run(new_snapshot);

        assert_eq!(record.status, ReviewStatus::Pending);
        assert_eq!(record.snapshot.head_sha, "def456");
        assert!(record.comments.is_empty());
        assert_eq!(record.summary_comment, None);
        assert_eq!(record.error_message, None);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.review_started_at, None);
        assert_eq!(record.review_completed_at, None);
    }
}
