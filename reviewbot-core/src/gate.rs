//! The trigger gate: decides whether an incoming event starts a run.
//!
//! Admission always persists the record (create or refresh) before handing
//! off to the orchestrator, so a second concurrent trigger for the same key
//! observes the updated status. This persist-then-admit pattern is not
//! atomic: a rapid double delivery can admit twice, and the orchestrator's
//! "already reviewed by bot" check is the backstop. Duplicate suppression is
//! best-effort, not exactly-once.

use tracing::info;

use crate::error::ReviewError;
use crate::record::{PrSnapshot, RecordKey, ReviewRecord, ReviewStatus};
use crate::store::RecordStore;

/// Pull request webhook action, reduced to what the gate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrAction {
    Opened,
    Synchronize,
    Reopened,
    Other(String),
}

impl PrAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "opened" => Self::Opened,
            "synchronize" => Self::Synchronize,
            "reopened" => Self::Reopened,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only opened, synchronize, and reopened can start a review.
    pub fn is_relevant(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// An inbound event that may start a review run.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub key: RecordKey,
    pub action: PrAction,
    pub draft: bool,
    pub snapshot: PrSnapshot,
}

/// Outcome of gating a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Start a run for this (already persisted) record.
    Admit(ReviewRecord),
    /// A completed review already exists and this is not a new push.
    SkipAlreadyReviewed,
    /// Draft PRs are not reviewed.
    SkipDraft,
    /// The action is not one that starts reviews.
    SkipIrrelevantAction,
}

impl Decision {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Admit(_) => "review admitted",
            Self::SkipAlreadyReviewed => "skipped: already reviewed",
            Self::SkipDraft => "skipped: draft pull request",
            Self::SkipIrrelevantAction => "skipped: irrelevant action",
        }
    }
}

/// Gate an incoming event. Rules, in order: irrelevant action, draft,
/// already-reviewed (completed record and not a synchronize), otherwise
/// admit with a create-or-refresh persist.
pub async fn admit_trigger(
    store: &dyn RecordStore,
    event: TriggerEvent,
) -> Result<Decision, ReviewError> {
    if !event.action.is_relevant() {
        return Ok(Decision::SkipIrrelevantAction);
    }

    if event.draft {
        info!("Skipping draft PR {}", event.key);
        return Ok(Decision::SkipDraft);
    }

    match store.find_by_key(&event.key).await? {
        Some(mut record) => {
            if record.status == ReviewStatus::Completed && event.action != PrAction::Synchronize {
                info!(
                    "PR {} already reviewed at {}, skipping",
                    event.key, record.snapshot.head_sha
                );
                return Ok(Decision::SkipAlreadyReviewed);
            }

            // New push or un-completed record: reset for a fresh run against
            // the event's head commit.
            record.refresh_for_new_run(event.snapshot);
            store.save(&record).await?;
            info!("Refreshed record for {} (action {:?})", event.key, event.action);
            Ok(Decision::Admit(record))
        }
        None => {
            let record = store
                .create(ReviewRecord::new(event.key.clone(), event.snapshot))
                .await?;
            info!("Created review record {} for {}", record.id, event.key);
            Ok(Decision::Admit(record))
        }
    }
}

/// Admit a manual retry request: only records that are neither completed nor
/// in_progress are eligible. Increments the retry counter, clears the last
/// failure, and persists before the caller re-runs the pipeline.
pub async fn request_retry(
    store: &dyn RecordStore,
    key: &RecordKey,
) -> Result<ReviewRecord, ReviewError> {
    let mut record = store
        .find_by_key(key)
        .await?
        .ok_or_else(|| ReviewError::not_found(format!("review record for {}", key)))?;

    record.increment_retry()?;
    store.save(&record).await?;
    info!(
        "Retry admitted for {} (retry #{})",
        key, record.retry_count
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;

    fn snapshot(sha: &str) -> PrSnapshot {
        PrSnapshot {
            repo_full_name: "octo/widgets".to_string(),
            title: "Add widget".to_string(),
            body: None,
            author: "octocat".to_string(),
            base_branch: "main".to_string(),
            head_branch: "feature".to_string(),
            head_sha: sha.to_string(),
        }
    }

    fn event(action: &str, draft: bool, sha: &str) -> TriggerEvent {
        TriggerEvent {
            key: RecordKey::new("octo", "widgets", 7),
            action: PrAction::parse(action),
            draft,
            snapshot: snapshot(sha),
        }
    }

    #[tokio::test]
    async fn test_irrelevant_action_is_skipped() {
        let store = InMemoryRecordStore::new();
        let decision = admit_trigger(&store, event("labeled", false, "abc"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::SkipIrrelevantAction);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_draft_is_skipped_without_record_creation() {
        let store = InMemoryRecordStore::new();
        let decision = admit_trigger(&store, event("opened", true, "abc"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::SkipDraft);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_opened_creates_pending_record() {
        let store = InMemoryRecordStore::new();
        let decision = admit_trigger(&store, event("opened", false, "abc"))
            .await
            .unwrap();
        match decision {
            Decision::Admit(record) => {
                assert_eq!(record.status, ReviewStatus::Pending);
                assert_eq!(record.snapshot.head_sha, "abc");
            }
            other => panic!("expected admit, got {:?}", other),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_opened_on_completed_record_is_skipped() {
        let store = InMemoryRecordStore::new();
        let mut record = store
            .create(ReviewRecord::new(
                RecordKey::new("octo", "widgets", 7),
                snapshot("abc"),
            ))
            .await
            .unwrap();
        record.mark_in_progress().unwrap();
        record.mark_completed(Some(9)).unwrap();
        store.save(&record).await.unwrap();

        let decision = admit_trigger(&store, event("opened", false, "abc"))
            .await
            .unwrap();
        assert_eq!(decision, Decision::SkipAlreadyReviewed);
    }

    #[tokio::test]
    async fn test_synchronize_refreshes_completed_record() {
        let store = InMemoryRecordStore::new();
        let mut record = store
            .create(ReviewRecord::new(
                RecordKey::new("octo", "widgets", 7),
                snapshot("commit-a"),
            ))
            .await
            .unwrap();
        record.mark_in_progress().unwrap();
        record.mark_completed(Some(9)).unwrap();
        store.save(&record).await.unwrap();

        let decision = admit_trigger(&store, event("synchronize", false, "commit-b"))
            .await
            .unwrap();
        match decision {
            Decision::Admit(refreshed) => {
                assert_eq!(refreshed.id, record.id);
                assert_eq!(refreshed.status, ReviewStatus::Pending);
                assert_eq!(refreshed.snapshot.head_sha, "commit-b");
                assert_eq!(refreshed.external_review_id, None);
                assert_eq!(refreshed.error_message, None);
            }
            other => panic!("expected admit, got {:?}", other),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_triggers_keep_one_record() {
        let store = InMemoryRecordStore::new();
        for action in ["opened", "synchronize", "reopened", "synchronize"] {
            let _ = admit_trigger(&store, event(action, false, "abc")).await.unwrap();
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_retry_on_failed_record() {
        let store = InMemoryRecordStore::new();
        let key = RecordKey::new("octo", "widgets", 7);
        let mut record = store
            .create(ReviewRecord::new(key.clone(), snapshot("abc")))
            .await
            .unwrap();
        record.mark_in_progress().unwrap();
        record.mark_failed("AI unavailable").unwrap();
        store.save(&record).await.unwrap();

        let retried = request_retry(&store, &key).await.unwrap();
        assert_eq!(retried.status, ReviewStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.error_message, None);
    }

    #[tokio::test]
    async fn test_retry_rejected_while_completed_or_in_progress() {
        let store = InMemoryRecordStore::new();
        let key = RecordKey::new("octo", "widgets", 7);
        let mut record = store
            .create(ReviewRecord::new(key.clone(), snapshot("abc")))
            .await
            .unwrap();
        record.mark_in_progress().unwrap();
        store.save(&record).await.unwrap();

        let err = request_retry(&store, &key).await.unwrap_err();
        assert!(matches!(err, ReviewError::InvalidState { .. }));

        record.mark_completed(None).unwrap();
        store.save(&record).await.unwrap();
        let err = request_retry(&store, &key).await.unwrap_err();
        assert!(matches!(err, ReviewError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_retry_on_missing_record_is_not_found() {
        let store = InMemoryRecordStore::new();
        let err = request_retry(&store, &RecordKey::new("octo", "widgets", 404))
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }
}
