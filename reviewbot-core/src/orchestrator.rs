//! The review orchestrator: drives one record through fetch → generate →
//! post → finalize.
//!
//! Within a run every external side effect happens at most once. Retries
//! exist only inside the retry controller around generation; posting is
//! never retried (duplicate comments are worse than a failed run), and a
//! fetch failure is final until the next trigger. Any error in the pipeline
//! marks the record failed with the error message before propagating, so the
//! webhook layer can acknowledge the delivery and report the failure.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clients::{AiClient, HostClient, PromptContext};
use crate::error::ReviewError;
use crate::filter::{filter_reviewable_files, ReviewLimits};
use crate::gate::{self, Decision, TriggerEvent};
use crate::parse::{parse_review_comments, ParsedResponse};
use crate::record::{RecordId, RecordKey, ReviewRecord, ReviewStatus, ReviewedFile};
use crate::retry::{run_with_retry, Sleeper, TokioSleeper};
use crate::store::RecordStore;
use crate::summary::render_summary;

/// Top-level workflow engine. Owns the collaborator handles and the review
/// limits; one instance serves all pull requests.
pub struct ReviewEngine {
    host: Arc<dyn HostClient>,
    ai: Arc<dyn AiClient>,
    store: Arc<dyn RecordStore>,
    sleeper: Arc<dyn Sleeper>,
    limits: ReviewLimits,
}

impl ReviewEngine {
    pub fn new(
        host: Arc<dyn HostClient>,
        ai: Arc<dyn AiClient>,
        store: Arc<dyn RecordStore>,
        limits: ReviewLimits,
    ) -> Self {
        Self {
            host,
            ai,
            store,
            sleeper: Arc::new(TokioSleeper),
            limits,
        }
    }

    /// Replace the sleeper (tests use a recording fake).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Gate an incoming trigger event. See [`gate::admit_trigger`].
    pub async fn admit_trigger(&self, event: TriggerEvent) -> Result<Decision, ReviewError> {
        gate::admit_trigger(self.store.as_ref(), event).await
    }

    /// Admit a manual retry request. See [`gate::request_retry`].
    pub async fn request_retry(&self, key: &RecordKey) -> Result<ReviewRecord, ReviewError> {
        gate::request_retry(self.store.as_ref(), key).await
    }

    /// Run one review to a terminal status.
    pub async fn run_review(&self, key: &RecordKey, record_id: RecordId) -> Result<(), ReviewError> {
        let mut record = self
            .store
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| ReviewError::not_found(format!("review record {}", record_id)))?;

        record.mark_in_progress()?;
        self.store.save(&record).await?;
        info!("Review started for {} at {}", key, record.snapshot.head_sha);

        match self.execute(key, &mut record).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_overload_exhausted() {
                    // Best effort: tell the PR author why no review appeared.
                    if let Err(notice_err) = self.host.post_fallback_notice(key).await {
                        warn!(
                            "Failed to post fallback notice on {}: {}",
                            key, notice_err
                        );
                    }
                }

                error!("Review failed for {}: {}", key, err);
                // A failed save after completion leaves the record completed;
                // only an in-flight record is moved to failed.
                if record.status == ReviewStatus::InProgress {
                    record.mark_failed(err.to_string())?;
                    self.store.save(&record).await?;
                }
                Err(err)
            }
        }
    }

    /// Steps 3–7 of a run. The record is in_progress on entry; on success it
    /// has been marked completed and saved, on error it is left in_progress
    /// for the caller's failure path.
    async fn execute(&self, key: &RecordKey, record: &mut ReviewRecord) -> Result<(), ReviewError> {
        if self.host.has_bot_already_reviewed(key).await? {
            // A previous run posted but crashed before updating the record.
            info!("{} already has a review from this bot, completing", key);
            record.mark_completed(None)?;
            self.store.save(record).await?;
            return Ok(());
        }

        let diff = self.host.get_pull_request_diff(key).await?;
        let files = filter_reviewable_files(diff.files, &self.limits);
        record.files_reviewed = files.iter().map(ReviewedFile::from).collect();
        self.store.save(record).await?;

        if files.is_empty() {
            info!("No reviewable files in {}, completing without review", key);
            record.mark_completed(None)?;
            self.store.save(record).await?;
            return Ok(());
        }

        let context = PromptContext {
            snapshot: record.snapshot.clone(),
            files,
        };
        let raw = run_with_retry(|| self.ai.generate(&context), self.sleeper.as_ref()).await?;

        let comments = match parse_review_comments(&raw) {
            ParsedResponse::Comments(comments) => comments,
            ParsedResponse::Degraded => {
                warn!("Degraded AI response for {}, posting no comments", key);
                Vec::new()
            }
        };
        let summary = render_summary(&comments);

        record.comments = comments;
        record.summary_comment = Some(summary.clone());
        self.store.save(record).await?;

        let review_id = self.host.post_review(key, &record.comments, &summary).await?;
        info!(
            "Posted review {} on {} ({} comments)",
            review_id,
            key,
            record.comments.len()
        );

        record.mark_completed(Some(review_id))?;
        self.store.save(record).await?;
        Ok(())
    }
}
