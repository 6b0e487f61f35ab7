//! Collaborator traits for the code-hosting platform and the AI service.
//!
//! The orchestrator only ever talks to these traits; the server crate
//! provides the real GitHub and OpenAI implementations, and the tests
//! substitute fakes. Anything that looks like ambient global state in a
//! typical bot (bot identity, installation tokens) is owned by the client
//! implementation behind the trait, not by this crate.

use async_trait::async_trait;

use crate::error::{GenerateError, ReviewError};
use crate::record::{PrSnapshot, RecordKey, ReviewComment};

/// One changed file as reported by the hosting platform's diff endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    /// Change status as reported by the platform: "added", "modified",
    /// "removed", "renamed", ...
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
    /// Unified diff hunk for this file. Absent for binary files.
    pub patch: Option<String>,
}

/// Pull request metadata plus the list of changed files.
#[derive(Debug, Clone)]
pub struct PullRequestDiff {
    pub snapshot: PrSnapshot,
    pub files: Vec<ChangedFile>,
}

/// Everything the AI client needs to build its prompt.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub snapshot: PrSnapshot,
    pub files: Vec<ChangedFile>,
}

/// Client for the code-hosting platform.
///
/// None of these operations are retried by the core: a fetch or post failure
/// fails the run, and only an explicit retry request re-runs the pipeline.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Fetch PR metadata and the list of changed files.
    async fn get_pull_request_diff(&self, key: &RecordKey)
        -> Result<PullRequestDiff, ReviewError>;

    /// Whether this bot's identity has already posted a review on the PR.
    ///
    /// Covers the crash window where a previous run posted successfully but
    /// died before updating its record.
    async fn has_bot_already_reviewed(&self, key: &RecordKey) -> Result<bool, ReviewError>;

    /// Post comments and summary as a single review submission with a
    /// non-blocking verdict. Returns the platform's review id.
    async fn post_review(
        &self,
        key: &RecordKey,
        comments: &[ReviewComment],
        summary: &str,
    ) -> Result<u64, ReviewError>;

    /// Best-effort notice that the AI service was unavailable.
    async fn post_fallback_notice(&self, key: &RecordKey) -> Result<(), ReviewError>;
}

/// Client for the AI generation service.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Submit the prompt context and return the raw response text.
    ///
    /// Implementations classify each failure as [`GenerateError::Overloaded`]
    /// (eligible for backoff retry) or [`GenerateError::Fatal`]. The request
    /// must be safe to re-issue unchanged.
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerateError>;
}
