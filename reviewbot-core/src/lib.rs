//! Core review lifecycle for the pull-request review bot.
//!
//! This crate contains everything with real invariants: the durable
//! [`ReviewRecord`] and its status transitions, the trigger gate that decides
//! whether an incoming event should start a run, the retry controller that
//! wraps AI generation with bounded backoff, and the orchestrator that drives
//! a record from pending through in-progress to a terminal state.
//!
//! All I/O goes through the collaborator traits in [`clients`] and [`store`],
//! so the whole lifecycle is testable with in-process fakes.

pub mod clients;
pub mod error;
pub mod filter;
pub mod gate;
pub mod orchestrator;
pub mod parse;
pub mod record;
pub mod retry;
pub mod store;
pub mod summary;

pub use clients::{AiClient, ChangedFile, HostClient, PromptContext, PullRequestDiff};
pub use error::{GenerateError, ReviewError};
pub use filter::ReviewLimits;
pub use gate::{Decision, PrAction, TriggerEvent};
pub use orchestrator::ReviewEngine;
pub use record::{
    PrSnapshot, RecordId, RecordKey, ReviewComment, ReviewRecord, ReviewStatus, ReviewedFile,
    Severity,
};
pub use retry::{Sleeper, TokioSleeper};
pub use store::{InMemoryRecordStore, RecordStore};
