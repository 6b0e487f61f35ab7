pub mod config;
pub mod db;
pub mod github;
pub mod openai;
pub mod webhook;

use std::sync::Arc;

use reviewbot_core::ReviewEngine;

pub use github::GitHubClient;
pub use openai::OpenAiClient;

pub struct AppState {
    pub engine: Arc<ReviewEngine>,
    pub github_client: Arc<GitHubClient>,
    pub webhook_secret: String,
}
