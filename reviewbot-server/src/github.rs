//! GitHub App client.
//!
//! Authenticates as a GitHub App: a short-lived RS256 JWT is exchanged for
//! per-installation access tokens, which are cached with a five-minute
//! expiry buffer. The installation id for each repository is learned from
//! webhook deliveries and kept on the client, and the bot's own login
//! (needed for the already-reviewed check) is fetched once and cached —
//! both are explicit client state, not process-wide globals.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info};

use reviewbot_core::{
    ChangedFile, HostClient, PrSnapshot, PullRequestDiff, RecordKey, ReviewComment, ReviewError,
};

const GITHUB_API: &str = "https://api.github.com";
const ACCEPT_JSON: &str = "application/vnd.github.v3+json";

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
    /// owner/repo -> installation id, learned from webhook payloads.
    installations: Arc<RwLock<HashMap<String, u64>>>,
    /// The app slug, fetched lazily; the bot's review author login is
    /// `{slug}[bot]`.
    bot_slug: Arc<RwLock<Option<String>>>,
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub title: String,
    pub body: Option<String>,
    pub user: UserResponse,
    pub head: PullRequestRefResponse,
    pub base: PullRequestRefResponse,
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFileResponse {
    filename: String,
    status: String,
    additions: u64,
    deletions: u64,
    changes: u64,
    patch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    user: UserResponse,
}

#[derive(Debug, Serialize)]
struct CreateReviewRequest {
    body: String,
    event: String,
    comments: Vec<CreateReviewComment>,
}

#[derive(Debug, Serialize)]
struct CreateReviewComment {
    path: String,
    line: u64,
    side: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct CreateReviewResponse {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest {
    body: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Self {
        let client = Client::builder()
            .user_agent("reviewbot/0.1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
            installations: Arc::new(RwLock::new(HashMap::new())),
            bot_slug: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember which installation a repository belongs to. Called by the
    /// webhook layer for every delivery that carries installation info.
    pub async fn note_installation(&self, owner: &str, repo: &str, installation_id: u64) {
        let mut installations = self.installations.write().await;
        installations.insert(format!("{}/{}", owner, repo), installation_id);
    }

    async fn installation_for(&self, key: &RecordKey) -> Result<u64> {
        let installations = self.installations.read().await;
        installations
            .get(&format!("{}/{}", key.owner, key.repo))
            .copied()
            .ok_or_else(|| anyhow!("No installation known for {}/{}", key.owner, key.repo))
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Check if current token is still valid (with 5 minute buffer)
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            GITHUB_API, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", ACCEPT_JSON)
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!(
                "GitHub App token request failed: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub App token request failed: {} - {}",
                status,
                error_text
            ));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = chrono::DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);

        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp() as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        Ok(token_response.token)
    }

    /// The login GitHub attributes this app's reviews to (`{slug}[bot]`).
    async fn bot_login(&self) -> Result<String> {
        {
            let cached = self.bot_slug.read().await;
            if let Some(slug) = cached.as_ref() {
                return Ok(format!("{}[bot]", slug));
            }
        }

        let jwt = self.generate_jwt()?;
        let response = self
            .client
            .get(format!("{}/app", GITHUB_API))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", ACCEPT_JSON)
            .send()
            .await
            .context("Failed to fetch app info")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub App info request failed: {} - {}", status, error_text));
        }

        let app: AppInfoResponse = response
            .json()
            .await
            .context("Failed to parse app info response")?;

        let mut cached = self.bot_slug.write().await;
        *cached = Some(app.slug.clone());
        Ok(format!("{}[bot]", app.slug))
    }

    async fn fetch_pull_request_diff(&self, key: &RecordKey) -> Result<PullRequestDiff> {
        let installation_id = self.installation_for(key).await?;
        let token = self.get_installation_token(installation_id).await?;

        let pr_url = format!(
            "{}/repos/{}/{}/pulls/{}",
            GITHUB_API, key.owner, key.repo, key.pr_number
        );

        info!("Fetching PR metadata for {}", key);

        let response = self
            .client
            .get(&pr_url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT_JSON)
            .send()
            .await
            .context("Failed to send pull request metadata request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub API error fetching PR: {} - {}", status, error_text));
        }

        let pr: PullRequestResponse = response
            .json()
            .await
            .context("Failed to parse pull request response")?;

        // Changed files are paginated; 100 per page is the maximum.
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let files_url = format!(
                "{}/repos/{}/{}/pulls/{}/files?per_page=100&page={}",
                GITHUB_API, key.owner, key.repo, key.pr_number, page
            );

            let response = self
                .client
                .get(&files_url)
                .header("Authorization", format!("Bearer {}", token))
                .header("Accept", ACCEPT_JSON)
                .send()
                .await
                .context("Failed to send pull request files request")?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(anyhow!(
                    "GitHub API error fetching files (page {}): {} - {}",
                    page,
                    status,
                    error_text
                ));
            }

            let batch: Vec<PullRequestFileResponse> = response
                .json()
                .await
                .context("Failed to parse pull request files response")?;
            let done = batch.len() < 100;

            files.extend(batch.into_iter().map(|f| ChangedFile {
                path: f.filename,
                status: f.status,
                additions: f.additions,
                deletions: f.deletions,
                changes: f.changes,
                patch: f.patch,
            }));

            if done {
                break;
            }
            page += 1;
        }

        info!("Fetched {} changed files for {}", files.len(), key);

        Ok(PullRequestDiff {
            snapshot: PrSnapshot {
                repo_full_name: format!("{}/{}", key.owner, key.repo),
                title: pr.title,
                body: pr.body,
                author: pr.user.login,
                base_branch: pr.base.ref_name,
                head_branch: pr.head.ref_name,
                head_sha: pr.head.sha,
            },
            files,
        })
    }

    async fn fetch_has_bot_reviewed(&self, key: &RecordKey) -> Result<bool> {
        let installation_id = self.installation_for(key).await?;
        let token = self.get_installation_token(installation_id).await?;
        let bot_login = self.bot_login().await?;

        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews?per_page=100",
            GITHUB_API, key.owner, key.repo, key.pr_number
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT_JSON)
            .send()
            .await
            .context("Failed to send reviews request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "GitHub API error fetching reviews: {} - {}",
                status,
                error_text
            ));
        }

        let reviews: Vec<ReviewResponse> = response
            .json()
            .await
            .context("Failed to parse reviews response")?;

        Ok(reviews.iter().any(|r| r.user.login == bot_login))
    }

    async fn submit_review(
        &self,
        key: &RecordKey,
        comments: &[ReviewComment],
        summary: &str,
    ) -> Result<u64> {
        let installation_id = self.installation_for(key).await?;
        let token = self.get_installation_token(installation_id).await?;

        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            GITHUB_API, key.owner, key.repo, key.pr_number
        );

        let request = CreateReviewRequest {
            body: summary.to_string(),
            // Always a non-blocking verdict: an app cannot approve or
            // request changes on every platform configuration.
            event: "COMMENT".to_string(),
            comments: comments.iter().map(render_review_comment).collect(),
        };

        info!(
            "Posting review with {} comments to {}",
            comments.len(),
            key
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT_JSON)
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&request)?)
            .send()
            .await
            .context("Failed to send create review request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("GitHub API error posting review: {} - {}", status, error_text);
            return Err(anyhow!(
                "GitHub API error posting review: {} - {}",
                status,
                error_text
            ));
        }

        let review: CreateReviewResponse = response
            .json()
            .await
            .context("Failed to parse create review response")?;
        info!("Successfully posted review {}", review.id);

        Ok(review.id)
    }

    async fn submit_fallback_notice(&self, key: &RecordKey) -> Result<()> {
        let installation_id = self.installation_for(key).await?;
        let token = self.get_installation_token(installation_id).await?;

        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API, key.owner, key.repo, key.pr_number
        );

        let request = CreateCommentRequest {
            body: "⚠️ **Automated review unavailable**\n\n\
                   The AI review service is currently overloaded; this pull request \
                   was not reviewed. Request a retry once the service recovers."
                .to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", ACCEPT_JSON)
            .header("Content-Type", "application/json")
            .body(serde_json::to_string(&request)?)
            .send()
            .await
            .context("Failed to send fallback notice request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "GitHub API error posting fallback notice: {} - {}",
                status,
                error_text
            ));
        }

        Ok(())
    }
}

/// Render one review comment body with its severity, category, and optional
/// suggestion block.
fn render_review_comment(comment: &ReviewComment) -> CreateReviewComment {
    let mut body = format!(
        "**{}** ({}): {}",
        comment.severity, comment.category, comment.comment
    );
    if let Some(suggestion) = &comment.suggestion {
        body.push_str(&format!("\n\n```suggestion\n{}\n```", suggestion));
    }

    CreateReviewComment {
        path: comment.path.clone(),
        line: comment.line,
        side: "RIGHT".to_string(),
        body,
    }
}

fn remote_fatal(err: anyhow::Error) -> ReviewError {
    ReviewError::RemoteFatal {
        message: format!("{:#}", err),
    }
}

#[async_trait]
impl HostClient for GitHubClient {
    async fn get_pull_request_diff(
        &self,
        key: &RecordKey,
    ) -> Result<PullRequestDiff, ReviewError> {
        self.fetch_pull_request_diff(key).await.map_err(remote_fatal)
    }

    async fn has_bot_already_reviewed(&self, key: &RecordKey) -> Result<bool, ReviewError> {
        self.fetch_has_bot_reviewed(key).await.map_err(remote_fatal)
    }

    async fn post_review(
        &self,
        key: &RecordKey,
        comments: &[ReviewComment],
        summary: &str,
    ) -> Result<u64, ReviewError> {
        self.submit_review(key, comments, summary)
            .await
            .map_err(remote_fatal)
    }

    async fn post_fallback_notice(&self, key: &RecordKey) -> Result<(), ReviewError> {
        self.submit_fallback_notice(key).await.map_err(remote_fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewbot_core::Severity;

    #[test]
    fn test_render_review_comment_without_suggestion() {
        let rendered = render_review_comment(&ReviewComment {
            path: "src/lib.rs".to_string(),
            line: 12,
            severity: Severity::Warning,
            category: "logic".to_string(),
            comment: "possible overflow".to_string(),
            suggestion: None,
        });
        assert_eq!(rendered.path, "src/lib.rs");
        assert_eq!(rendered.line, 12);
        assert_eq!(rendered.side, "RIGHT");
        assert_eq!(rendered.body, "**warning** (logic): possible overflow");
    }

    #[test]
    fn test_render_review_comment_with_suggestion() {
        let rendered = render_review_comment(&ReviewComment {
            path: "src/lib.rs".to_string(),
            line: 12,
            severity: Severity::Error,
            category: "logic".to_string(),
            comment: "off by one".to_string(),
            suggestion: Some("for i in 0..len {".to_string()),
        });
        assert!(rendered.body.starts_with("**error** (logic): off by one"));
        assert!(rendered.body.contains("```suggestion\nfor i in 0..len {\n```"));
    }

    #[tokio::test]
    async fn test_note_installation_lookup() {
        let client = GitHubClient::new(1, "not-a-key".to_string());
        client.note_installation("octo", "widgets", 42).await;

        let key = RecordKey::new("octo", "widgets", 7);
        assert_eq!(client.installation_for(&key).await.unwrap(), 42);

        let unknown = RecordKey::new("octo", "gadgets", 7);
        assert!(client.installation_for(&unknown).await.is_err());
    }
}
