use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use reviewbot_core::{Decision, PrAction, PrSnapshot, RecordKey, ReviewError, TriggerEvent};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub installation: Option<Installation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    pub user: User,
    pub head: PullRequestRef,
    pub base: PullRequestRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if !signature.starts_with("sha256=") {
        return false;
    }

    let signature_hex = &signature[7..]; // Remove "sha256=" prefix

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Use constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

/// Build the trigger event for a pull_request delivery.
fn trigger_event(payload: &GitHubWebhookPayload) -> Option<TriggerEvent> {
    let action = payload.action.as_deref()?;
    let pr = payload.pull_request.as_ref()?;
    let repo = payload.repository.as_ref()?;

    Some(TriggerEvent {
        key: RecordKey::new(&repo.owner.login, &repo.name, pr.number),
        action: PrAction::parse(action),
        draft: pr.draft,
        snapshot: PrSnapshot {
            repo_full_name: repo.full_name.clone(),
            title: pr.title.clone(),
            body: pr.body.clone(),
            author: pr.user.login.clone(),
            base_branch: pr.base.ref_name.clone(),
            head_branch: pr.head.ref_name.clone(),
            head_sha: pr.head.sha.clone(),
        },
    })
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    info!("Received webhook payload");

    let (_parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    let Some(event) = trigger_event(&payload) else {
        // Deliveries for other event kinds are acknowledged and dropped.
        info!("Ignoring webhook event: {:?}", payload.action);
        return Ok(Json(WebhookResponse {
            message: "ignored".to_string(),
        }));
    };

    if let Some(installation) = &payload.installation {
        state
            .github_client
            .note_installation(&event.key.owner, &event.key.repo, installation.id)
            .await;
    } else {
        warn!("No installation information in payload for {}", event.key);
    }

    let key = event.key.clone();
    let decision = match state.engine.admit_trigger(event).await {
        Ok(decision) => decision,
        Err(e) => {
            error!("Failed to gate webhook for {}: {}", key, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let message = decision.describe().to_string();

    if let Decision::Admit(record) = decision {
        let engine = state.engine.clone();
        let record_id = record.id;
        tokio::spawn(async move {
            info!("Spawned background task for review of {}", key);
            if let Err(e) = engine.run_review(&key, record_id).await {
                error!("Review of {} failed: {}", key, e);
            }
        });
    }

    // GitHub only cares that the delivery was accepted; skips are still 200s.
    Ok(Json(WebhookResponse { message }))
}

/// Manual retry endpoint. Admits the retry through the same gate the
/// webhook path uses, then runs the review in the background.
pub async fn retry_review_handler(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, pr_number)): Path<(String, String, u64)>,
) -> Result<(StatusCode, Json<WebhookResponse>), (StatusCode, Json<WebhookResponse>)> {
    let key = RecordKey::new(&owner, &repo, pr_number);
    info!("Manual retry requested for {}", key);

    let record = state
        .engine
        .request_retry(&key)
        .await
        .map_err(|e| retry_rejection(&key, e))?;

    let engine = state.engine.clone();
    let spawn_key = key.clone();
    let record_id = record.id;
    tokio::spawn(async move {
        info!("Spawned background task for retry of {}", spawn_key);
        if let Err(e) = engine.run_review(&spawn_key, record_id).await {
            error!("Retry of {} failed: {}", spawn_key, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            message: format!("retry #{} accepted", record.retry_count),
        }),
    ))
}

fn retry_rejection(key: &RecordKey, err: ReviewError) -> (StatusCode, Json<WebhookResponse>) {
    let status = match &err {
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::InvalidState { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Retry of {} could not be admitted: {}", key, err);
    } else {
        info!("Retry of {} rejected: {}", key, err);
    }

    (
        status,
        Json(WebhookResponse {
            message: err.to_string(),
        }),
    )
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_signature_verification_accepts_valid_signature() {
        let secret = "webhook-secret";
        let payload = br#"{"action":"opened"}"#;
        let signature = sign(secret, payload);
        assert!(verify_github_signature(secret, payload, &signature));
    }

    #[test]
    fn test_signature_verification_rejects_wrong_secret() {
        let payload = br#"{"action":"opened"}"#;
        let signature = sign("webhook-secret", payload);
        assert!(!verify_github_signature("other-secret", payload, &signature));
    }

    #[test]
    fn test_signature_verification_rejects_tampered_payload() {
        let secret = "webhook-secret";
        let signature = sign(secret, br#"{"action":"opened"}"#);
        assert!(!verify_github_signature(
            secret,
            br#"{"action":"closed"}"#,
            &signature
        ));
    }

    #[test]
    fn test_signature_verification_rejects_malformed_header() {
        let secret = "webhook-secret";
        let payload = b"body";
        assert!(!verify_github_signature(secret, payload, "sha1=abcdef"));
        assert!(!verify_github_signature(secret, payload, "sha256=not-hex"));
        assert!(!verify_github_signature(secret, payload, ""));
    }

    fn pull_request_payload(action: &str, draft: bool) -> serde_json::Value {
        json!({
            "action": action,
            "pull_request": {
                "number": 7,
                "title": "Add widget",
                "body": "Implements the widget.",
                "draft": draft,
                "user": { "login": "octocat" },
                "head": { "sha": "abc123", "ref": "feature" },
                "base": { "sha": "def456", "ref": "main" }
            },
            "repository": {
                "name": "widgets",
                "full_name": "octo/widgets",
                "owner": { "login": "octo" }
            },
            "installation": { "id": 42 }
        })
    }

    #[test]
    fn test_webhook_payload_deserialization() {
        let payload: GitHubWebhookPayload =
            serde_json::from_value(pull_request_payload("opened", false)).unwrap();

        assert_eq!(payload.action, Some("opened".to_string()));
        let pr = payload.pull_request.unwrap();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.head.sha, "abc123");
        assert_eq!(pr.base.ref_name, "main");
        assert!(!pr.draft);
        assert_eq!(payload.installation.unwrap().id, 42);
    }

    #[test]
    fn test_trigger_event_from_payload() {
        let payload: GitHubWebhookPayload =
            serde_json::from_value(pull_request_payload("synchronize", true)).unwrap();

        let event = trigger_event(&payload).expect("pull_request payload yields an event");
        assert_eq!(event.key, RecordKey::new("octo", "widgets", 7));
        assert_eq!(event.action, PrAction::Synchronize);
        assert!(event.draft);
        assert_eq!(event.snapshot.repo_full_name, "octo/widgets");
        assert_eq!(event.snapshot.head_sha, "abc123");
        assert_eq!(event.snapshot.author, "octocat");
    }

    #[test]
    fn test_trigger_event_requires_pull_request() {
        let payload: GitHubWebhookPayload = serde_json::from_value(json!({
            "action": "created",
            "repository": {
                "name": "widgets",
                "full_name": "octo/widgets",
                "owner": { "login": "octo" }
            }
        }))
        .unwrap();

        assert!(trigger_event(&payload).is_none());
    }

    #[test]
    fn test_draft_defaults_to_false_when_absent() {
        let mut value = pull_request_payload("opened", false);
        value["pull_request"]
            .as_object_mut()
            .unwrap()
            .remove("draft");
        let payload: GitHubWebhookPayload = serde_json::from_value(value).unwrap();
        assert!(!payload.pull_request.unwrap().draft);
    }
}
