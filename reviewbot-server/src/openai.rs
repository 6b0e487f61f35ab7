//! OpenAI chat-completions client.
//!
//! The only classification that matters to callers is retryable versus not:
//! rate limiting, 5xx responses, and transport failures are `Overloaded`
//! (the retry loop backs off and tries again), everything else is `Fatal`.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use reviewbot_core::{AiClient, ChangedFile, GenerateError, PromptContext};

const OPENAI_API: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = include_str!("prompt.txt");

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .user_agent("reviewbot/0.1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model,
        }
    }

    async fn request_completion(&self, prompt: String) -> Result<String, GenerateError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        info!("Requesting review completion from model {}", self.model);

        let response = self
            .client
            .post(OPENAI_API)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // Connection resets and timeouts look the same as an
                // overloaded upstream from here.
                GenerateError::overloaded(format!("transport error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::fatal(format!("malformed completion response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerateError::fatal("completion contained no choices"))
    }
}

fn classify_failure(status: StatusCode, body: &str) -> GenerateError {
    let message = format!("OpenAI API error: {} - {}", status, body);
    let overloaded = status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || body.contains("overloaded");
    if overloaded {
        GenerateError::overloaded(message)
    } else {
        error!("Non-retryable OpenAI failure: {}", message);
        GenerateError::fatal(message)
    }
}

/// Render the user prompt: PR metadata followed by each file's patch.
pub fn render_prompt(context: &PromptContext) -> String {
    let mut prompt = format!(
        "Repository: {}\nTitle: {}\nAuthor: {}\nBranch: {} -> {}\n",
        context.snapshot.repo_full_name,
        context.snapshot.title,
        context.snapshot.author,
        context.snapshot.head_branch,
        context.snapshot.base_branch,
    );
    if let Some(body) = &context.snapshot.body {
        if !body.trim().is_empty() {
            prompt.push_str(&format!("\nDescription:\n{}\n", body.trim()));
        }
    }
    prompt.push_str("\nChanged files:\n");
    for file in &context.files {
        prompt.push_str(&render_file(file));
    }
    prompt
}

fn render_file(file: &ChangedFile) -> String {
    let mut section = format!(
        "\n--- {} ({}, +{} -{})\n",
        file.path, file.status, file.additions, file.deletions
    );
    match &file.patch {
        Some(patch) => {
            section.push_str(patch);
            section.push('\n');
        }
        None => section.push_str("(no textual diff available)\n"),
    }
    section
}

#[async_trait::async_trait]
impl AiClient for OpenAiClient {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerateError> {
        self.request_completion(render_prompt(context)).await
    }
}
