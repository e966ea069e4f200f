//! Language model access
//!
//! [`AiClient`] is the seam to an OpenAI-compatible chat-completions API.
//! [`AiService`] wraps an optional client and never fails: callers get a
//! fallback when no key is configured or the request errors.

use crate::config::AiConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const UNAVAILABLE_MESSAGE: &str = "AI service is currently unavailable. Please try again later.";

/// A chat model that answers one system + user exchange
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.trim().to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn request<'a>(&'a self, system: &'a str, user: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl AiClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(system, user))
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Completion request failed with status {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Completion response carried no content")
    }
}

/// Optional model access with graceful degradation
pub struct AiService {
    client: Option<Arc<dyn AiClient>>,
    model: String,
}

impl AiService {
    /// Build from configuration; without a usable key the service is disabled
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        if !config.is_configured() {
            tracing::warn!("No AI API key configured, tutor features will use fallback responses");
            return Ok(Self::disabled(&config.model));
        }
        let client = OpenAiClient::new(config)?;
        Ok(Self::with_client(Arc::new(client), &config.model))
    }

    pub fn with_client(client: Arc<dyn AiClient>, model: &str) -> Self {
        Self {
            client: Some(client),
            model: model.to_string(),
        }
    }

    pub fn disabled(model: &str) -> Self {
        Self {
            client: None,
            model: model.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Trimmed completion, or `None` when disabled or the call failed
    pub async fn try_complete(&self, system: &str, user: &str) -> Option<String> {
        let client = self.client.as_ref()?;
        match client.complete(system, user).await {
            Ok(answer) => Some(answer.trim().to_string()),
            Err(e) => {
                tracing::error!("AI completion failed: {:#}", e);
                None
            }
        }
    }

    /// Direct question to the model; errors come back as text
    pub async fn ask_gpt(&self, question: &str, system_prompt: Option<&str>) -> String {
        let Some(client) = &self.client else {
            return UNAVAILABLE_MESSAGE.to_string();
        };
        let system = system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT);

        match client.complete(system, question).await {
            Ok(answer) => answer.trim().to_string(),
            Err(e) => {
                tracing::error!("AI completion failed: {:#}", e);
                format!("Sorry, I encountered an error: {}", e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted model clients for service tests

    use super::*;
    use std::sync::Mutex;

    /// Returns a fixed answer and remembers the prompts it saw
    pub struct ScriptedClient {
        answer: Result<String, String>,
        pub prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedClient {
        pub fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(answer.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(error: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Err(error.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AiClient for ScriptedClient {
        async fn complete(&self, system: &str, user: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), user.to_string()));
            match &self.answer {
                Ok(a) => Ok(a.clone()),
                Err(e) => Err(anyhow::anyhow!(e.clone())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedClient;
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    /// Serve a fixed chat-completions reply on a local port; returns the base URL
    async fn stub_api(status: StatusCode, reply: Value) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let reply = reply.clone();
                async move { (status, Json(reply)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn client_for(base_url: String) -> OpenAiClient {
        OpenAiClient::new(&AiConfig {
            api_key: "sk-test".to_string(),
            base_url,
            timeout_seconds: 5,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_service() {
        let service = AiService::disabled("gpt-4o-mini");
        assert!(!service.is_available());
        assert_eq!(service.ask_gpt("hi", None).await, UNAVAILABLE_MESSAGE);
        assert!(service.try_complete("s", "u").await.is_none());
    }

    #[tokio::test]
    async fn test_ask_gpt_trims_and_uses_default_prompt() {
        let client = ScriptedClient::answering("  Ownership moves values.\n");
        let service = AiService::with_client(client.clone(), "gpt-4o-mini");

        assert_eq!(service.ask_gpt("What is a move?", None).await, "Ownership moves values.");
        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts[0].0, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(prompts[0].1, "What is a move?");
    }

    #[tokio::test]
    async fn test_ask_gpt_reports_errors_as_text() {
        let service = AiService::with_client(ScriptedClient::failing("quota exceeded"), "m");
        assert_eq!(
            service.ask_gpt("q", Some("Be brief.")).await,
            "Sorry, I encountered an error: quota exceeded"
        );
        assert!(service.try_complete("s", "u").await.is_none());
    }

    #[test]
    fn test_from_config_without_key_is_disabled() {
        let mut config = AiConfig::default();
        assert!(!AiService::from_config(&config).unwrap().is_available());

        config.api_key = crate::config::PLACEHOLDER_API_KEY.to_string();
        assert!(!AiService::from_config(&config).unwrap().is_available());

        config.api_key = "sk-test".to_string();
        let service = AiService::from_config(&config).unwrap();
        assert!(service.is_available());
        assert_eq!(service.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_request_body_shape() {
        let config = AiConfig {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:9/v1/".to_string(),
            ..Default::default()
        };
        let client = OpenAiClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:9/v1/chat/completions");

        let body = serde_json::to_value(client.request("sys", "usr")).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn test_response_parsing() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hi"));

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }

    #[tokio::test]
    async fn test_http_client_reads_first_choice() {
        let base = stub_api(
            StatusCode::OK,
            json!({"choices": [{"message": {"role": "assistant", "content": " Moves transfer ownership. "}}]}),
        )
        .await;
        let client = client_for(base);
        assert_eq!(client.complete("s", "u").await.unwrap(), " Moves transfer ownership. ");

        let service = AiService::with_client(Arc::new(client), "gpt-4o-mini");
        assert_eq!(service.ask_gpt("q", None).await, "Moves transfer ownership.");
    }

    #[tokio::test]
    async fn test_http_client_server_error() {
        let base = stub_api(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})).await;
        let client = client_for(base);

        let err = client.complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("500"), "{}", err);

        let service = AiService::with_client(Arc::new(client), "gpt-4o-mini");
        let answer = service.ask_gpt("q", None).await;
        assert!(answer.starts_with("Sorry, I encountered an error:"), "{}", answer);
        assert!(service.try_complete("s", "u").await.is_none());
    }

    #[tokio::test]
    async fn test_http_client_empty_choices() {
        let base = stub_api(StatusCode::OK, json!({"choices": []})).await;
        let client = client_for(base);

        let err = client.complete("s", "u").await.unwrap_err();
        assert_eq!(err.to_string(), "Completion response carried no content");

        let service = AiService::with_client(Arc::new(client), "gpt-4o-mini");
        assert_eq!(
            service.ask_gpt("q", None).await,
            "Sorry, I encountered an error: Completion response carried no content"
        );
    }
}
