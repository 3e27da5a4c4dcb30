use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TranslationConfig;
use crate::{AppError, Result};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Connection failed or timed out.
    #[error("Request error: {0}")]
    Request(String),

    /// Non-2xx response or an empty answer.
    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Turns a product description into its cleaned-up translation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, subject: &str, references: &[String]) -> std::result::Result<String, TransformError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    instruction: String,
}

impl ChatCompletionClient {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        if config.api_base_url.trim().is_empty() {
            return Err(AppError::Translation("translation.api_base_url is empty".into()));
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            instruction: config.instruction.clone(),
        })
    }

    fn messages(&self, subject: &str, references: &[String]) -> Vec<ChatMessage> {
        let reference = if references.is_empty() {
            "参考内容：无".to_string()
        } else {
            format!(
                "参考内容：{}\n如果参考内容中的英文与待翻译内容没有任何相似，请不要参考参考内容，品牌名保留英文",
                references.join(", ")
            )
        };

        vec![
            ChatMessage {
                role: "system",
                content: self.instruction.clone(),
            },
            ChatMessage {
                role: "user",
                content: reference,
            },
            ChatMessage {
                role: "user",
                content: format!("待翻译内容：{}", subject),
            },
        ]
    }
}

#[async_trait]
impl TextTransform for ChatCompletionClient {
    async fn transform(&self, subject: &str, references: &[String]) -> std::result::Result<String, TransformError> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: self.messages(subject, references),
            temperature: self.temperature,
        };

        let mut builder = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "Chat completion request failed");
            TransformError::Request(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Chat completion API error");
            return Err(TransformError::Api(format!("{}: {}", status, error_text)));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| TransformError::Parse(e.to_string()))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| TransformError::Api("empty completion".into()))?;

        debug!(
            model = %self.model,
            references = references.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion"
        );
        Ok(content)
    }
}
