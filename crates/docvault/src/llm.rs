//! Answer generators.
//!
//! | `llm.provider` | Generator |
//! |----------------|-----------|
//! | `"disabled"` | [`DisabledGenerator`]: every call fails |
//! | `"openai"` | [`OpenAIChat`]: any OpenAI-compatible `/chat/completions` endpoint |
//!
//! `OPENAI_API_KEY` is sent as a bearer token when set; local servers
//! (LM Studio, vLLM, Ollama's OpenAI shim) usually do not need one.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::traits::AnswerGenerator;

const SYSTEM_PROMPT: &str = "Answer using only the provided context. \
Cite document titles when you use them. If the context does not contain the answer, say so.";

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("llm provider is disabled")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

pub struct OpenAIChat {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    api_key: Option<String>,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .context("llm.model must be set for the openai provider")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.url),
            model,
            temperature: config.temperature,
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }
}

/// Resolve the chat completions endpoint from a base URL.
fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

/// `choices[0].message.content`; a null content is an empty answer.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let Some(choice) = json["choices"].get(0) else {
        bail!("chat response has no choices");
    };
    Ok(choice["message"]["content"].as_str().unwrap_or("").to_string())
}

#[async_trait]
impl AnswerGenerator for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let messages = [
            Message {
                role: "system".into(),
                content: SYSTEM_PROMPT.into(),
            },
            Message {
                role: "user".into(),
                content: prompt.into(),
            },
        ];
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            bail!("LLM API error {}: {}", status, text);
        }
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;
        let answer = parse_chat_response(&json)?;
        debug!(model = %self.model, chars = answer.len(), "answer generated");
        Ok(answer)
    }
}

pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown llm provider: '{}'", other),
    }
}
