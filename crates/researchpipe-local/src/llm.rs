//! OpenAI-compatible chat client.
//!
//! Works against any endpoint that speaks `/v1/chat/completions`: OpenAI
//! itself, a local vLLM/Ollama gateway, or a hosted proxy. Configuration
//! comes from the environment; a missing base URL or model is
//! `NotConfigured`, which the engine treats as a degraded collaborator
//! rather than a fatal error.

use researchpipe_core::{Error, LlmClient, Message, Result, Role};
use serde::{Deserialize, Serialize};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = env("RESEARCHPIPE_OPENAI_COMPAT_BASE_URL").ok_or_else(|| {
            Error::NotConfigured("missing RESEARCHPIPE_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        let api_key = env("RESEARCHPIPE_OPENAI_COMPAT_API_KEY");
        let model = model_override
            .or_else(|| env("RESEARCHPIPE_OPENAI_COMPAT_MODEL"))
            .ok_or_else(|| {
                Error::NotConfigured("missing RESEARCHPIPE_OPENAI_COMPAT_MODEL".to_string())
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }

    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, messages: &[Message], max_tokens: Option<u64>) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: role_str(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens,
            stream: Some(false),
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited("chat.completions HTTP 429".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Llm(format!("chat.completions HTTP {status}")));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}
