//! HTTP gateway against an OpenAI-style chat-completions endpoint.
//!
//! The request carries the full turn history; when a response contract is
//! supplied the contract instruction is prepended as a system turn and JSON
//! output mode is requested. A bounded request timeout maps to
//! `UpstreamUnavailable`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    ChatRole, ChatTurn, GatewayError, GatewayReply, LanguageGateway, ResponseContract,
};

/// Connection settings for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpGatewayConfig {
    /// Chat-completions endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier passed through to the service
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key (never stored in config)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Bounded wait for one completion, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "CASELINE_API_KEY".to_string()
}
fn default_timeout() -> u64 {
    30
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// Reqwest-backed gateway.
pub struct HttpGateway {
    config: HttpGatewayConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// Response envelope from the completions endpoint.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
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

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn wire_role(role: ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    fn build_messages(
        history: &[ChatTurn],
        contract: Option<&ResponseContract>,
    ) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(contract) = contract {
            messages.push(json!({
                "role": "system",
                "content": contract.instruction(),
            }));
        }
        for turn in history {
            messages.push(json!({
                "role": Self::wire_role(turn.role),
                "content": turn.text,
            }));
        }
        messages
    }
}

#[async_trait]
impl LanguageGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(
        &self,
        history: &[ChatTurn],
        contract: Option<&ResponseContract>,
    ) -> Result<GatewayReply, GatewayError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": Self::build_messages(history, contract),
        });
        if contract.is_some() {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // Timeouts and connection failures both land here.
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::UpstreamUnavailable(format!(
                "completion endpoint returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| {
                GatewayError::MalformedResponse("completion had no message content".into())
            })?;

        match contract {
            Some(contract) => Ok(GatewayReply::Structured(contract.parse(&content)?)),
            None => Ok(GatewayReply::Text(content)),
        }
    }
}
