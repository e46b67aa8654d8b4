use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible endpoint, overridable via configuration.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// One chat message in a structured request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Raw material of one successful structured call, kept verbatim for the
/// audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCall {
    pub request_json: String,
    pub http_status: u16,
    pub response_json: String,
    /// Text content extracted from the first choice; the schema-constrained
    /// JSON document the caller parses.
    pub extracted_content: String,
}

/// Failure class of one structured call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Request never produced an HTTP response (connect, timeout, body read)
    Transport,
    /// Provider answered with a non-2xx status
    Http,
    /// 2xx response whose body is unusable (bad JSON, empty choices, refusal)
    Payload,
}

/// Error from one structured call. Carries whatever request/response material
/// was available at the point of failure so the attempt stays auditable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    pub request_json: String,
    pub http_status: Option<u16>,
    pub response_json: String,
}

/// One provider call constrained to a named JSON schema.
///
/// Implementations never retry; the classification units own the retry
/// budget. Stub implementations back the unit and orchestrator tests.
pub trait StructuredGateway {
    fn call_structured(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: serde_json::Value,
    ) -> impl Future<Output = Result<StructuredCall, GatewayError>> + Send;
}

/// Configuration for the OpenAI-compatible client.
///
/// Endpoint, key, and timeout are injected here and nowhere else; no
/// credential is ever compiled into the binary.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Read configuration from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }
}

/// OpenAI-compatible chat-completions client with strict JSON-schema output.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn gateway_error(
        kind: GatewayErrorKind,
        message: String,
        request_json: &str,
        http_status: Option<u16>,
        response_json: &str,
    ) -> GatewayError {
        GatewayError {
            kind,
            message,
            request_json: request_json.to_string(),
            http_status,
            response_json: if response_json.is_empty() {
                "{}".to_string()
            } else {
                response_json.to_string()
            },
        }
    }
}

impl StructuredGateway for OpenAiClient {
    async fn call_structured(
        &self,
        model: &str,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<StructuredCall, GatewayError> {
        let request_body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": 0,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "strict": true,
                    "schema": schema,
                },
            },
        });
        let request_json = request_body.to_string();

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .header("content-type", "application/json")
            .body(request_json.clone())
            .send()
            .await
            .map_err(|e| {
                Self::gateway_error(
                    GatewayErrorKind::Transport,
                    format!("send request: {e}"),
                    &request_json,
                    None,
                    "",
                )
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            Self::gateway_error(
                GatewayErrorKind::Transport,
                format!("read response: {e}"),
                &request_json,
                Some(status),
                "",
            )
        })?;

        if !(200..300).contains(&status) {
            return Err(Self::gateway_error(
                GatewayErrorKind::Http,
                format!("provider status={status} schema={schema_name}"),
                &request_json,
                Some(status),
                &body,
            ));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Self::gateway_error(
                GatewayErrorKind::Payload,
                format!("parse response: {e}"),
                &request_json,
                Some(status),
                &body,
            )
        })?;
        let Some(choice) = parsed.choices.first() else {
            return Err(Self::gateway_error(
                GatewayErrorKind::Payload,
                "empty choices".to_string(),
                &request_json,
                Some(status),
                &body,
            ));
        };

        if let Some(refusal) = choice
            .message
            .refusal
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
        {
            return Err(Self::gateway_error(
                GatewayErrorKind::Payload,
                format!("model refusal schema={schema_name} reason={refusal}"),
                &request_json,
                Some(status),
                &body,
            ));
        }

        let content = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(Self::gateway_error(
                GatewayErrorKind::Payload,
                format!("empty content schema={schema_name}"),
                &request_json,
                Some(status),
                &body,
            ));
        }

        Ok(StructuredCall {
            request_json,
            http_status: status,
            response_json: body,
            extracted_content: content.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = OpenAiConfig::new("key", "http://localhost:9999/");
        assert_eq!(config.base_url, "http://localhost:9999");
    }

    #[test]
    fn test_parse_completion_response() {
        let body = r#"{
            "choices": [
                {"message": {"content": "{\"confidence\": 0.7}", "refusal": null}}
            ]
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"confidence\": 0.7}")
        );
        assert!(parsed.choices[0].message.refusal.is_none());
    }
}
