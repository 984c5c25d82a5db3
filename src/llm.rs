use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{config::{mask, Endpoint}, error::UpstreamError};

/// Text plus the untouched upstream payload kept for the audit trail.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub text: String,
    pub payload: Value,
}

// Shortens base64 image data inside request/response JSON before logging.
pub(crate) fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "url" || key == "image" {
                    if let Value::String(s) = val {
                        if s.starts_with("data:") && s.len() > 100 {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(truncate_base64_in_json),
        _ => {}
    }
}

pub fn http_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        error!("Falling back to default HTTP client: {}", e);
        Client::new()
    })
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (xAI, DeepSeek).
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: Endpoint,
    model: String,
}

pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatClient {
    pub fn new(client: Client, endpoint: Endpoint, model: impl Into<String>) -> Self {
        Self { client, endpoint, model: model.into() }
    }

    pub async fn complete(&self, messages: Value, options: ChatOptions) -> Result<RawResponse, UpstreamError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let mut body = json!({ "model": self.model, "messages": messages, "stream": false });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = options.max_tokens {
            body["max_tokens"] = json!(m);
        }

        let mut logged = body.clone();
        truncate_base64_in_json(&mut logged);
        info!("🔗 POST {} model={} key={}", url, self.model, mask(&self.endpoint.api_key));
        tracing::debug!("📤 Request body: {}", logged);

        let response = self.client.post(&url).bearer_auth(&self.endpoint.api_key).json(&body).send().await?;
        let status = response.status();
        let response_text = response.text().await?;
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            error!("❌ {} API error response: {}", self.model, response_text);
            return Err(UpstreamError::Status { status: status.as_u16(), body: response_text });
        }

        let payload: Value = serde_json::from_str(&response_text)
            .map_err(|e| UpstreamError::Parse(format!("{}: {}", e, response_text)))?;
        let parsed: ChatResponse = serde_json::from_value(payload.clone())
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::Empty(format!("no content from {}", self.model)))?;

        Ok(RawResponse { text, payload })
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Message,
}

#[derive(Debug, Deserialize, Default)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn data_uris_are_truncated_for_logging() {
        let long = format!("data:image/jpeg;base64,{}", "A".repeat(500));
        let mut v = json!({"messages": [{"content": [{"type": "image_url", "image_url": {"url": long}}]}]});
        truncate_base64_in_json(&mut v);
        let url = v["messages"][0]["content"][0]["image_url"]["url"].as_str().unwrap();
        assert!(url.contains("[truncated"));
        assert!(url.len() < 100);
    }

    #[test]
    fn plain_urls_are_left_alone() {
        let mut v = json!({"url": "https://example.com/a.png"});
        truncate_base64_in_json(&mut v);
        assert_eq!(v["url"], "https://example.com/a.png");
    }

    #[test]
    fn chat_response_tolerates_missing_fields() {
        let parsed: ChatResponse = serde_json::from_value(json!({"choices": [{"message": {}}, {"message": {"content": "hi"}}]})).unwrap();
        assert_eq!(parsed.choices.into_iter().find_map(|c| c.message.content), Some("hi".to_string()));
    }
}
