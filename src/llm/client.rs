//! OpenAI-compatible chat-completions client.
//!
//! Speaks `/v1/chat/completions` against any compatible provider; the
//! default configuration targets Groq. Requests are single-turn (one system
//! prompt, one user prompt) and responses are reduced to the assistant's
//! text content.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::config::GenConfig;
use super::types::{GenError, Generate};

pub struct GenClient {
    http: reqwest::Client,
    config: GenConfig,
}

impl GenClient {
    /// # Errors
    ///
    /// `HttpClientBuild` when the underlying client cannot be constructed.
    pub fn new(config: GenConfig) -> Result<Self, GenError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| GenError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, config })
    }

    async fn send_json(&self, path: &str, body: &impl Serialize) -> Result<String, GenError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenError::ApiRequest(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GenError::ApiRequest(e.to_string()))?;
        if status != 200 {
            return Err(GenError::ApiResponse { status, body: text });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Generate for GenClient {
    async fn complete(&self, max_tokens: u32, system: &str, prompt: &str) -> Result<String, GenError> {
        let messages = build_messages(system, prompt);
        let body = CcRequest { model: &self.config.model, max_tokens, messages: &messages };
        let text = self.send_json("/chat/completions", &body).await?;
        parse_completion_response(&text)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Serialize)]
struct CcRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [CcMessage<'a>],
}

#[derive(Serialize)]
struct CcMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn build_messages<'a>(system: &'a str, prompt: &'a str) -> Vec<CcMessage<'a>> {
    let mut out = Vec::with_capacity(2);
    if !system.trim().is_empty() {
        out.push(CcMessage { role: "system", content: system });
    }
    out.push(CcMessage { role: "user", content: prompt });
    out
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

pub(crate) fn parse_completion_response(json_text: &str) -> Result<String, GenError> {
    let root: Value = serde_json::from_str(json_text).map_err(|e| GenError::ApiParse(e.to_string()))?;

    let Some(choice) = root
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
    else {
        return Err(GenError::ApiParse("chat_completions: missing choices[0]".to_string()));
    };

    let Some(text) = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    else {
        return Err(GenError::ApiParse("chat_completions: missing message content".to_string()));
    };

    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_response() {
        let json = serde_json::json!({
            "model": "llama-3.3-70b-versatile",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "{\"title\":\"Quiz\"}" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        })
        .to_string();
        assert_eq!(parse_completion_response(&json).unwrap(), "{\"title\":\"Quiz\"}");
    }

    #[test]
    fn parse_missing_choices() {
        let json = serde_json::json!({ "model": "llama-3.3-70b-versatile", "choices": [] }).to_string();
        assert!(parse_completion_response(&json).is_err());
    }

    #[test]
    fn parse_null_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        })
        .to_string();
        assert!(parse_completion_response(&json).is_err());
    }

    #[test]
    fn system_prompt_omitted_when_blank() {
        let messages = build_messages("  ", "hello");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }
}
