use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use zeroize::Zeroize;

use crate::models::{ConversationMessage, ConversationRole, ModelParameters};
use crate::providers::sse::DataLineBuffer;
use crate::providers::{ProviderError, DELTA_CHANNEL_CAPACITY};
use crate::traits::{Completion, DeltaStream, ModelAdapter, StreamDelta};

/// Adapter for the Google GenAI (Gemini) API.
pub struct GoogleAdapter {
    client: Client,
    stream_client: Client,
    base_url: String,
    api_key: String,
    model_name: String,
}

impl Drop for GoogleAdapter {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl GoogleAdapter {
    pub const BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    pub fn new(base_url: &str, api_key: &str, model_name: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::build_http_client(super::COMPLETE_TIMEOUT)?,
            stream_client: super::build_http_client(super::STREAM_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_name: model_name.to_string(),
        })
    }

    /// Convert to Gemini "contents" + "system_instruction". Conversation
    /// system entries append to the instruction parts.
    fn build_body(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Value {
        let mut instruction_parts = vec![json!({ "text": system_prompt })];
        let mut contents = Vec::new();

        for msg in conversation {
            match msg.role {
                ConversationRole::System => {
                    instruction_parts.push(json!({ "text": msg.content }));
                }
                ConversationRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": msg.content }]
                })),
                ConversationRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{ "text": msg.content }]
                })),
            }
        }

        let mut body = json!({
            "contents": contents,
            "system_instruction": { "parts": instruction_parts },
        });

        if let Some(params) = parameters {
            let mut config = serde_json::Map::new();
            if let Some(t) = params.temperature {
                config.insert("temperature".to_string(), json!(t));
            }
            if let Some(m) = params.max_tokens {
                config.insert("maxOutputTokens".to_string(), json!(m));
            }
            if let Some(p) = params.top_p {
                config.insert("topP".to_string(), json!(p));
            }
            if !config.is_empty() {
                body["generationConfig"] = Value::Object(config);
            }
        }
        body
    }

    async fn post(
        &self,
        client: &Client,
        url: String,
        body: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Google GenAI HTTP request failed: {}", e);
                ProviderError::network(&e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "Google GenAI API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Split one response chunk into (reasoning, content) text. Gemini marks
    /// chain-of-thought parts with `"thought": true`.
    fn split_parts(data: &Value) -> (String, String) {
        let mut reasoning = String::new();
        let mut content = String::new();
        if let Some(parts) = data["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if part["thought"].as_bool().unwrap_or(false) {
                        reasoning.push_str(text);
                    } else {
                        content.push_str(text);
                    }
                }
            }
        }
        (reasoning, content)
    }
}

#[async_trait]
impl ModelAdapter for GoogleAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<Completion, ProviderError> {
        let body = self.build_body(system_prompt, conversation, parameters);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model_name);
        info!(model = %self.model_name, url_prefix = %self.base_url, "Calling Google GenAI");

        let resp = self.post(&self.client, url, &body).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::network(&e))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::stream(format!("unparseable response body: {}", e)))?;

        let (reasoning, content) = Self::split_parts(&data);
        Ok(Completion {
            content,
            reasoning_content: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            },
        })
    }

    async fn stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<DeltaStream, ProviderError> {
        use futures::StreamExt;

        let body = self.build_body(system_prompt, conversation, parameters);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model_name
        );
        info!(model = %self.model_name, url_prefix = %self.base_url, "Streaming Google GenAI");

        let resp = self.post(&self.stream_client, url, &body).await?;
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut lines = DataLineBuffer::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamDelta::Error(e.to_string())).await;
                        return;
                    }
                };
                for payload in lines.push(&chunk) {
                    let data: Value = match serde_json::from_str(&payload) {
                        Ok(d) => d,
                        Err(e) => {
                            debug!("skipping malformed stream chunk: {}", e);
                            continue;
                        }
                    };
                    let (reasoning, content) = Self::split_parts(&data);
                    if !reasoning.is_empty()
                        && tx.send(StreamDelta::Reasoning(reasoning)).await.is_err()
                    {
                        return;
                    }
                    if !content.is_empty() && tx.send(StreamDelta::Content(content)).await.is_err()
                    {
                        return;
                    }
                }
            }
            let _ = tx.send(StreamDelta::Complete).await;
        });

        Ok(rx)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let probe = [ConversationMessage::new(ConversationRole::User, "Hello")];
        let params = ModelParameters {
            max_tokens: Some(5),
            ..Default::default()
        };
        self.complete("You are a helpful assistant.", &probe, Some(&params))
            .await?;
        Ok(())
    }
}
