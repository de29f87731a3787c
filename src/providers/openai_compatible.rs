use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use zeroize::Zeroize;

use crate::models::{ConversationMessage, ModelParameters};
use crate::providers::sse::DataLineBuffer;
use crate::providers::{ProviderError, DELTA_CHANNEL_CAPACITY};
use crate::traits::{Completion, DeltaStream, ModelAdapter, StreamDelta};

/// Adapter for the OpenAI chat-completions wire format.
///
/// GLM speaks the same format (including `reasoning_content` deltas for its
/// thinking models), so both providers share this adapter with different base
/// URLs.
pub struct OpenAiCompatibleAdapter {
    client: Client,
    stream_client: Client,
    base_url: String,
    api_key: String,
    model_name: String,
}

impl Drop for OpenAiCompatibleAdapter {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl OpenAiCompatibleAdapter {
    pub const OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const GLM_BASE_URL: &'static str = "https://open.bigmodel.cn/api/paas/v4";

    pub fn new(base_url: &str, api_key: &str, model_name: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::build_http_client(super::COMPLETE_TIMEOUT)?,
            stream_client: super::build_http_client(super::STREAM_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_name: model_name.to_string(),
        })
    }

    fn build_body(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
        stream: bool,
    ) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        for msg in conversation {
            messages.push(json!({ "role": msg.role.as_str(), "content": msg.content }));
        }

        let mut body = json!({
            "model": self.model_name,
            "messages": messages,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(params) = parameters {
            if let Some(t) = params.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(m) = params.max_tokens {
                body["max_tokens"] = json!(m);
            }
            if let Some(p) = params.top_p {
                body["top_p"] = json!(p);
            }
        }
        body
    }

    async fn post_chat(&self, client: &Client, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let resp = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.base_url, "chat-completions request failed: {}", e);
                ProviderError::network(&e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "chat-completions API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Extract the reasoning/content deltas carried by one streamed chunk.
    fn deltas_from_chunk(data: &Value) -> Vec<StreamDelta> {
        let mut out = Vec::new();
        let delta = &data["choices"][0]["delta"];
        if let Some(reasoning) = delta["reasoning_content"].as_str() {
            if !reasoning.is_empty() {
                out.push(StreamDelta::Reasoning(reasoning.to_string()));
            }
        }
        if let Some(content) = delta["content"].as_str() {
            if !content.is_empty() {
                out.push(StreamDelta::Content(content.to_string()));
            }
        }
        out
    }
}

#[async_trait]
impl ModelAdapter for OpenAiCompatibleAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<Completion, ProviderError> {
        let body = self.build_body(system_prompt, conversation, parameters, false);
        info!(model = %self.model_name, url = %self.base_url, "Calling chat-completions");

        let resp = self.post_chat(&self.client, &body).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::network(&e))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::stream(format!("unparseable response body: {}", e)))?;

        let message = &data["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or_default().to_string();
        let reasoning_content = message["reasoning_content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Completion {
            content,
            reasoning_content,
        })
    }

    async fn stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<DeltaStream, ProviderError> {
        use futures::StreamExt;

        let body = self.build_body(system_prompt, conversation, parameters, true);
        info!(model = %self.model_name, url = %self.base_url, "Streaming chat-completions");

        let resp = self.post_chat(&self.stream_client, &body).await?;
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
                    if payload == "[DONE]" {
                        let _ = tx.send(StreamDelta::Complete).await;
                        return;
                    }
                    let data: Value = match serde_json::from_str(&payload) {
                        Ok(d) => d,
                        Err(e) => {
                            debug!("skipping malformed stream chunk: {}", e);
                            continue;
                        }
                    };
                    for delta in Self::deltas_from_chunk(&data) {
                        if tx.send(delta).await.is_err() {
                            // Consumer gone (cancelled); drop the connection.
                            return;
                        }
                    }
                }
            }
            // Stream ended without a [DONE] marker; still terminal.
            let _ = tx.send(StreamDelta::Complete).await;
        });

        Ok(rx)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let probe = [ConversationMessage::new(
            crate::models::ConversationRole::User,
            "Hello",
        )];
        let params = ModelParameters {
            max_tokens: Some(5),
            ..Default::default()
        };
        self.complete("You are a helpful assistant.", &probe, Some(&params))
            .await?;
        Ok(())
    }
}
