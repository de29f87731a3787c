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

const API_VERSION: &str = "2023-06-01";
/// The messages API requires max_tokens; used when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for the Anthropic messages API.
pub struct AnthropicAdapter {
    client: Client,
    stream_client: Client,
    base_url: String,
    api_key: String,
    model_name: String,
}

impl Drop for AnthropicAdapter {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl AnthropicAdapter {
    pub const BASE_URL: &'static str = "https://api.anthropic.com/v1";

    pub fn new(base_url: &str, api_key: &str, model_name: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            client: super::build_http_client(super::COMPLETE_TIMEOUT)?,
            stream_client: super::build_http_client(super::STREAM_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_name: model_name.to_string(),
        })
    }

    /// The messages API takes the system prompt as a separate parameter and
    /// requires user/assistant turns to alternate starting with user, so
    /// system entries fold into the system text, adjacent same-role turns
    /// merge, and a neutral user turn leads when the transcript starts with
    /// an assistant (or is empty).
    fn convert_conversation(
        system_prompt: &str,
        conversation: &[ConversationMessage],
    ) -> (String, Vec<Value>) {
        let mut system = system_prompt.to_string();
        let mut messages: Vec<(ConversationRole, String)> = Vec::new();

        for msg in conversation {
            match msg.role {
                ConversationRole::System => {
                    system.push_str("\n\n");
                    system.push_str(&msg.content);
                }
                role => match messages.last_mut() {
                    Some((last_role, text)) if *last_role == role => {
                        text.push_str("\n\n");
                        text.push_str(&msg.content);
                    }
                    _ => messages.push((role, msg.content.clone())),
                },
            }
        }

        if !matches!(messages.first(), Some((ConversationRole::User, _))) {
            messages.insert(
                0,
                (
                    ConversationRole::User,
                    "(The discussion continues below.)".to_string(),
                ),
            );
        }

        let messages = messages
            .into_iter()
            .map(|(role, content)| json!({ "role": role.as_str(), "content": content }))
            .collect();
        (system, messages)
    }

    fn build_body(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
        stream: bool,
    ) -> Value {
        let (system, messages) = Self::convert_conversation(system_prompt, conversation);
        let mut body = json!({
            "model": self.model_name,
            "system": system,
            "messages": messages,
            "max_tokens": parameters
                .and_then(|p| p.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(params) = parameters {
            if let Some(t) = params.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(p) = params.top_p {
                body["top_p"] = json!(p);
            }
        }
        body
    }

    async fn post_messages(
        &self,
        client: &Client,
        body: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Anthropic HTTP request failed: {}", e);
                ProviderError::network(&e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = %status, "Anthropic API error: {}", text);
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }
        Ok(resp)
    }

    /// Map one streamed event payload to deltas. `None` means the stream is
    /// finished.
    fn deltas_from_event(data: &Value) -> Option<Vec<StreamDelta>> {
        match data["type"].as_str().unwrap_or_default() {
            "message_stop" => None,
            "error" => Some(vec![StreamDelta::Error(
                data["error"]["message"]
                    .as_str()
                    .unwrap_or("provider stream error")
                    .to_string(),
            )]),
            "content_block_delta" => {
                let delta = &data["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamDelta::Content(t.to_string())]),
                    "thinking_delta" => delta["thinking"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamDelta::Reasoning(t.to_string())]),
                    _ => Some(vec![]),
                }
                .or(Some(vec![]))
            }
            _ => Some(vec![]),
        }
    }
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<Completion, ProviderError> {
        let body = self.build_body(system_prompt, conversation, parameters, false);
        info!(model = %self.model_name, url = %self.base_url, "Calling Anthropic");

        let resp = self.post_messages(&self.client, &body).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::network(&e))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::stream(format!("unparseable response body: {}", e)))?;

        let mut content = String::new();
        let mut reasoning = String::new();
        if let Some(blocks) = data["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or_default() {
                    "text" => content.push_str(block["text"].as_str().unwrap_or_default()),
                    "thinking" => reasoning.push_str(block["thinking"].as_str().unwrap_or_default()),
                    _ => {}
                }
            }
        }

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

        let body = self.build_body(system_prompt, conversation, parameters, true);
        info!(model = %self.model_name, url = %self.base_url, "Streaming Anthropic");

        let resp = self.post_messages(&self.stream_client, &body).await?;
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
                            debug!("skipping malformed stream event: {}", e);
                            continue;
                        }
                    };
                    match Self::deltas_from_event(&data) {
                        None => {
                            let _ = tx.send(StreamDelta::Complete).await;
                            return;
                        }
                        Some(deltas) => {
                            for delta in deltas {
                                let terminal = matches!(delta, StreamDelta::Error(_));
                                if tx.send(delta).await.is_err() || terminal {
                                    return;
                                }
                            }
                        }
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
