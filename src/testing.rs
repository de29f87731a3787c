//! Test infrastructure: scripted model adapters and a scripted factory.
//!
//! Provides everything needed to exercise the real engine without network
//! access: adapters that replay a FIFO queue of responses (blocking or
//! streamed) and record every call they receive.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::models::{ConversationMessage, ModelConfig, ModelParameters};
use crate::providers::{AdapterFactory, ProviderError};
use crate::traits::{Completion, DeltaStream, ModelAdapter, StreamDelta};

/// A recorded call to a [`ScriptedAdapter`].
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub system_prompt: String,
    pub conversation: Vec<ConversationMessage>,
    pub streaming: bool,
}

/// One scripted outcome, consumed front-to-back.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Plain content; streams as a single content delta plus `Complete`.
    Text(String),
    /// Content with separate reasoning.
    TextWithReasoning { content: String, reasoning: String },
    /// Exact delta sequence to stream. For `complete()` the deltas are
    /// assembled into content/reasoning text.
    Deltas(Vec<StreamDelta>),
    /// Stream the deltas, then hang until the consumer drops the stream.
    /// Used to exercise cancellation.
    DeltasThenHang(Vec<StreamDelta>),
    /// Fail the call.
    Error(ProviderError),
}

/// Model adapter that replays scripted responses and records calls.
pub struct ScriptedAdapter {
    responses: Mutex<Vec<ScriptedResponse>>,
    pub call_log: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedAdapter {
    /// An adapter that always answers "Scripted response".
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_log: Mutex::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.call_log.lock().await.len()
    }

    async fn record(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        streaming: bool,
    ) {
        self.call_log.lock().await.push(ScriptedCall {
            system_prompt: system_prompt.to_string(),
            conversation: conversation.to_vec(),
            streaming,
        });
    }

    async fn next_response(&self) -> ScriptedResponse {
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            ScriptedResponse::Text("Scripted response".to_string())
        } else {
            responses.remove(0)
        }
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn assemble(deltas: &[StreamDelta]) -> Completion {
    let mut content = String::new();
    let mut reasoning = String::new();
    for delta in deltas {
        match delta {
            StreamDelta::Content(text) => content.push_str(text),
            StreamDelta::Reasoning(text) => reasoning.push_str(text),
            StreamDelta::Complete | StreamDelta::Error(_) => {}
        }
    }
    Completion {
        content,
        reasoning_content: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        _parameters: Option<&ModelParameters>,
    ) -> Result<Completion, ProviderError> {
        self.record(system_prompt, conversation, false).await;
        match self.next_response().await {
            ScriptedResponse::Text(content) => Ok(Completion {
                content,
                reasoning_content: None,
            }),
            ScriptedResponse::TextWithReasoning { content, reasoning } => Ok(Completion {
                content,
                reasoning_content: Some(reasoning),
            }),
            ScriptedResponse::Deltas(deltas) | ScriptedResponse::DeltasThenHang(deltas) => {
                Ok(assemble(&deltas))
            }
            ScriptedResponse::Error(err) => Err(err),
        }
    }

    async fn stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        _parameters: Option<&ModelParameters>,
    ) -> Result<DeltaStream, ProviderError> {
        self.record(system_prompt, conversation, true).await;
        let response = self.next_response().await;
        let (tx, rx) = mpsc::channel(16);
        match response {
            ScriptedResponse::Text(content) => {
                tokio::spawn(async move {
                    let _ = tx.send(StreamDelta::Content(content)).await;
                    let _ = tx.send(StreamDelta::Complete).await;
                });
            }
            ScriptedResponse::TextWithReasoning { content, reasoning } => {
                tokio::spawn(async move {
                    let _ = tx.send(StreamDelta::Reasoning(reasoning)).await;
                    let _ = tx.send(StreamDelta::Content(content)).await;
                    let _ = tx.send(StreamDelta::Complete).await;
                });
            }
            ScriptedResponse::Deltas(deltas) => {
                tokio::spawn(async move {
                    for delta in deltas {
                        if tx.send(delta).await.is_err() {
                            return;
                        }
                    }
                });
            }
            ScriptedResponse::DeltasThenHang(deltas) => {
                tokio::spawn(async move {
                    for delta in deltas {
                        if tx.send(delta).await.is_err() {
                            return;
                        }
                    }
                    // Hold the channel open until the consumer goes away.
                    tx.closed().await;
                });
            }
            ScriptedResponse::Error(err) => return Err(err),
        }
        Ok(rx)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Factory that hands out scripted adapters keyed by `model_name`, falling
/// back to a shared default adapter for anything unkeyed.
pub struct ScriptedFactory {
    by_model: std::sync::Mutex<HashMap<String, Arc<ScriptedAdapter>>>,
    default: Arc<ScriptedAdapter>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            by_model: std::sync::Mutex::new(HashMap::new()),
            default: Arc::new(ScriptedAdapter::new()),
        }
    }

    /// Register (or replace) the adapter used for a model name. Returns the
    /// adapter for scripting and inspection.
    pub fn register(&self, model_name: &str, adapter: ScriptedAdapter) -> Arc<ScriptedAdapter> {
        let adapter = Arc::new(adapter);
        self.by_model
            .lock()
            .expect("factory mutex poisoned")
            .insert(model_name.to_string(), adapter.clone());
        adapter
    }

    pub fn default_adapter(&self) -> Arc<ScriptedAdapter> {
        self.default.clone()
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for ScriptedFactory {
    fn adapter_for(&self, config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
        let adapter = self
            .by_model
            .lock()
            .expect("factory mutex poisoned")
            .get(&config.model_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationRole;

    #[tokio::test]
    async fn test_fifo_responses_then_default() {
        let adapter = ScriptedAdapter::with_responses(vec![
            ScriptedResponse::Text("first".to_string()),
            ScriptedResponse::Text("second".to_string()),
        ]);
        let conv = [ConversationMessage::new(ConversationRole::User, "hi")];
        assert_eq!(adapter.complete("s", &conv, None).await.unwrap().content, "first");
        assert_eq!(adapter.complete("s", &conv, None).await.unwrap().content, "second");
        assert_eq!(
            adapter.complete("s", &conv, None).await.unwrap().content,
            "Scripted response"
        );
        assert_eq!(adapter.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_streamed_script_terminates() {
        let adapter = ScriptedAdapter::with_responses(vec![ScriptedResponse::Deltas(vec![
            StreamDelta::Reasoning("hmm".to_string()),
            StreamDelta::Content("hi".to_string()),
            StreamDelta::Complete,
        ])]);
        let mut rx = adapter.stream("s", &[], None).await.unwrap();
        assert_eq!(rx.recv().await, Some(StreamDelta::Reasoning("hmm".to_string())));
        assert_eq!(rx.recv().await, Some(StreamDelta::Content("hi".to_string())));
        assert_eq!(rx.recv().await, Some(StreamDelta::Complete));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_deltas_assemble_for_blocking_calls() {
        let adapter = ScriptedAdapter::with_responses(vec![ScriptedResponse::Deltas(vec![
            StreamDelta::Reasoning("r".to_string()),
            StreamDelta::Content("a".to_string()),
            StreamDelta::Content("b".to_string()),
            StreamDelta::Complete,
        ])]);
        let completion = adapter.complete("s", &[], None).await.unwrap();
        assert_eq!(completion.content, "ab");
        assert_eq!(completion.reasoning_content.as_deref(), Some("r"));
    }
}
