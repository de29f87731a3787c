//! The two seams the engine depends on: durable entity storage and model
//! provider transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{Agent, ConversationMessage, Meeting, ModelParameters};
use crate::providers::ProviderError;

/// Durable load/save/delete of agents and meetings as whole documents.
///
/// Required guarantees: a successful save followed by a load returns an
/// equivalent entity, and `save_meeting` is atomic per meeting: readers see
/// either the pre-save or post-save snapshot, never a torn one. The engine's
/// per-meeting lock ensures it never issues overlapping writes for one
/// meeting; implementations must tolerate concurrent access for *distinct*
/// ids.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn save_agent(&self, agent: &Agent) -> anyhow::Result<()>;
    async fn load_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>>;
    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>>;
    async fn delete_agent(&self, agent_id: &str) -> anyhow::Result<()>;

    async fn save_meeting(&self, meeting: &Meeting) -> anyhow::Result<()>;
    async fn load_meeting(&self, meeting_id: &str) -> anyhow::Result<Option<Meeting>>;
    async fn list_meetings(&self) -> anyhow::Result<Vec<Meeting>>;
    async fn delete_meeting(&self, meeting_id: &str) -> anyhow::Result<()>;
}

/// A non-streaming completion: final text plus any separately reported
/// chain-of-thought.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub reasoning_content: Option<String>,
}

/// One element of a streaming model response.
///
/// A well-formed stream is a finite sequence of `Reasoning`/`Content` deltas
/// terminated by exactly one `Complete` or `Error`. The serialized shape
/// (`{"type": ..., "content": ...}`) is what the boundary forwards on its SSE
/// channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamDelta {
    Reasoning(String),
    Content(String),
    Complete,
    Error(String),
}

/// Receiver half of a streaming response. Dropping it cancels the underlying
/// HTTP stream promptly (the producer task exits on the next failed send).
pub type DeltaStream = mpsc::Receiver<StreamDelta>;

/// Model provider — sends a composed prompt context to an LLM and returns
/// the response, blocking or streamed.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// One-shot chat completion.
    async fn complete(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<Completion, ProviderError>;

    /// Streaming chat completion. The returned channel is finite and not
    /// restartable.
    async fn stream(
        &self,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
    ) -> Result<DeltaStream, ProviderError>;

    /// Cheap connectivity probe (1-token request).
    async fn test_connection(&self) -> Result<(), ProviderError>;
}
