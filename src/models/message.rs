use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Hard cap on user-authored message content, in characters.
pub const USER_MESSAGE_MAX_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerType {
    User,
    Agent,
}

/// An `@`-mention resolved to a meeting participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub mentioned_participant_id: String,
    pub mentioned_participant_name: String,
    /// Id of the message carrying this mention.
    pub message_id: String,
}

/// One utterance in a meeting. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub speaker_id: String,
    pub speaker_name: String,
    pub speaker_type: SpeakerType,
    pub content: String,
    /// Chain-of-thought captured separately by some providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub round_number: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Mention>,
}

impl Message {
    pub fn validate(&self) -> CoreResult<()> {
        if self.content.trim().is_empty() {
            return Err(CoreError::validation(
                "content",
                "Message content cannot be empty or whitespace only",
            ));
        }
        Ok(())
    }
}

/// Role taxonomy a provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    System,
    User,
    Assistant,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the prompt conversation handed to a model adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: ConversationRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
