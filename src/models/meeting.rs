use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

use super::{Agent, MeetingMinutes, Message, MindMap, SpeakerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingOrder {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionStyle {
    #[default]
    Formal,
    Casual,
    Debate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingLength {
    Brief,
    Moderate,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Active,
    Paused,
    Ended,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

/// Who guides the meeting. Only affects prompt composition and selector
/// defaults, never persistence rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Moderator {
    User,
    Agent(String),
}

impl Moderator {
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::User => None,
            Self::Agent(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl AgendaItem {
    pub fn validate(&self) -> CoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(CoreError::validation("title", "Agenda title cannot be empty"));
        }
        if self.title.chars().count() > 200 {
            return Err(CoreError::validation(
                "title",
                "Agenda title must be 200 characters or less",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeetingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<usize>,
    #[serde(default)]
    pub speaking_order: SpeakingOrder,
    #[serde(default)]
    pub discussion_style: DiscussionStyle,
    /// Participant id → preferred speaking length.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub speaking_length_preferences: HashMap<String, SpeakingLength>,
    /// Overrides the default minutes-generation system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes_prompt: Option<String>,
}

/// The central aggregate. Owns its messages, minutes versions and mind-map;
/// all mutation goes through engine operations under the per-meeting lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub topic: String,
    /// Agent snapshots captured at creation time.
    pub participants: Vec<Agent>,
    pub moderator: Moderator,
    pub status: MeetingStatus,
    pub config: MeetingConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agenda: Vec<AgendaItem>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// 0-origin; advances when every participant has spoken in the round.
    #[serde(default)]
    pub current_round: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minutes_history: Vec<MeetingMinutes>,
    /// Id of the latest minutes version, resolved via `minutes_history`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_minutes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mind_map: Option<MindMap>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    pub fn validate(&self) -> CoreResult<()> {
        if self.topic.trim().is_empty() {
            return Err(CoreError::validation("topic", "Meeting topic cannot be empty"));
        }
        if self.topic.chars().count() > 200 {
            return Err(CoreError::validation(
                "topic",
                "Meeting topic must be 200 characters or less",
            ));
        }
        if self.participants.is_empty() {
            return Err(CoreError::validation(
                "participants",
                "Meeting must have at least one participant",
            ));
        }
        if let Moderator::Agent(id) = &self.moderator {
            if self.participant(id).is_none() {
                return Err(CoreError::validation(
                    "moderator",
                    format!("Moderator {} is not a participant", id),
                ));
            }
        }
        Ok(())
    }

    pub fn participant(&self, agent_id: &str) -> Option<&Agent> {
        self.participants.iter().find(|p| p.id == agent_id)
    }

    /// Latest minutes version, if any.
    pub fn latest_minutes(&self) -> Option<&MeetingMinutes> {
        let id = self.current_minutes.as_deref()?;
        self.minutes_history.iter().find(|m| m.id == id)
    }

    /// Display name for the moderator line in prompt context.
    pub fn moderator_name(&self) -> String {
        match &self.moderator {
            Moderator::User => "user".to_string(),
            Moderator::Agent(id) => self
                .participant(id)
                .map(|a| a.name.clone())
                .unwrap_or_else(|| id.clone()),
        }
    }

    pub fn is_moderator(&self, speaker_id: &str) -> bool {
        self.moderator.agent_id() == Some(speaker_id)
    }

    /// Timestamp for the next appended message: the current time, bumped past
    /// the previous message so per-meeting timestamps stay strictly
    /// non-decreasing even under coarse clocks.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.messages.last() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::milliseconds(1),
            _ => now,
        }
    }

    /// Participant ids that have produced an agent message in the current
    /// round window.
    pub fn speakers_in_current_round(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .filter(|m| m.round_number == self.current_round && m.speaker_type == SpeakerType::Agent)
            .map(|m| m.speaker_id.as_str())
            .collect()
    }

    /// A round is complete once every participant has at least one agent
    /// message in it. User messages interleave freely and never count.
    pub fn round_is_complete(&self) -> bool {
        let spoken = self.speakers_in_current_round();
        self.participants.iter().all(|p| spoken.contains(p.id.as_str()))
    }

    /// Most recent agent message, if any.
    pub fn last_agent_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.speaker_type == SpeakerType::Agent)
    }
}
