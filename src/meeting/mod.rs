//! The meeting engine: lifecycle state machine, turn execution, derived
//! artifacts and export.
//!
//! Every read-modify-write runs under the meeting's coordinator lock, so
//! concurrent requests for one meeting queue instead of interleaving. Events
//! are published after the store commit, which makes their order match the
//! append order.

mod export;
mod mind_map;
mod minutes;
mod selector;
mod turn;

pub use export::{MeetingExportFormat, MindMapExportFormat};
pub use selector::{mentioned_participant_ids, select_next_speakers};
pub use turn::{TurnMode, TurnOutcome};

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::coordinator::TurnCoordinator;
use crate::error::{CoreError, CoreResult};
use crate::hub::{EventSubscriber, MeetingEvent, MeetingHub};
use crate::mentions::parse_mentions;
use crate::models::{
    AgendaItem, Meeting, MeetingConfig, MeetingStatus, Mention, Message, Moderator, SpeakerType,
    USER_MESSAGE_MAX_CHARS,
};
use crate::providers::AdapterFactory;
use crate::traits::EntityStore;

/// Who asked for a moderator-gated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    User,
    Agent(String),
}

/// Fields accepted when creating a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub topic: String,
    pub participant_ids: Vec<String>,
    pub moderator: Moderator,
    pub agenda: Vec<NewAgendaItem>,
    pub config: MeetingConfig,
}

#[derive(Debug, Clone)]
pub struct NewAgendaItem {
    pub title: String,
    pub description: String,
}

pub struct MeetingEngine {
    store: Arc<dyn EntityStore>,
    adapters: Arc<dyn AdapterFactory>,
    hub: Arc<MeetingHub>,
    coordinator: TurnCoordinator,
    config: EngineConfig,
}

impl MeetingEngine {
    pub fn new(
        store: Arc<dyn EntityStore>,
        adapters: Arc<dyn AdapterFactory>,
        config: EngineConfig,
    ) -> Self {
        let hub = Arc::new(MeetingHub::new(config.events.subscriber_buffer));
        Self {
            store,
            adapters,
            hub,
            coordinator: TurnCoordinator::new(),
            config,
        }
    }

    pub fn hub(&self) -> Arc<MeetingHub> {
        self.hub.clone()
    }

    pub(crate) fn adapters(&self) -> &Arc<dyn AdapterFactory> {
        &self.adapters
    }

    pub(crate) fn chain_depth_limit(&self) -> u32 {
        self.config.turns.chain_depth_limit
    }

    pub(crate) async fn load_required(&self, meeting_id: &str) -> CoreResult<Meeting> {
        self.store
            .load_meeting(meeting_id)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?
            .ok_or_else(|| CoreError::not_found("meeting", meeting_id))
    }

    pub(crate) async fn save(&self, meeting: &Meeting) -> CoreResult<()> {
        self.store
            .save_meeting(meeting)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))
    }

    pub(crate) fn require_active(meeting: &Meeting, operation: &str) -> CoreResult<()> {
        if meeting.status != MeetingStatus::Active {
            return Err(CoreError::state_conflict(format!(
                "Cannot {} in {} state",
                operation,
                meeting.status.as_str()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Creation / reads / deletion
    // ------------------------------------------------------------------

    pub async fn create_meeting(&self, new_meeting: NewMeeting) -> CoreResult<Meeting> {
        if new_meeting.participant_ids.is_empty() {
            return Err(CoreError::validation(
                "participant_ids",
                "Meeting must have at least one participant",
            ));
        }

        // Snapshot each participant so later registry edits don't rewrite
        // meeting history.
        let mut participants = Vec::with_capacity(new_meeting.participant_ids.len());
        for agent_id in &new_meeting.participant_ids {
            let agent = self
                .store
                .load_agent(agent_id)
                .await
                .map_err(|e| CoreError::persistence(e.to_string()))?
                .ok_or_else(|| CoreError::not_found("agent", agent_id.clone()))?;
            participants.push(agent);
        }

        let now = Utc::now();
        let agenda = new_meeting
            .agenda
            .into_iter()
            .map(|item| AgendaItem {
                id: Uuid::new_v4().to_string(),
                title: item.title,
                description: item.description,
                completed: false,
                created_at: now,
            })
            .collect::<Vec<_>>();
        for item in &agenda {
            item.validate()?;
        }

        let meeting = Meeting {
            id: Uuid::new_v4().to_string(),
            topic: new_meeting.topic.trim().to_string(),
            participants,
            moderator: new_meeting.moderator,
            status: MeetingStatus::Active,
            config: new_meeting.config,
            agenda,
            messages: vec![],
            current_round: 0,
            minutes_history: vec![],
            current_minutes: None,
            mind_map: None,
            created_at: now,
            updated_at: now,
        };
        meeting.validate()?;
        self.save(&meeting).await?;
        info!(meeting_id = %meeting.id, topic = %meeting.topic, "Created meeting");
        Ok(meeting)
    }

    pub async fn get_meeting(&self, meeting_id: &str) -> CoreResult<Meeting> {
        self.load_required(meeting_id).await
    }

    pub async fn list_meetings(&self) -> CoreResult<Vec<Meeting>> {
        self.store
            .list_meetings()
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))
    }

    pub async fn delete_meeting(&self, meeting_id: &str) -> CoreResult<()> {
        // Abort any in-flight turn before queueing for the lock, otherwise a
        // held streaming turn would block the deletion indefinitely.
        self.coordinator.stop(meeting_id).await;
        let _guard = self.coordinator.acquire(meeting_id).await;

        self.load_required(meeting_id).await?;
        self.store
            .delete_meeting(meeting_id)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?;
        self.coordinator.remove(meeting_id).await;
        self.hub.remove_meeting(meeting_id).await;
        info!(meeting_id, "Deleted meeting");
        Ok(())
    }

    /// Subscribe to this meeting's event stream. Events produced before the
    /// subscription are not replayed.
    pub async fn subscribe_events(&self, meeting_id: &str) -> CoreResult<EventSubscriber> {
        self.load_required(meeting_id).await?;
        Ok(self.hub.subscribe(meeting_id).await)
    }

    /// User-issued stop: cancels the in-flight turn (and any chain) for this
    /// meeting. Partial streamed output is discarded, nothing is appended.
    pub async fn stop_turn(&self, meeting_id: &str) {
        self.coordinator.stop(meeting_id).await;
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    /// Start (or resume) a meeting. No-op when already active.
    pub async fn start_meeting(&self, meeting_id: &str) -> CoreResult<()> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        match meeting.status {
            MeetingStatus::Active => Ok(()),
            MeetingStatus::Paused => {
                meeting.status = MeetingStatus::Active;
                meeting.updated_at = Utc::now();
                self.save(&meeting).await?;
                self.hub
                    .publish(
                        meeting_id,
                        MeetingEvent::StatusChange {
                            status: MeetingStatus::Active,
                        },
                    )
                    .await;
                Ok(())
            }
            MeetingStatus::Ended => Err(CoreError::state_conflict("Cannot start an ended meeting")),
        }
    }

    /// Pause a meeting. No-op when already paused.
    pub async fn pause_meeting(&self, meeting_id: &str) -> CoreResult<()> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        match meeting.status {
            MeetingStatus::Paused => Ok(()),
            MeetingStatus::Active => {
                meeting.status = MeetingStatus::Paused;
                meeting.updated_at = Utc::now();
                self.save(&meeting).await?;
                self.hub
                    .publish(
                        meeting_id,
                        MeetingEvent::StatusChange {
                            status: MeetingStatus::Paused,
                        },
                    )
                    .await;
                Ok(())
            }
            MeetingStatus::Ended => Err(CoreError::state_conflict("Cannot pause an ended meeting")),
        }
    }

    /// End a meeting, cancelling in-flight work. No-op when already ended.
    /// With `auto_generate_minutes`, a final minutes version is generated
    /// afterwards when the meeting has any messages; failures there are
    /// logged, never fatal to the transition.
    pub async fn end_meeting(&self, meeting_id: &str, auto_generate_minutes: bool) -> CoreResult<()> {
        self.coordinator.stop(meeting_id).await;
        {
            let _guard = self.coordinator.acquire(meeting_id).await;
            let mut meeting = self.load_required(meeting_id).await?;
            if meeting.status == MeetingStatus::Ended {
                return Ok(());
            }
            meeting.status = MeetingStatus::Ended;
            meeting.updated_at = Utc::now();
            self.save(&meeting).await?;
            self.hub
                .publish(
                    meeting_id,
                    MeetingEvent::StatusChange {
                        status: MeetingStatus::Ended,
                    },
                )
                .await;
            info!(meeting_id, "Meeting ended");
        }

        if auto_generate_minutes {
            let has_messages = self
                .load_required(meeting_id)
                .await
                .map(|m| !m.messages.is_empty())
                .unwrap_or(false);
            if has_messages {
                if let Err(e) = self.generate_minutes(meeting_id, None).await {
                    warn!(meeting_id, error = %e, "Auto-generating final minutes failed");
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // User messages
    // ------------------------------------------------------------------

    pub async fn add_user_message(&self, meeting_id: &str, content: &str) -> CoreResult<Message> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "add user message")?;

        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation(
                "content",
                "Message content cannot be empty or whitespace only",
            ));
        }
        let limit = meeting
            .config
            .max_message_length
            .map(|l| l.min(USER_MESSAGE_MAX_CHARS))
            .unwrap_or(USER_MESSAGE_MAX_CHARS);
        if content.chars().count() > limit {
            return Err(CoreError::validation(
                "content",
                format!("Message content must be {} characters or less", limit),
            ));
        }

        let message_id = Uuid::new_v4().to_string();
        let mentions: Vec<Mention> = parse_mentions(content, &meeting.participants)
            .into_iter()
            .map(|m| Mention {
                message_id: message_id.clone(),
                ..m
            })
            .collect();

        let message = Message {
            id: message_id,
            speaker_id: "user".to_string(),
            speaker_name: "User".to_string(),
            speaker_type: SpeakerType::User,
            content: content.to_string(),
            reasoning_content: None,
            timestamp: meeting.next_timestamp(),
            round_number: meeting.current_round,
            mentions,
        };
        meeting.messages.push(message.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        self.hub
            .publish(
                meeting_id,
                MeetingEvent::NewMessage {
                    message_id: message.id.clone(),
                },
            )
            .await;
        Ok(message)
    }

    // ------------------------------------------------------------------
    // Agenda (moderator only)
    // ------------------------------------------------------------------

    fn check_moderator(meeting: &Meeting, requester: &Requester) -> CoreResult<()> {
        let allowed = match (&meeting.moderator, requester) {
            (Moderator::User, Requester::User) => true,
            (Moderator::Agent(id), Requester::Agent(requester_id)) => id == requester_id,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::validation(
                "requester",
                "Only the meeting moderator can change the agenda",
            ))
        }
    }

    pub async fn add_agenda_item(
        &self,
        meeting_id: &str,
        item: NewAgendaItem,
        requester: Requester,
    ) -> CoreResult<AgendaItem> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "change the agenda")?;
        Self::check_moderator(&meeting, &requester)?;

        let item = AgendaItem {
            id: Uuid::new_v4().to_string(),
            title: item.title,
            description: item.description,
            completed: false,
            created_at: Utc::now(),
        };
        item.validate()?;
        meeting.agenda.push(item.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        Ok(item)
    }

    pub async fn mark_agenda_completed(
        &self,
        meeting_id: &str,
        item_id: &str,
        requester: Requester,
    ) -> CoreResult<()> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "change the agenda")?;
        Self::check_moderator(&meeting, &requester)?;

        let item = meeting
            .agenda
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoreError::not_found("agenda item", item_id))?;
        item.completed = true;
        meeting.updated_at = Utc::now();
        self.save(&meeting).await
    }

    pub async fn remove_agenda_item(
        &self,
        meeting_id: &str,
        item_id: &str,
        requester: Requester,
    ) -> CoreResult<()> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "change the agenda")?;
        Self::check_moderator(&meeting, &requester)?;

        let before = meeting.agenda.len();
        meeting.agenda.retain(|i| i.id != item_id);
        if meeting.agenda.len() == before {
            return Err(CoreError::not_found("agenda item", item_id));
        }
        meeting.updated_at = Utc::now();
        self.save(&meeting).await
    }

    // ------------------------------------------------------------------
    // Config
    // ------------------------------------------------------------------

    /// Replace the meeting's configuration. Disallowed once ended.
    pub async fn update_meeting_config(
        &self,
        meeting_id: &str,
        config: MeetingConfig,
    ) -> CoreResult<()> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        if meeting.status == MeetingStatus::Ended {
            return Err(CoreError::state_conflict(
                "Cannot update configuration of an ended meeting",
            ));
        }
        meeting.config = config;
        meeting.updated_at = Utc::now();
        self.save(&meeting).await
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::models::SpeakingOrder;

    #[tokio::test]
    async fn test_create_meeting_snapshots_participants() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;
        assert_eq!(meeting.status, MeetingStatus::Active);
        assert_eq!(meeting.current_round, 0);
        assert_eq!(meeting.participants.len(), 2);
        assert_eq!(meeting.participants[0].name, "Alice");
    }

    #[tokio::test]
    async fn test_create_meeting_unknown_agent_rejected() {
        let harness = TestHarness::new().await;
        let result = harness
            .engine
            .create_meeting(NewMeeting {
                topic: "T".to_string(),
                participant_ids: vec!["ghost".to_string()],
                moderator: Moderator::User,
                agenda: vec![],
                config: MeetingConfig::default(),
            })
            .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        let id = meeting.id.as_str();

        // start on active is a no-op.
        harness.engine.start_meeting(id).await.unwrap();

        harness.engine.pause_meeting(id).await.unwrap();
        assert_eq!(harness.status(id).await, MeetingStatus::Paused);
        // pause after pause is a no-op.
        harness.engine.pause_meeting(id).await.unwrap();

        harness.engine.start_meeting(id).await.unwrap();
        assert_eq!(harness.status(id).await, MeetingStatus::Active);

        harness.engine.end_meeting(id, false).await.unwrap();
        assert_eq!(harness.status(id).await, MeetingStatus::Ended);
        // end after end is a no-op.
        harness.engine.end_meeting(id, false).await.unwrap();

        assert!(matches!(
            harness.engine.start_meeting(id).await,
            Err(CoreError::StateConflict { .. })
        ));
        assert!(matches!(
            harness.engine.pause_meeting(id).await,
            Err(CoreError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_message_validation() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;

        let before = harness.engine.get_meeting(&meeting.id).await.unwrap();
        let result = harness.engine.add_user_message(&meeting.id, "   \n ").await;
        assert!(matches!(result, Err(CoreError::Validation { .. })));
        // The meeting is untouched.
        let after = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(before, after);

        let result = harness
            .engine
            .add_user_message(&meeting.id, &"x".repeat(USER_MESSAGE_MAX_CHARS + 1))
            .await;
        assert!(matches!(result, Err(CoreError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_user_message_records_mentions() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;
        let message = harness
            .engine
            .add_user_message(&meeting.id, "@Bob please weigh in")
            .await
            .unwrap();
        assert_eq!(message.mentions.len(), 1);
        assert_eq!(message.mentions[0].mentioned_participant_name, "Bob");
        assert_eq!(message.mentions[0].message_id, message.id);
    }

    #[tokio::test]
    async fn test_user_message_rejected_when_paused() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.engine.pause_meeting(&meeting.id).await.unwrap();
        assert!(matches!(
            harness.engine.add_user_message(&meeting.id, "hello").await,
            Err(CoreError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_agenda_moderator_permission() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;
        let alice_id = meeting.participants[0].id.clone();

        // User moderator: user may edit, agents may not.
        let item = harness
            .engine
            .add_agenda_item(
                &meeting.id,
                NewAgendaItem {
                    title: "Budget".to_string(),
                    description: "Q3".to_string(),
                },
                Requester::User,
            )
            .await
            .unwrap();
        assert!(matches!(
            harness
                .engine
                .add_agenda_item(
                    &meeting.id,
                    NewAgendaItem {
                        title: "Sneaky".to_string(),
                        description: String::new(),
                    },
                    Requester::Agent(alice_id.clone()),
                )
                .await,
            Err(CoreError::Validation { .. })
        ));

        harness
            .engine
            .mark_agenda_completed(&meeting.id, &item.id, Requester::User)
            .await
            .unwrap();
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert!(loaded.agenda[0].completed);

        harness
            .engine
            .remove_agenda_item(&meeting.id, &item.id, Requester::User)
            .await
            .unwrap();
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert!(loaded.agenda.is_empty());
    }

    #[tokio::test]
    async fn test_agenda_agent_moderator() {
        let harness = TestHarness::new().await;
        let meeting = harness
            .create_meeting_with(&["Alice", "Bob"], |m| {
                m.moderator = Moderator::Agent("alice".to_string());
            })
            .await;

        // The moderator agent may edit; the user and other agents may not.
        harness
            .engine
            .add_agenda_item(
                &meeting.id,
                NewAgendaItem {
                    title: "Next steps".to_string(),
                    description: String::new(),
                },
                Requester::Agent("alice".to_string()),
            )
            .await
            .unwrap();
        for requester in [Requester::User, Requester::Agent("bob".to_string())] {
            assert!(matches!(
                harness
                    .engine
                    .add_agenda_item(
                        &meeting.id,
                        NewAgendaItem {
                            title: "Denied".to_string(),
                            description: String::new(),
                        },
                        requester,
                    )
                    .await,
                Err(CoreError::Validation { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_update_config() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;

        let mut config = meeting.config.clone();
        config.speaking_order = SpeakingOrder::Random;
        config.max_rounds = Some(7);
        harness
            .engine
            .update_meeting_config(&meeting.id, config)
            .await
            .unwrap();
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.config.max_rounds, Some(7));

        harness.engine.end_meeting(&meeting.id, false).await.unwrap();
        assert!(matches!(
            harness
                .engine
                .update_meeting_config(&meeting.id, loaded.config)
                .await,
            Err(CoreError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_meeting_drops_subscribers() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        let mut sub = harness.engine.subscribe_events(&meeting.id).await.unwrap();

        harness.engine.delete_meeting(&meeting.id).await.unwrap();
        assert!(matches!(
            harness.engine.get_meeting(&meeting.id).await,
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(sub.recv().await, None);
    }
}
