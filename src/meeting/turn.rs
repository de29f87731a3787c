//! Turn execution: one speaker producing one message, end to end.
//!
//! A turn reloads the meeting under the coordinator lock, composes the
//! speaker's context, calls the provider (blocking or streamed), and commits
//! exactly one message on success. Streaming deltas fan out to subscribers as
//! they arrive but never reach persistence; only the final assembled content
//! does. Mention-triggered follow-ups chain behind the same lock, bounded by
//! the configured depth.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context;
use crate::coordinator::TurnGuard;
use crate::error::{CoreError, CoreResult};
use crate::hub::MeetingEvent;
use crate::mentions::parse_mentions;
use crate::models::{
    ConversationMessage, Meeting, MeetingStatus, Mention, Message, ModelParameters, SpeakerType,
};
use crate::providers::ProviderError;
use crate::retry::with_retry;
use crate::traits::{Completion, ModelAdapter, StreamDelta};
use crate::utils::enforce_max_length;

use super::{select_next_speakers, MeetingEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Blocking,
    Streaming,
}

/// Result of one executed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    /// Mentioned participants in mention order, for follow-up selection.
    pub mentioned_agent_ids: Vec<String>,
}

impl MeetingEngine {
    /// Execute one turn for `agent_id`. In streaming mode, mention-triggered
    /// follow-up turns chain behind the same lock afterwards; the returned
    /// message is always the lead turn's.
    pub async fn request_turn(
        &self,
        meeting_id: &str,
        agent_id: &str,
        mode: TurnMode,
    ) -> CoreResult<Message> {
        let guard = self.coordinator.acquire(meeting_id).await;
        let outcome = self
            .execute_turn_locked(meeting_id, agent_id, mode, &guard)
            .await?;
        let lead = outcome.message.clone();

        if mode == TurnMode::Streaming && !outcome.mentioned_agent_ids.is_empty() {
            self.run_chain(meeting_id, &guard, agent_id, outcome.mentioned_agent_ids)
                .await;
        }
        Ok(lead)
    }

    /// Run one full round: every participant speaks once, rotated or
    /// shuffled per the configured order. Stops early (without error) when
    /// the meeting leaves the active state mid-round (max-rounds auto-end)
    /// or the work is cancelled.
    pub async fn run_round(&self, meeting_id: &str) -> CoreResult<Vec<Message>> {
        let guard = self.coordinator.acquire(meeting_id).await;
        let meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "run a round")?;

        let speakers = select_next_speakers(&meeting, None, true);
        let mut messages = Vec::with_capacity(speakers.len());
        for speaker_id in speakers {
            if guard.cancellation().is_cancelled() {
                break;
            }
            match self
                .execute_turn_locked(meeting_id, &speaker_id, TurnMode::Blocking, &guard)
                .await
            {
                Ok(outcome) => messages.push(outcome.message),
                Err(CoreError::StateConflict { .. }) | Err(CoreError::Cancelled) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Mention-triggered follow-ups after a streamed lead turn. Failures end
    /// the chain but never fail the lead request.
    async fn run_chain(
        &self,
        meeting_id: &str,
        guard: &TurnGuard,
        lead_speaker: &str,
        first_mentions: Vec<String>,
    ) {
        let mut processed: HashSet<String> = HashSet::new();
        processed.insert(lead_speaker.to_string());
        let mut pending = first_mentions;

        loop {
            if guard.cancellation().is_cancelled() {
                break;
            }
            // Yield to an explicit request queued on this meeting's lock.
            if guard.has_waiters() {
                info!(meeting_id, "Chain yielding to a queued request");
                break;
            }
            let Some(next) = pending.iter().find(|id| !processed.contains(*id)).cloned() else {
                break;
            };
            let depth = guard.bump_chain_depth();
            if depth > self.chain_depth_limit() {
                info!(meeting_id, depth, "Chain depth limit reached");
                break;
            }
            processed.insert(next.clone());

            match self
                .execute_turn_locked(meeting_id, &next, TurnMode::Streaming, guard)
                .await
            {
                Ok(outcome) => pending = outcome.mentioned_agent_ids,
                Err(CoreError::Cancelled) => break,
                Err(e) => {
                    warn!(meeting_id, speaker_id = %next, error = %e, "Chained turn failed");
                    break;
                }
            }
        }
    }

    pub(super) async fn execute_turn_locked(
        &self,
        meeting_id: &str,
        speaker_id: &str,
        mode: TurnMode,
        guard: &TurnGuard,
    ) -> CoreResult<TurnOutcome> {
        let mut meeting = self.load_required(meeting_id).await?;
        Self::require_active(&meeting, "request an agent response")?;
        if let Some(max) = meeting.config.max_rounds {
            if meeting.current_round >= max {
                return Err(CoreError::state_conflict(format!(
                    "Meeting has reached its maximum of {} rounds",
                    max
                )));
            }
        }
        let speaker = meeting
            .participant(speaker_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("participant", speaker_id))?;

        let system_prompt = context::build_system_prompt(&speaker, &meeting);
        let conversation = context::build_conversation(&meeting, &speaker);
        let adapter = self.adapters().adapter_for(&speaker.model_config)?;
        let parameters = speaker.model_config.parameters.clone();
        let cancel = guard.cancellation();

        info!(
            meeting_id,
            speaker_id,
            mode = ?mode,
            context_len = conversation.len(),
            "Executing agent turn"
        );

        let completion = match mode {
            TurnMode::Blocking => {
                self.blocking_completion(
                    meeting_id,
                    speaker_id,
                    adapter,
                    &system_prompt,
                    &conversation,
                    parameters.as_ref(),
                    &cancel,
                )
                .await?
            }
            TurnMode::Streaming => {
                self.streamed_completion(
                    meeting_id,
                    speaker_id,
                    adapter,
                    &system_prompt,
                    &conversation,
                    parameters.as_ref(),
                    &cancel,
                )
                .await?
            }
        };

        let content = completion.content.trim().to_string();
        if content.is_empty() {
            let err = ProviderError::stream("model returned empty output");
            self.publish_turn_failed(meeting_id, speaker_id, &err).await;
            return Err(err.into());
        }
        let content = match meeting.config.max_message_length {
            Some(max) => enforce_max_length(&content, max),
            None => content,
        };

        let message_id = Uuid::new_v4().to_string();
        let mentions: Vec<Mention> = parse_mentions(&content, &meeting.participants)
            .into_iter()
            .map(|m| Mention {
                message_id: message_id.clone(),
                ..m
            })
            .collect();
        let message = Message {
            id: message_id,
            speaker_id: speaker.id.clone(),
            speaker_name: speaker.name.clone(),
            speaker_type: SpeakerType::Agent,
            content,
            reasoning_content: completion
                .reasoning_content
                .filter(|r| !r.trim().is_empty()),
            timestamp: meeting.next_timestamp(),
            round_number: meeting.current_round,
            mentions,
        };

        meeting.messages.push(message.clone());
        meeting.updated_at = Utc::now();
        let ended = Self::advance_round(&mut meeting);

        // Commit point: on save failure the in-memory mutation is discarded
        // with the reloaded meeting of the next operation.
        if let Err(e) = self.save(&meeting).await {
            self.hub()
                .publish(
                    meeting_id,
                    MeetingEvent::TurnFailed {
                        speaker_id: speaker_id.to_string(),
                        kind: "persistence_failed".to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
            return Err(e);
        }

        self.hub()
            .publish(
                meeting_id,
                MeetingEvent::NewMessage {
                    message_id: message.id.clone(),
                },
            )
            .await;
        if ended {
            self.hub()
                .publish(
                    meeting_id,
                    MeetingEvent::StatusChange {
                        status: MeetingStatus::Ended,
                    },
                )
                .await;
            info!(meeting_id, "Meeting auto-ended (max rounds reached)");
        }

        let mentioned_agent_ids = message
            .mentions
            .iter()
            .map(|m| m.mentioned_participant_id.clone())
            .collect();
        Ok(TurnOutcome {
            message,
            mentioned_agent_ids,
        })
    }

    /// Round bookkeeping after an agent append. Returns true when the
    /// meeting just auto-ended.
    fn advance_round(meeting: &mut Meeting) -> bool {
        if !meeting.round_is_complete() {
            return false;
        }
        meeting.current_round += 1;
        match meeting.config.max_rounds {
            Some(max) if meeting.current_round >= max => {
                meeting.status = MeetingStatus::Ended;
                true
            }
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn blocking_completion(
        &self,
        meeting_id: &str,
        speaker_id: &str,
        adapter: Arc<dyn ModelAdapter>,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
        cancel: &CancellationToken,
    ) -> CoreResult<Completion> {
        let call = || adapter.complete(system_prompt, conversation, parameters);
        tokio::select! {
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = with_retry("agent_turn", call) => match result {
                Ok(completion) => Ok(completion),
                Err(err) => {
                    self.publish_turn_failed(meeting_id, speaker_id, &err).await;
                    Err(err.into())
                }
            },
        }
    }

    /// Drive a streamed response: fan deltas out to subscribers, accumulate
    /// them in memory, stop at the terminal delta. Cancellation drops the
    /// receiver, which aborts the provider connection; partials are
    /// discarded silently.
    #[allow(clippy::too_many_arguments)]
    async fn streamed_completion(
        &self,
        meeting_id: &str,
        speaker_id: &str,
        adapter: Arc<dyn ModelAdapter>,
        system_prompt: &str,
        conversation: &[ConversationMessage],
        parameters: Option<&ModelParameters>,
        cancel: &CancellationToken,
    ) -> CoreResult<Completion> {
        let open = || adapter.stream(system_prompt, conversation, parameters);
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            result = with_retry("agent_turn_stream", open) => match result {
                Ok(rx) => rx,
                Err(err) => {
                    self.publish_turn_failed(meeting_id, speaker_id, &err).await;
                    return Err(err.into());
                }
            },
        };

        let mut content = String::new();
        let mut reasoning = String::new();
        loop {
            let delta = tokio::select! {
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                delta = rx.recv() => delta,
            };
            match delta {
                Some(StreamDelta::Reasoning(text)) => {
                    reasoning.push_str(&text);
                    self.publish_delta(meeting_id, speaker_id, StreamDelta::Reasoning(text))
                        .await;
                }
                Some(StreamDelta::Content(text)) => {
                    content.push_str(&text);
                    self.publish_delta(meeting_id, speaker_id, StreamDelta::Content(text))
                        .await;
                }
                Some(StreamDelta::Complete) => {
                    self.publish_delta(meeting_id, speaker_id, StreamDelta::Complete)
                        .await;
                    break;
                }
                Some(StreamDelta::Error(message)) => {
                    self.publish_delta(meeting_id, speaker_id, StreamDelta::Error(message.clone()))
                        .await;
                    let err = ProviderError::stream(message);
                    self.publish_turn_failed(meeting_id, speaker_id, &err).await;
                    return Err(err.into());
                }
                None => {
                    let err = ProviderError::stream("stream ended without completion");
                    self.publish_turn_failed(meeting_id, speaker_id, &err).await;
                    return Err(err.into());
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

    async fn publish_delta(&self, meeting_id: &str, speaker_id: &str, delta: StreamDelta) {
        self.hub()
            .publish(
                meeting_id,
                MeetingEvent::StreamingDelta {
                    speaker_id: speaker_id.to_string(),
                    delta,
                },
            )
            .await;
    }

    async fn publish_turn_failed(&self, meeting_id: &str, speaker_id: &str, err: &ProviderError) {
        warn!(meeting_id, speaker_id, kind = ?err.kind, "Turn failed: {}", err);
        self.hub()
            .publish(
                meeting_id,
                MeetingEvent::TurnFailed {
                    speaker_id: speaker_id.to_string(),
                    kind: err.kind.label().to_string(),
                    message: err.message.clone(),
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::SpeakerType;
    use crate::testing::ScriptedResponse;

    #[tokio::test]
    async fn test_blocking_turn_appends_message() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.script("Alice", vec![ScriptedResponse::Text("My view is X.".to_string())]);

        let message = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await
            .unwrap();
        assert_eq!(message.content, "My view is X.");
        assert_eq!(message.speaker_type, SpeakerType::Agent);
        assert_eq!(message.round_number, 0);

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
        // One participant: the round advanced.
        assert_eq!(loaded.current_round, 1);
    }

    #[tokio::test]
    async fn test_turn_rejected_for_non_participant() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        assert!(matches!(
            harness
                .engine
                .request_turn(&meeting.id, "stranger", TurnMode::Blocking)
                .await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_turn_rejected_when_paused() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.engine.pause_meeting(&meeting.id).await.unwrap();
        assert!(matches!(
            harness
                .engine
                .request_turn(&meeting.id, "alice", TurnMode::Blocking)
                .await,
            Err(CoreError::StateConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_output_is_failed_turn() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.script("Alice", vec![ScriptedResponse::Text("   \n".to_string())]);
        let mut sub = harness.engine.subscribe_events(&meeting.id).await.unwrap();

        let result = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await;
        assert!(matches!(result, Err(CoreError::Provider(_))));

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert!(loaded.messages.is_empty());
        assert!(matches!(
            sub.recv().await,
            Some(MeetingEvent::TurnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncation_appends_marker() {
        let harness = TestHarness::new().await;
        let meeting = harness
            .create_meeting_with(&["Alice"], |m| {
                m.config.max_message_length = Some(10);
            })
            .await;
        harness.script(
            "Alice",
            vec![ScriptedResponse::Text("A very long answer indeed".to_string())],
        );

        let message = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await
            .unwrap();
        assert!(message.content.ends_with(crate::utils::TRUNCATION_MARKER));
        assert!(message.content.starts_with("A very lon"));
    }

    #[tokio::test]
    async fn test_streaming_turn_emits_deltas_then_message() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.script(
            "Alice",
            vec![ScriptedResponse::Deltas(vec![
                StreamDelta::Reasoning("thinking".to_string()),
                StreamDelta::Content("Hello ".to_string()),
                StreamDelta::Content("there".to_string()),
                StreamDelta::Complete,
            ])],
        );
        let mut sub = harness.engine.subscribe_events(&meeting.id).await.unwrap();

        let message = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Streaming)
            .await
            .unwrap();
        assert_eq!(message.content, "Hello there");
        assert_eq!(message.reasoning_content.as_deref(), Some("thinking"));

        // Deltas in producer order, then the terminal complete, then the
        // committed message.
        let mut kinds = Vec::new();
        for _ in 0..5 {
            kinds.push(sub.recv().await.unwrap());
        }
        assert!(matches!(
            kinds[0],
            MeetingEvent::StreamingDelta {
                delta: StreamDelta::Reasoning(_),
                ..
            }
        ));
        assert!(matches!(
            kinds[3],
            MeetingEvent::StreamingDelta {
                delta: StreamDelta::Complete,
                ..
            }
        ));
        assert!(matches!(kinds[4], MeetingEvent::NewMessage { .. }));
    }

    #[tokio::test]
    async fn test_stream_error_aborts_without_message() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.script(
            "Alice",
            vec![ScriptedResponse::Deltas(vec![
                StreamDelta::Content("partial".to_string()),
                StreamDelta::Error("boom".to_string()),
            ])],
        );

        let result = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Streaming)
            .await;
        assert!(matches!(result, Err(CoreError::Provider(_))));
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert!(loaded.messages.is_empty());
        assert_eq!(loaded.current_round, 0);
    }

    #[tokio::test]
    async fn test_mention_chain_runs_followups() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;
        harness.script(
            "Alice",
            vec![ScriptedResponse::Text("I defer to @Bob on this.".to_string())],
        );
        harness.script(
            "Bob",
            vec![ScriptedResponse::Text("Thanks @Alice, agreed.".to_string())],
        );

        harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Streaming)
            .await
            .unwrap();

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        // Alice spoke, Bob chained; Bob's mention of Alice does not re-run
        // her (already processed this chain).
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].speaker_id, "alice");
        assert_eq!(loaded.messages[1].speaker_id, "bob");
    }

    #[tokio::test]
    async fn test_chain_respects_depth_limit() {
        let harness = TestHarness::new().await;
        // Four agents mentioning each other in a long relay, engine limit 4.
        let meeting = harness
            .create_meeting(&["A1", "A2", "A3", "A4"])
            .await;
        harness.script("A1", vec![ScriptedResponse::Text("over to @A2".to_string())]);
        harness.script("A2", vec![ScriptedResponse::Text("over to @A3".to_string())]);
        harness.script("A3", vec![ScriptedResponse::Text("over to @A4".to_string())]);
        harness.script("A4", vec![ScriptedResponse::Text("done".to_string())]);

        harness
            .engine
            .request_turn(&meeting.id, "a1", TurnMode::Streaming)
            .await
            .unwrap();
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_provider_failure_emits_turn_failed() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness.script(
            "Alice",
            vec![ScriptedResponse::Error(ProviderError::from_status(
                401, "bad key",
            ))],
        );
        let mut sub = harness.engine.subscribe_events(&meeting.id).await.unwrap();

        let result = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await;
        assert!(matches!(result, Err(CoreError::Provider(_))));
        match sub.recv().await {
            Some(MeetingEvent::TurnFailed { kind, .. }) => assert_eq!(kind, "auth_failed"),
            other => panic!("expected TurnFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retryable_provider_error_retries() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        let adapter = harness.script(
            "Alice",
            vec![
                ScriptedResponse::Error(ProviderError::from_status(503, "flaky")),
                ScriptedResponse::Text("Recovered.".to_string()),
            ],
        );

        let message = harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await
            .unwrap();
        assert_eq!(message.content, "Recovered.");
        assert_eq!(adapter.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;
        harness.engine.run_round(&meeting.id).await.unwrap();
        harness
            .engine
            .add_user_message(&meeting.id, "and so on")
            .await
            .unwrap();
        harness.engine.run_round(&meeting.id).await.unwrap();

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        for pair in loaded.messages.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }
}
