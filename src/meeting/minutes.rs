//! Minutes generation: versioned structured summaries that compress history
//! for later prompt contexts.

use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::hub::MeetingEvent;
use crate::models::{
    Agent, ConversationMessage, ConversationRole, Meeting, MeetingMinutes,
};
use crate::providers::ProviderError;
use crate::retry::with_retry;

use super::MeetingEngine;

const DEFAULT_MINUTES_PROMPT: &str = "You are the minute-taker for this meeting. Summarize the \
transcript you are given.\n\nRespond with a JSON object of this exact shape and nothing else:\n\
{\n  \"summary\": \"a short paragraph summarizing the discussion\",\n  \"key_decisions\": [\"one \
entry per decision reached\"],\n  \"action_items\": [\"one entry per agreed follow-up\"]\n}";

struct ParsedMinutes {
    summary: String,
    key_decisions: Vec<String>,
    action_items: Vec<String>,
}

/// Strip a leading/trailing markdown code fence, tolerating a language tag.
pub(super) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.split_once('\n') {
        Some((_lang, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Lenient parse of the generator's response. `None` when the response is
/// not the expected JSON object; the caller then stores the raw text.
fn parse_minutes_response(raw: &str) -> Option<ParsedMinutes> {
    let value: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let summary = value.get("summary")?.as_str()?.to_string();
    Some(ParsedMinutes {
        summary,
        key_decisions: string_list(value.get("key_decisions").unwrap_or(&Value::Null)),
        action_items: string_list(value.get("action_items").unwrap_or(&Value::Null)),
    })
}

impl MeetingEngine {
    /// The participant that generates derived artifacts: an explicit choice,
    /// else the moderator agent, else the first participant.
    pub(super) fn pick_generator<'a>(
        meeting: &'a Meeting,
        generator_id: Option<&str>,
    ) -> CoreResult<&'a Agent> {
        match generator_id {
            Some(id) => meeting
                .participant(id)
                .ok_or_else(|| CoreError::not_found("participant", id)),
            None => {
                let moderator = meeting
                    .moderator
                    .agent_id()
                    .and_then(|id| meeting.participant(id));
                moderator
                    .or_else(|| meeting.participants.first())
                    .ok_or_else(|| {
                        CoreError::validation("participants", "Meeting has no participants")
                    })
            }
        }
    }

    /// Transcript since the previous minutes (or the whole meeting),
    /// rendered with speaker names.
    fn minutes_transcript(meeting: &Meeting) -> String {
        let since = meeting.latest_minutes().map(|m| m.created_at);
        meeting
            .messages
            .iter()
            .filter(|m| since.map(|at| m.timestamp > at).unwrap_or(true))
            .map(|m| format!("{}: {}", m.speaker_name, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Generate the next minutes version. Allowed in any meeting state; on
    /// an ended meeting it freezes the historical transcript.
    pub async fn generate_minutes(
        &self,
        meeting_id: &str,
        generator_id: Option<&str>,
    ) -> CoreResult<MeetingMinutes> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        let generator = Self::pick_generator(&meeting, generator_id)?.clone();

        let transcript = Self::minutes_transcript(&meeting);
        if transcript.is_empty() {
            return Err(CoreError::validation(
                "messages",
                "No new messages to summarize",
            ));
        }

        let system_prompt = meeting
            .config
            .minutes_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_MINUTES_PROMPT.to_string());
        let conversation = [ConversationMessage::new(ConversationRole::User, transcript)];
        let adapter = self.adapters().adapter_for(&generator.model_config)?;
        let parameters = generator.model_config.parameters.clone();

        let completion = with_retry("generate_minutes", || {
            adapter.complete(&system_prompt, &conversation, parameters.as_ref())
        })
        .await?;
        let raw = completion.content.trim().to_string();
        if raw.is_empty() {
            return Err(ProviderError::stream("model returned empty minutes").into());
        }

        let version = meeting
            .minutes_history
            .last()
            .map(|m| m.version + 1)
            .unwrap_or(1);
        let minutes = match parse_minutes_response(&raw) {
            Some(parsed) => MeetingMinutes {
                id: Uuid::new_v4().to_string(),
                version,
                content: raw,
                summary: parsed.summary,
                key_decisions: parsed.key_decisions,
                action_items: parsed.action_items,
                created_at: Utc::now(),
                created_by: generator.id.clone(),
            },
            // Unstructured output: store the raw text as both content and
            // summary.
            None => MeetingMinutes {
                id: Uuid::new_v4().to_string(),
                version,
                content: raw.clone(),
                summary: raw,
                key_decisions: vec![],
                action_items: vec![],
                created_at: Utc::now(),
                created_by: generator.id.clone(),
            },
        };

        meeting.minutes_history.push(minutes.clone());
        meeting.current_minutes = Some(minutes.id.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        self.hub()
            .publish(meeting_id, MeetingEvent::MinutesGenerated { version })
            .await;
        info!(meeting_id, version, generator = %generator.id, "Generated minutes");
        Ok(minutes)
    }

    /// Manually append a minutes version with the given content.
    pub async fn update_minutes(
        &self,
        meeting_id: &str,
        content: &str,
        editor_id: &str,
    ) -> CoreResult<MeetingMinutes> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;

        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation(
                "content",
                "Minutes content cannot be empty",
            ));
        }

        let version = meeting
            .minutes_history
            .last()
            .map(|m| m.version + 1)
            .unwrap_or(1);
        let minutes = MeetingMinutes {
            id: Uuid::new_v4().to_string(),
            version,
            content: content.to_string(),
            summary: content.to_string(),
            key_decisions: vec![],
            action_items: vec![],
            created_at: Utc::now(),
            created_by: editor_id.to_string(),
        };
        meeting.minutes_history.push(minutes.clone());
        meeting.current_minutes = Some(minutes.id.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        self.hub()
            .publish(meeting_id, MeetingEvent::MinutesGenerated { version })
            .await;
        Ok(minutes)
    }

    pub async fn minutes_history(&self, meeting_id: &str) -> CoreResult<Vec<MeetingMinutes>> {
        Ok(self.load_required(meeting_id).await?.minutes_history)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::meeting::TurnMode;
    use crate::testing::ScriptedResponse;

    const STRUCTURED: &str = r#"{"summary": "We agreed on X.", "key_decisions": ["Do X"], "action_items": ["Alice ships X"]}"#;

    #[tokio::test]
    async fn test_generate_minutes_structured() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "Let's discuss X")
            .await
            .unwrap();
        harness.script("Alice", vec![ScriptedResponse::Text(STRUCTURED.to_string())]);

        let minutes = harness
            .engine
            .generate_minutes(&meeting.id, None)
            .await
            .unwrap();
        assert_eq!(minutes.version, 1);
        assert_eq!(minutes.summary, "We agreed on X.");
        assert_eq!(minutes.key_decisions, vec!["Do X".to_string()]);
        assert_eq!(minutes.created_by, "alice");

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.current_minutes.as_deref(), Some(minutes.id.as_str()));
        assert_eq!(loaded.latest_minutes().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_generate_minutes_fenced_json() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "topic")
            .await
            .unwrap();
        harness.script(
            "Alice",
            vec![ScriptedResponse::Text(format!("```json\n{}\n```", STRUCTURED))],
        );

        let minutes = harness
            .engine
            .generate_minutes(&meeting.id, None)
            .await
            .unwrap();
        assert_eq!(minutes.summary, "We agreed on X.");
    }

    #[tokio::test]
    async fn test_unparseable_response_stored_raw() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "topic")
            .await
            .unwrap();
        harness.script(
            "Alice",
            vec![ScriptedResponse::Text("Just prose, no JSON.".to_string())],
        );

        let minutes = harness
            .engine
            .generate_minutes(&meeting.id, None)
            .await
            .unwrap();
        assert_eq!(minutes.content, "Just prose, no JSON.");
        assert_eq!(minutes.summary, "Just prose, no JSON.");
        assert!(minutes.key_decisions.is_empty());
    }

    #[tokio::test]
    async fn test_versions_strictly_increase() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "first topic")
            .await
            .unwrap();
        harness.script(
            "Alice",
            vec![
                ScriptedResponse::Text(STRUCTURED.to_string()),
                ScriptedResponse::Text(STRUCTURED.to_string()),
            ],
        );

        let v1 = harness
            .engine
            .generate_minutes(&meeting.id, None)
            .await
            .unwrap();
        harness
            .engine
            .add_user_message(&meeting.id, "second topic")
            .await
            .unwrap();
        let v2 = harness
            .engine
            .generate_minutes(&meeting.id, None)
            .await
            .unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert!(v2.created_at >= v1.created_at);

        let history = harness.engine.minutes_history(&meeting.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_no_new_messages_rejected() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        assert!(matches!(
            harness.engine.generate_minutes(&meeting.id, None).await,
            Err(CoreError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_minutes_compress_next_turn_context() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice", "Bob"]).await;

        // 20 messages of history.
        for i in 0..20 {
            harness
                .engine
                .add_user_message(&meeting.id, &format!("point {}", i))
                .await
                .unwrap();
        }
        harness.script("Alice", vec![ScriptedResponse::Text(STRUCTURED.to_string())]);
        harness
            .engine
            .generate_minutes(&meeting.id, Some("alice"))
            .await
            .unwrap();

        // Two more exchanges after the minutes.
        harness
            .engine
            .add_user_message(&meeting.id, "post-minutes question")
            .await
            .unwrap();
        harness
            .engine
            .add_user_message(&meeting.id, "another point")
            .await
            .unwrap();

        let bob = harness.script("Bob", vec![ScriptedResponse::Text("Reply.".to_string())]);
        harness
            .engine
            .request_turn(&meeting.id, "bob", TurnMode::Blocking)
            .await
            .unwrap();

        let calls = bob.call_log.lock().await;
        let conversation = &calls[0].conversation;
        // Context entry + minutes entry + exactly the 2 post-minutes
        // messages, not the original 20.
        assert_eq!(conversation.len(), 4);
        assert!(conversation[1].content.contains("We agreed on X.")
            || conversation[1].content.contains("summary"));
        assert!(conversation[2].content.contains("post-minutes question"));
    }

    #[tokio::test]
    async fn test_end_meeting_auto_generates_final_minutes() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "wrap it up")
            .await
            .unwrap();
        harness.script("Alice", vec![ScriptedResponse::Text(STRUCTURED.to_string())]);

        harness.engine.end_meeting(&meeting.id, true).await.unwrap();

        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.status, crate::models::MeetingStatus::Ended);
        assert_eq!(loaded.minutes_history.len(), 1);
        assert_eq!(loaded.latest_minutes().unwrap().summary, "We agreed on X.");
    }

    #[tokio::test]
    async fn test_end_meeting_survives_minutes_failure() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "wrap it up")
            .await
            .unwrap();
        harness.script(
            "Alice",
            vec![ScriptedResponse::Error(
                crate::providers::ProviderError::from_status(401, "bad key"),
            )],
        );

        // The transition sticks even though generation fails.
        harness.engine.end_meeting(&meeting.id, true).await.unwrap();
        let loaded = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(loaded.status, crate::models::MeetingStatus::Ended);
        assert!(loaded.minutes_history.is_empty());
    }

    #[tokio::test]
    async fn test_update_minutes_manual_version() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;

        let minutes = harness
            .engine
            .update_minutes(&meeting.id, "Manually written minutes", "user")
            .await
            .unwrap();
        assert_eq!(minutes.version, 1);
        assert_eq!(minutes.created_by, "user");
        assert_eq!(minutes.summary, "Manually written minutes");

        assert!(matches!(
            harness.engine.update_minutes(&meeting.id, "  ", "user").await,
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
