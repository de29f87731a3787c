//! Mind-map generation: a model-distilled tree of discussion points hanging
//! off the topic and agenda, with message references back into the
//! transcript.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::hub::MeetingEvent;
use crate::models::{ConversationMessage, ConversationRole, Meeting, MindMap, MindMapNode};
use crate::providers::ProviderError;
use crate::retry::with_retry;

use super::minutes::strip_code_fences;
use super::MeetingEngine;

/// Deepest node level the generator will create (root is 0, agenda is 1).
const MAX_NODE_LEVEL: u32 = 3;

/// The shape the model is asked to return.
#[derive(Debug, Clone, Deserialize)]
struct DiscussionPoint {
    content: String,
    #[serde(default)]
    agenda_title: Option<String>,
    #[serde(default)]
    message_ids: Vec<String>,
    #[serde(default)]
    sub_points: Vec<DiscussionPoint>,
}

fn generation_prompt(meeting: &Meeting) -> String {
    let mut lines = vec![
        "Distill the meeting below into a tree of discussion points.".to_string(),
        String::new(),
        format!("Meeting topic: {}", meeting.topic),
    ];

    if !meeting.agenda.is_empty() {
        lines.push(String::new());
        lines.push("Agenda:".to_string());
        for item in &meeting.agenda {
            let marker = if item.completed { "✓" } else { "○" };
            lines.push(format!("{} {}: {}", marker, item.title, item.description));
        }
    }

    lines.push(String::new());
    if let Some(minutes) = meeting.latest_minutes() {
        lines.push("Meeting minutes:".to_string());
        lines.push(minutes.content.clone());
        let new_messages: Vec<_> = meeting
            .messages
            .iter()
            .filter(|m| m.timestamp > minutes.created_at)
            .collect();
        if !new_messages.is_empty() {
            lines.push(String::new());
            lines.push("Discussion since the minutes:".to_string());
            for msg in new_messages {
                lines.push(format!("[{}] (message id: {}): {}", msg.speaker_name, msg.id, msg.content));
            }
        }
    } else {
        lines.push("Discussion:".to_string());
        for msg in &meeting.messages {
            lines.push(format!("[{}] (message id: {}): {}", msg.speaker_name, msg.id, msg.content));
        }
    }

    lines.push(String::new());
    lines.push(
        "Respond with a JSON object of this exact shape and nothing else:".to_string(),
    );
    lines.push(
        r#"{
  "discussion_points": [
    {
      "content": "the point made",
      "agenda_title": "title of the agenda item it belongs to, or null",
      "message_ids": ["ids of the messages it was distilled from"],
      "sub_points": [ { "content": "...", "message_ids": [], "sub_points": [] } ]
    }
  ]
}"#
        .to_string(),
    );
    lines.join("\n")
}

/// Strict parse first, then a lenient pass accepting a bare array (or a
/// `nodes` key some models emit instead).
fn parse_discussion_points(raw: &str) -> Option<Vec<DiscussionPoint>> {
    let value: Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let points = match &value {
        Value::Object(map) => map
            .get("discussion_points")
            .or_else(|| map.get("nodes"))?
            .clone(),
        Value::Array(_) => value.clone(),
        _ => return None,
    };
    serde_json::from_value(points).ok()
}

struct TreeBuilder {
    nodes: HashMap<String, MindMapNode>,
    next_id: usize,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
        }
    }

    fn add_node(&mut self, content: &str, level: u32, parent_id: Option<&str>) -> String {
        let id = format!("node_{}", self.next_id);
        self.next_id += 1;
        let mut node = MindMapNode::new(id.clone(), content, level);
        node.parent_id = parent_id.map(|p| p.to_string());
        if let Some(parent_id) = parent_id {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.children_ids.push(id.clone());
            }
        }
        self.nodes.insert(id.clone(), node);
        id
    }

    fn attach_points(
        &mut self,
        points: &[DiscussionPoint],
        parent_id: &str,
        level: u32,
        known_messages: &HashSet<&str>,
    ) {
        if level > MAX_NODE_LEVEL {
            return;
        }
        for point in points {
            if point.content.trim().is_empty() {
                continue;
            }
            let id = self.add_node(point.content.trim(), level, Some(parent_id));
            let node = self.nodes.get_mut(&id).expect("node just inserted");
            node.message_references = point
                .message_ids
                .iter()
                .filter(|m| known_messages.contains(m.as_str()))
                .cloned()
                .collect();
            self.attach_points(&point.sub_points, &id, level + 1, known_messages);
        }
    }
}

/// Root + one level-1 node per agenda item; discussion points attach to
/// their agenda node by title, or to the root.
fn build_tree(
    meeting: &Meeting,
    points: &[DiscussionPoint],
    version: u32,
    created_by: &str,
) -> MindMap {
    let mut builder = TreeBuilder::new();
    let root_id = builder.add_node(&meeting.topic, 0, None);

    let mut agenda_nodes: HashMap<&str, String> = HashMap::new();
    for item in &meeting.agenda {
        let id = builder.add_node(&item.title, 1, Some(&root_id));
        agenda_nodes.insert(item.title.as_str(), id);
    }

    let known_messages: HashSet<&str> = meeting.messages.iter().map(|m| m.id.as_str()).collect();
    for point in points {
        let (parent_id, level) = point
            .agenda_title
            .as_deref()
            .and_then(|title| agenda_nodes.get(title))
            .map(|id| (id.clone(), 2))
            .unwrap_or_else(|| (root_id.clone(), 1));
        builder.attach_points(std::slice::from_ref(point), &parent_id, level, &known_messages);
    }

    let root_node = builder.nodes.get(&root_id).expect("root exists").clone();
    MindMap {
        id: Uuid::new_v4().to_string(),
        meeting_id: meeting.id.clone(),
        root_node,
        nodes: builder.nodes,
        version,
        created_at: Utc::now(),
        created_by: created_by.to_string(),
    }
}

impl MeetingEngine {
    /// Ask a model to distill the discussion into a tree and store it,
    /// superseding any previous mind-map. Malformed model output falls back
    /// to the minimal root+agenda tree.
    pub async fn generate_mind_map(
        &self,
        meeting_id: &str,
        generator_id: Option<&str>,
    ) -> CoreResult<MindMap> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;
        let generator = Self::pick_generator(&meeting, generator_id)?.clone();
        if meeting.messages.is_empty() {
            return Err(CoreError::validation(
                "messages",
                "No discussion to map yet",
            ));
        }

        let prompt = generation_prompt(&meeting);
        let conversation = [ConversationMessage::new(ConversationRole::User, prompt)];
        let adapter = self.adapters().adapter_for(&generator.model_config)?;
        let parameters = generator.model_config.parameters.clone();
        let completion = with_retry("generate_mind_map", || {
            adapter.complete(
                "You turn meeting transcripts into structured mind-maps.",
                &conversation,
                parameters.as_ref(),
            )
        })
        .await?;
        if completion.content.trim().is_empty() {
            return Err(ProviderError::stream("model returned an empty mind-map").into());
        }

        let version = meeting.mind_map.as_ref().map(|m| m.version + 1).unwrap_or(1);
        let points = parse_discussion_points(&completion.content).unwrap_or_else(|| {
            warn!(meeting_id, "Mind-map response unparseable; using agenda-only tree");
            Vec::new()
        });
        let mut mind_map = build_tree(&meeting, &points, version, &generator.id);
        if let Err(e) = mind_map.validate_tree() {
            warn!(meeting_id, error = %e, "Generated mind-map invalid; using agenda-only tree");
            mind_map = build_tree(&meeting, &[], version, &generator.id);
        }

        meeting.mind_map = Some(mind_map.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        self.hub()
            .publish(meeting_id, MeetingEvent::MindMapGenerated { version })
            .await;
        info!(meeting_id, version, nodes = mind_map.nodes.len(), "Generated mind-map");
        Ok(mind_map)
    }

    /// Replace the stored mind-map with an externally edited one. The tree
    /// invariants and message references are validated; version and
    /// meeting id are assigned here, not taken from the caller.
    pub async fn update_mind_map(&self, meeting_id: &str, mind_map: MindMap) -> CoreResult<MindMap> {
        let _guard = self.coordinator.acquire(meeting_id).await;
        let mut meeting = self.load_required(meeting_id).await?;

        mind_map.validate_tree()?;
        let known: HashSet<&str> = meeting.messages.iter().map(|m| m.id.as_str()).collect();
        for node in mind_map.nodes.values() {
            if let Some(bad) = node
                .message_references
                .iter()
                .find(|r| !known.contains(r.as_str()))
            {
                return Err(CoreError::validation(
                    "message_references",
                    format!("Unknown message reference {}", bad),
                ));
            }
        }

        let version = meeting.mind_map.as_ref().map(|m| m.version + 1).unwrap_or(1);
        let stored = MindMap {
            meeting_id: meeting.id.clone(),
            version,
            created_at: Utc::now(),
            ..mind_map
        };
        meeting.mind_map = Some(stored.clone());
        meeting.updated_at = Utc::now();
        self.save(&meeting).await?;
        self.hub()
            .publish(meeting_id, MeetingEvent::MindMapGenerated { version })
            .await;
        Ok(stored)
    }
}
