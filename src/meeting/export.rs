//! Meeting and mind-map export.
//!
//! Markdown and JSON are rendered in-process; SVG and PNG are produced by
//! piping generated DOT text through the graphviz `dot` binary.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{CoreError, CoreResult};
use crate::models::{Meeting, MindMap};
use crate::utils::truncate_str;

use super::MeetingEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingExportFormat {
    Markdown,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MindMapExportFormat {
    Png,
    Svg,
    Json,
    Markdown,
}

/// How many message references a markdown node line shows before eliding.
const MAX_SHOWN_REFERENCES: usize = 3;

fn meeting_markdown(meeting: &Meeting) -> String {
    let mut lines = vec![format!("# {}", meeting.topic), String::new()];

    lines.push("## Participants".to_string());
    for participant in &meeting.participants {
        lines.push(format!("- **{}** ({})", participant.name, participant.role.name));
    }
    lines.push(String::new());

    if meeting.messages.is_empty() {
        lines.push("*No messages yet*".to_string());
        lines.push(String::new());
    }
    for msg in &meeting.messages {
        lines.push(format!(
            "## {} · {} · {}",
            msg.round_number,
            msg.speaker_name,
            msg.timestamp.format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(String::new());
        lines.push(msg.content.clone());
        lines.push(String::new());
    }

    if let Some(minutes) = meeting.latest_minutes() {
        lines.push("## Minutes".to_string());
        lines.push(String::new());
        lines.push(minutes.content.clone());
        lines.push(String::new());
    }

    lines.join("\n")
}

fn mind_map_markdown(map: &MindMap) -> String {
    let mut lines = vec![format!("# {}", map.root_node.content), String::new()];

    fn walk(map: &MindMap, node_id: &str, lines: &mut Vec<String>) {
        let Some(node) = map.nodes.get(node_id) else {
            return;
        };
        if node.level > 0 {
            let indent = "  ".repeat(node.level.saturating_sub(1) as usize);
            lines.push(format!("{}- {}", indent, node.content));
            if !node.message_references.is_empty() {
                let shown: Vec<&str> = node
                    .message_references
                    .iter()
                    .take(MAX_SHOWN_REFERENCES)
                    .map(|s| s.as_str())
                    .collect();
                let mut refs = shown.join(", ");
                let hidden = node.message_references.len().saturating_sub(MAX_SHOWN_REFERENCES);
                if hidden > 0 {
                    refs.push_str(&format!(" (+{} more)", hidden));
                }
                lines.push(format!("{}  *messages: {}*", indent, refs));
            }
        }
        for child_id in &node.children_ids {
            walk(map, child_id, lines);
        }
    }

    walk(map, &map.root_node.id, &mut lines);
    lines.join("\n")
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the tree as DOT, nodes and edges each exactly once, in a
/// deterministic order.
fn mind_map_dot(map: &MindMap) -> String {
    let mut lines = vec![
        "digraph mindmap {".to_string(),
        "  rankdir=LR;".to_string(),
        "  node [shape=box, style=\"rounded,filled\"];".to_string(),
    ];

    let ordered: BTreeMap<&str, _> = map.nodes.iter().map(|(k, v)| (k.as_str(), v)).collect();
    for (id, node) in &ordered {
        let fill = match node.level {
            0 => "lightcoral",
            1 => "lightgreen",
            _ => "lightblue",
        };
        lines.push(format!(
            "  \"{}\" [label=\"{}\", fillcolor={}];",
            dot_escape(id),
            dot_escape(&truncate_str(&node.content, 50)),
            fill
        ));
    }
    for (id, node) in &ordered {
        for child_id in &node.children_ids {
            lines.push(format!(
                "  \"{}\" -> \"{}\";",
                dot_escape(id),
                dot_escape(child_id)
            ));
        }
    }
    lines.push("}".to_string());
    lines.join("\n")
}

async fn render_dot(dot: &str, format: &str) -> CoreResult<Vec<u8>> {
    let mut child = Command::new("dot")
        .arg(format!("-T{}", format))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CoreError::persistence(format!("failed to run graphviz dot: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| CoreError::persistence("dot stdin unavailable"))?;
    stdin
        .write_all(dot.as_bytes())
        .await
        .map_err(|e| CoreError::persistence(format!("failed to write to dot: {}", e)))?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CoreError::persistence(format!("dot did not finish: {}", e)))?;
    if !output.status.success() {
        return Err(CoreError::persistence(format!(
            "dot exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(output.stdout)
}

impl MeetingEngine {
    pub async fn export_meeting(
        &self,
        meeting_id: &str,
        format: MeetingExportFormat,
    ) -> CoreResult<String> {
        let meeting = self.load_required(meeting_id).await?;
        match format {
            MeetingExportFormat::Markdown => Ok(meeting_markdown(&meeting)),
            MeetingExportFormat::Json => serde_json::to_string_pretty(&meeting)
                .map_err(|e| CoreError::persistence(format!("serialize meeting: {}", e))),
        }
    }

    pub async fn export_mind_map(
        &self,
        meeting_id: &str,
        format: MindMapExportFormat,
    ) -> CoreResult<Vec<u8>> {
        let meeting = self.load_required(meeting_id).await?;
        let map = meeting
            .mind_map
            .as_ref()
            .ok_or_else(|| CoreError::not_found("mind map", meeting_id))?;

        match format {
            MindMapExportFormat::Json => serde_json::to_vec_pretty(map)
                .map_err(|e| CoreError::persistence(format!("serialize mind map: {}", e))),
            MindMapExportFormat::Markdown => Ok(mind_map_markdown(map).into_bytes()),
            MindMapExportFormat::Svg => render_dot(&mind_map_dot(map), "svg").await,
            MindMapExportFormat::Png => render_dot(&mind_map_dot(map), "png").await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::meeting::TurnMode;
    use crate::models::{Meeting, MindMapNode};
    use crate::testing::ScriptedResponse;
    use chrono::Utc;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_meeting_markdown_layout() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "Opening question")
            .await
            .unwrap();
        harness.script("Alice", vec![ScriptedResponse::Text("Answer.".to_string())]);
        harness
            .engine
            .request_turn(&meeting.id, "alice", TurnMode::Blocking)
            .await
            .unwrap();

        let markdown = harness
            .engine
            .export_meeting(&meeting.id, MeetingExportFormat::Markdown)
            .await
            .unwrap();
        assert!(markdown.starts_with("# Test meeting"));
        assert!(markdown.contains("- **Alice** (Alice Role)"));
        assert!(markdown.contains("## 0 · User ·"));
        assert!(markdown.contains("## 0 · Alice ·"));
        assert!(markdown.contains("Answer."));
    }

    #[tokio::test]
    async fn test_json_export_round_trips() {
        let harness = TestHarness::new().await;
        let meeting = harness.create_meeting(&["Alice"]).await;
        harness
            .engine
            .add_user_message(&meeting.id, "hello @Alice")
            .await
            .unwrap();

        let json = harness
            .engine
            .export_meeting(&meeting.id, MeetingExportFormat::Json)
            .await
            .unwrap();
        let imported: Meeting = serde_json::from_str(&json).unwrap();
        let stored = harness.engine.get_meeting(&meeting.id).await.unwrap();
        assert_eq!(imported, stored);
    }

    fn sample_map() -> MindMap {
        let mut root = MindMapNode::new("root", "Topic", 0);
        let mut child = MindMapNode::new("n1", "Point", 1);
        let mut leaf = MindMapNode::new("n2", "Detail", 2);
        child.parent_id = Some("root".to_string());
        leaf.parent_id = Some("n1".to_string());
        root.children_ids.push("n1".to_string());
        child.children_ids.push("n2".to_string());
        leaf.message_references = vec![
            "m1".to_string(),
            "m2".to_string(),
            "m3".to_string(),
            "m4".to_string(),
        ];

        let mut nodes = HashMap::new();
        nodes.insert("root".to_string(), root.clone());
        nodes.insert("n1".to_string(), child);
        nodes.insert("n2".to_string(), leaf);
        MindMap {
            id: "mm".to_string(),
            meeting_id: "mtg".to_string(),
            root_node: root,
            nodes,
            version: 1,
            created_at: Utc::now(),
            created_by: "user".to_string(),
        }
    }

    #[test]
    fn test_mind_map_markdown_nesting_and_refs() {
        let markdown = mind_map_markdown(&sample_map());
        assert!(markdown.starts_with("# Topic"));
        assert!(markdown.contains("- Point"));
        assert!(markdown.contains("  - Detail"));
        assert!(markdown.contains("*messages: m1, m2, m3 (+1 more)*"));
    }

    #[test]
    fn test_dot_contains_every_node_and_edge_once() {
        let dot = mind_map_dot(&sample_map());
        for id in ["root", "n1", "n2"] {
            assert_eq!(dot.matches(&format!("\"{}\" [label", id)).count(), 1, "{}", id);
        }
        assert_eq!(dot.matches("\"root\" -> \"n1\";").count(), 1);
        assert_eq!(dot.matches("\"n1\" -> \"n2\";").count(), 1);
        assert_eq!(dot.matches("->").count(), 2);
    }

    #[test]
    fn test_dot_escapes_quotes() {
        let mut map = sample_map();
        map.nodes.get_mut("n1").unwrap().content = "Say \"hi\"".to_string();
        let dot = mind_map_dot(&map);
        assert!(dot.contains("Say \\\"hi\\\""));
    }
}
