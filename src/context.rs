//! Prompt-context assembly for a speaker's turn.
//!
//! Produces the `(system_prompt, conversation)` pair handed to a model
//! adapter: the speaker's role and behavioral guidance as the system prompt,
//! and a conversation that opens with a meeting-context system entry followed
//! by the transcript. Once minutes exist they compress everything before
//! their creation time, bounding prompt growth.

use crate::models::{
    Agent, ConversationMessage, ConversationRole, DiscussionStyle, Meeting, SpeakerType,
    SpeakingLength,
};

/// How many trailing messages are scanned for mentions of the speaker.
const MENTION_NOTICE_WINDOW: usize = 5;

fn style_guidance(style: DiscussionStyle) -> &'static str {
    match style {
        DiscussionStyle::Formal => "Keep the discussion formal and professional.",
        DiscussionStyle::Casual => "Use a relaxed, friendly discussion style.",
        DiscussionStyle::Debate => {
            "Use a debate style: state your position clearly and support it with arguments."
        }
    }
}

fn length_guidance(length: SpeakingLength) -> &'static str {
    match length {
        SpeakingLength::Brief => "Keep your contributions short and to the point.",
        SpeakingLength::Moderate => "Elaborate moderately, providing necessary detail.",
        SpeakingLength::Detailed => {
            "Elaborate in detail, with thorough analysis and examples."
        }
    }
}

const MODERATOR_DUTIES: &str = "As the meeting moderator, your responsibilities are:\n\
1. Guide the discussion along the agenda\n\
2. Make sure every participant gets a chance to speak\n\
3. Summarize key points and decisions\n\
4. Redirect the conversation when it drifts off topic\n\
5. Drive the meeting toward a conclusion";

/// Compose the speaker's system prompt: role block, discussion style, length
/// preference, and moderator duties when the speaker moderates the meeting.
pub fn build_system_prompt(speaker: &Agent, meeting: &Meeting) -> String {
    let mut parts = vec![
        format!("Your role: {}", speaker.role.name),
        format!("Role description: {}", speaker.role.description),
        speaker.role.system_prompt.clone(),
        style_guidance(meeting.config.discussion_style).to_string(),
    ];

    if let Some(length) = meeting.config.speaking_length_preferences.get(&speaker.id) {
        parts.push(length_guidance(*length).to_string());
    }

    if meeting.is_moderator(&speaker.id) {
        parts.push(MODERATOR_DUTIES.to_string());
    }

    parts.join("\n\n")
}

/// The meeting-context system entry: topic, moderator, participants, agenda
/// status, the current conclusion, and a notice when the speaker was
/// mentioned recently.
fn build_meeting_context(meeting: &Meeting, speaker: &Agent) -> String {
    let mut parts = vec![format!("Meeting topic: {}", meeting.topic)];

    parts.push(format!("Moderator: {}", meeting.moderator_name()));

    let listing: Vec<String> = meeting
        .participants
        .iter()
        .map(|p| format!("- {} ({})", p.name, p.role.name))
        .collect();
    parts.push(format!("Participants:\n{}", listing.join("\n")));

    if !meeting.agenda.is_empty() {
        let items: Vec<String> = meeting
            .agenda
            .iter()
            .map(|item| {
                let marker = if item.completed { "✓" } else { "○" };
                format!("{} {}: {}", marker, item.title, item.description)
            })
            .collect();
        parts.push(format!("Agenda:\n{}", items.join("\n")));
    }

    if let Some(minutes) = meeting.latest_minutes() {
        parts.push(format!("Current meeting conclusion:\n{}", minutes.summary));
    }

    let recently_mentioned = meeting
        .messages
        .iter()
        .rev()
        .take(MENTION_NOTICE_WINDOW)
        .flat_map(|m| m.mentions.iter())
        .any(|m| m.mentioned_participant_id == speaker.id);
    if recently_mentioned {
        parts.push(
            "Note: you were mentioned in the recent discussion; please respond to it.".to_string(),
        );
    }

    parts.join("\n\n")
}

fn transcript_entry(speaker_type: SpeakerType, speaker_name: &str, content: &str) -> ConversationMessage {
    let role = match speaker_type {
        SpeakerType::User => ConversationRole::User,
        SpeakerType::Agent => ConversationRole::Assistant,
    };
    ConversationMessage::new(role, format!("{}: {}", speaker_name, content))
}

/// Compose the conversation for a speaker's turn.
///
/// Every transcript entry is prefixed with the speaker's name so the model
/// can tell multiple assistants apart after the provider's role taxonomy
/// collapses them all to `assistant`.
pub fn build_conversation(meeting: &Meeting, speaker: &Agent) -> Vec<ConversationMessage> {
    let mut conversation = vec![ConversationMessage::new(
        ConversationRole::System,
        build_meeting_context(meeting, speaker),
    )];

    if let Some(minutes) = meeting.latest_minutes() {
        conversation.push(ConversationMessage::new(
            ConversationRole::System,
            format!(
                "Meeting minutes (as of {}):\n{}",
                minutes.created_at.format("%Y-%m-%d %H:%M:%S"),
                minutes.content
            ),
        ));
        for msg in meeting
            .messages
            .iter()
            .filter(|m| m.timestamp > minutes.created_at)
        {
            conversation.push(transcript_entry(msg.speaker_type, &msg.speaker_name, &msg.content));
        }
    } else {
        for msg in &meeting.messages {
            conversation.push(transcript_entry(msg.speaker_type, &msg.speaker_name, &msg.content));
        }
    }

    conversation
}
