//! `@`-mention extraction.
//!
//! Deterministic, regex-driven: a mention token is `@` followed by either a
//! quoted name (`@"Bob Smith"`) or a run of non-whitespace characters
//! (`@Alice`, `@Alice,`). Captured names match participants case-sensitively
//! by agent name first, then by role name. Punctuation directly after an
//! unquoted name is tolerated. Each participant is mentioned at most once per
//! message; the first occurrence wins and document order is preserved.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Agent, Mention};

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"@(?:"([^"]+)"|(\S+))"#).expect("mention regex is valid"));

/// Parse the mentions in `content`, resolved against `participants`.
///
/// The returned mentions carry an empty `message_id`; the turn engine fills
/// it in when the carrying message is created.
pub fn parse_mentions(content: &str, participants: &[Agent]) -> Vec<Mention> {
    let mut mentions: Vec<Mention> = Vec::new();

    for caps in MENTION_RE.captures_iter(content) {
        let (token, quoted) = match (caps.get(1), caps.get(2)) {
            (Some(q), _) => (q.as_str(), true),
            (_, Some(w)) => (w.as_str(), false),
            _ => continue,
        };

        let matched = match_participant(token, quoted, participants);
        if let Some(participant) = matched {
            if mentions
                .iter()
                .any(|m| m.mentioned_participant_id == participant.id)
            {
                continue;
            }
            mentions.push(Mention {
                mentioned_participant_id: participant.id.clone(),
                mentioned_participant_name: participant.name.clone(),
                message_id: String::new(),
            });
        }
    }

    mentions
}

fn match_participant<'a>(token: &str, quoted: bool, participants: &'a [Agent]) -> Option<&'a Agent> {
    // Exact agent name, then exact role name.
    if let Some(p) = participants.iter().find(|p| p.name == token) {
        return Some(p);
    }
    if let Some(p) = participants.iter().find(|p| p.role.name == token) {
        return Some(p);
    }
    if quoted {
        return None;
    }

    // Unquoted tokens may carry trailing punctuation ("@Alice,"). Accept a
    // participant whose name is a prefix of the token when the tail starts
    // with a non-alphanumeric character; prefer the longest such name so
    // "Alice" beats "Al".
    participants
        .iter()
        .filter(|p| name_prefix_matches(token, &p.name) || name_prefix_matches(token, &p.role.name))
        .max_by_key(|p| p.name.len())
}

fn name_prefix_matches(token: &str, name: &str) -> bool {
    if name.is_empty() || !token.starts_with(name) {
        return false;
    }
    token[name.len()..]
        .chars()
        .next()
        .map(|c| !c.is_alphanumeric())
        .unwrap_or(false)
}
