//! Next-speaker selection.
//!
//! Mentions override rotation for exactly one hop; otherwise a requested
//! round walks the full participant list, rotated (sequential) or permuted
//! (random). Without either, nothing auto-chains.

use rand::seq::SliceRandom;

use crate::models::{Meeting, Message, SpeakingOrder};

/// Participant ids mentioned by `message`, in mention order, restricted to
/// current participants of `meeting`.
pub fn mentioned_participant_ids(meeting: &Meeting, message: &Message) -> Vec<String> {
    message
        .mentions
        .iter()
        .filter(|m| meeting.participant(&m.mentioned_participant_id).is_some())
        .map(|m| m.mentioned_participant_id.clone())
        .collect()
}

/// Ordered list of the next speakers to run.
///
/// 1. Mentions in the reference message win, in mention order.
/// 2. A requested round returns every participant: rotated to start just
///    after the most recent AI speaker for sequential order, a uniform
///    permutation for random order.
/// 3. Otherwise nobody speaks automatically.
pub fn select_next_speakers(
    meeting: &Meeting,
    reference: Option<&Message>,
    round_requested: bool,
) -> Vec<String> {
    if let Some(message) = reference {
        let mentioned = mentioned_participant_ids(meeting, message);
        if !mentioned.is_empty() {
            return mentioned;
        }
    }

    if !round_requested {
        return Vec::new();
    }

    let mut ids: Vec<String> = meeting.participants.iter().map(|p| p.id.clone()).collect();
    match meeting.config.speaking_order {
        SpeakingOrder::Sequential => {
            if let Some(last) = meeting.last_agent_message() {
                if let Some(idx) = meeting
                    .participants
                    .iter()
                    .position(|p| p.id == last.speaker_id)
                {
                    let len = ids.len();
                    ids.rotate_left((idx + 1) % len);
                }
            }
            ids
        }
        SpeakingOrder::Random => {
            ids.shuffle(&mut rand::thread_rng());
            ids
        }
    }
}
