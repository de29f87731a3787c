use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One version of a meeting's minutes. Versions are append-only and strictly
/// increasing per meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingMinutes {
    pub id: String,
    /// 1-origin, `previous.version + 1`.
    pub version: u32,
    /// Full minutes text as returned by the generator (or as edited).
    pub content: String,
    /// Short summary used to compress history in later prompt contexts.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_decisions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// `"user"` or the generating participant's id.
    pub created_by: String,
}
