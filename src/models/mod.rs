//! Domain aggregates: agents, meetings, messages, minutes, mind-maps.
//!
//! Everything here round-trips through serde unchanged; validation happens at
//! write time (construction / engine operations), never on load, so documents
//! saved by older builds keep loading.

mod agent;
mod meeting;
mod message;
mod mind_map;
mod minutes;

pub use agent::{Agent, ModelConfig, ModelParameters, Provider, Role};
pub use meeting::{
    AgendaItem, DiscussionStyle, Meeting, MeetingConfig, MeetingStatus, Moderator, SpeakingLength,
    SpeakingOrder,
};
pub use message::{
    ConversationMessage, ConversationRole, Mention, Message, SpeakerType, USER_MESSAGE_MAX_CHARS,
};
pub use mind_map::{MindMap, MindMapNode};
pub use minutes::MeetingMinutes;
