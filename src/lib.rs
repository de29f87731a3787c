//! Multi-participant AI meeting orchestration.
//!
//! The engine owns a meeting's lifecycle: it selects speakers, assembles each
//! speaker's prompt context, streams model output to subscribers with
//! cancellation, resolves `@`-mentions into follow-up turns, serializes turn
//! execution per meeting, and persists immutable message history along with
//! two derived artifacts (versioned minutes and a mind-map tree).
//!
//! The HTTP/WebSocket boundary, UI and CLI live outside this crate. They talk
//! to [`meeting::MeetingEngine`] and [`agents::AgentRegistry`], and consume
//! events through [`hub::MeetingHub`] subscriptions.

pub mod agents;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod meeting;
pub mod mentions;
pub mod models;
pub mod providers;
pub mod retry;
pub mod store;
pub mod testing;
pub mod traits;
pub mod utils;
