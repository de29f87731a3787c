//! Per-meeting event fan-out.
//!
//! Every subscriber gets its own bounded buffer so a slow consumer can never
//! block the turn engine: when a buffer overflows the subscriber is evicted
//! and its stream ends with one terminal [`MeetingEvent::Lagged`]. Subscribers
//! join at any time and only see events produced after they joined; catch-up
//! is the consumer's concern (reload the meeting).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::models::MeetingStatus;
use crate::traits::StreamDelta;

/// Default per-subscriber buffer size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeetingEvent {
    NewMessage {
        message_id: String,
    },
    StatusChange {
        status: MeetingStatus,
    },
    StreamingDelta {
        speaker_id: String,
        delta: StreamDelta,
    },
    MinutesGenerated {
        version: u32,
    },
    MindMapGenerated {
        version: u32,
    },
    TurnFailed {
        speaker_id: String,
        kind: String,
        message: String,
    },
    /// Terminal: this subscriber fell behind and was dropped.
    Lagged,
}

struct Subscriber {
    tx: mpsc::Sender<MeetingEvent>,
    lagged: Arc<AtomicBool>,
}

/// Receiving half of a subscription. The stream ends (`None`) when the
/// meeting is removed or the hub is dropped; a lagged subscriber sees one
/// final [`MeetingEvent::Lagged`] first.
pub struct EventSubscriber {
    rx: mpsc::Receiver<MeetingEvent>,
    lagged: Arc<AtomicBool>,
    finished: bool,
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<MeetingEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.finished = true;
                if self.lagged.load(Ordering::Acquire) {
                    Some(MeetingEvent::Lagged)
                } else {
                    None
                }
            }
        }
    }
}

/// Per-meeting pub-sub registry.
pub struct MeetingHub {
    buffer_capacity: usize,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl MeetingHub {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity: buffer_capacity.max(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, meeting_id: &str) -> EventSubscriber {
        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        let lagged = Arc::new(AtomicBool::new(false));
        self.subscribers
            .write()
            .await
            .entry(meeting_id.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                lagged: lagged.clone(),
            });
        EventSubscriber {
            rx,
            lagged,
            finished: false,
        }
    }

    /// Deliver `event` to every live subscriber of `meeting_id`. Never
    /// blocks: a subscriber whose buffer is full is marked lagged and
    /// evicted.
    pub async fn publish(&self, meeting_id: &str, event: MeetingEvent) {
        let mut map = self.subscribers.write().await;
        let Some(subs) = map.get_mut(meeting_id) else {
            return;
        };
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(meeting_id, "Dropping lagged event subscriber");
                sub.lagged.store(true, Ordering::Release);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(meeting_id, "Removing closed event subscriber");
                false
            }
        });
        if subs.is_empty() {
            map.remove(meeting_id);
        }
    }

    /// Drop every subscriber of a meeting (meeting deleted). Their streams
    /// end cleanly.
    pub async fn remove_meeting(&self, meeting_id: &str) {
        self.subscribers.write().await.remove(meeting_id);
    }

    /// Number of live subscribers for a meeting.
    pub async fn subscriber_count(&self, meeting_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(meeting_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

impl Default for MeetingHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}
