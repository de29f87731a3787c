use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Agent, Meeting};
use crate::traits::EntityStore;

/// In-memory entity store for tests and embedded use. Documents are cloned
/// in and out, so callers never observe shared mutation.
#[derive(Default)]
pub struct MemoryStore {
    agents: RwLock<HashMap<String, Agent>>,
    meetings: RwLock<HashMap<String, Meeting>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn save_agent(&self, agent: &Agent) -> anyhow::Result<()> {
        self.agents
            .write()
            .await
            .insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn load_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>> {
        Ok(self.agents.read().await.values().cloned().collect())
    }

    async fn delete_agent(&self, agent_id: &str) -> anyhow::Result<()> {
        self.agents.write().await.remove(agent_id);
        Ok(())
    }

    async fn save_meeting(&self, meeting: &Meeting) -> anyhow::Result<()> {
        self.meetings
            .write()
            .await
            .insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn load_meeting(&self, meeting_id: &str) -> anyhow::Result<Option<Meeting>> {
        Ok(self.meetings.read().await.get(meeting_id).cloned())
    }

    async fn list_meetings(&self) -> anyhow::Result<Vec<Meeting>> {
        Ok(self.meetings.read().await.values().cloned().collect())
    }

    async fn delete_meeting(&self, meeting_id: &str) -> anyhow::Result<()> {
        self.meetings.write().await.remove(meeting_id);
        Ok(())
    }
}
