//! Agent management: the registry of AI participants available to meetings.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Agent, MeetingStatus, ModelConfig, Role};
use crate::providers::AdapterFactory;
use crate::traits::EntityStore;

/// Fields accepted when creating an agent.
#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub role: Role,
    pub model_config: ModelConfig,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub model_config: Option<ModelConfig>,
}

pub struct AgentRegistry {
    store: Arc<dyn EntityStore>,
    adapters: Arc<dyn AdapterFactory>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn EntityStore>, adapters: Arc<dyn AdapterFactory>) -> Self {
        Self { store, adapters }
    }

    pub async fn create_agent(&self, new_agent: NewAgent) -> CoreResult<Agent> {
        let agent = Agent {
            id: Uuid::new_v4().to_string(),
            name: new_agent.name.trim().to_string(),
            role: new_agent.role,
            model_config: new_agent.model_config,
        };
        agent.validate()?;
        self.store
            .save_agent(&agent)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?;
        info!(agent_id = %agent.id, name = %agent.name, "Created agent");
        Ok(agent)
    }

    pub async fn get_agent(&self, agent_id: &str) -> CoreResult<Agent> {
        self.store
            .load_agent(agent_id)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?
            .ok_or_else(|| CoreError::not_found("agent", agent_id))
    }

    pub async fn list_agents(&self) -> CoreResult<Vec<Agent>> {
        self.store
            .list_agents()
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))
    }

    pub async fn update_agent(&self, agent_id: &str, update: AgentUpdate) -> CoreResult<Agent> {
        let mut agent = self.get_agent(agent_id).await?;
        if let Some(name) = update.name {
            agent.name = name.trim().to_string();
        }
        if let Some(role) = update.role {
            agent.role = role;
        }
        if let Some(model_config) = update.model_config {
            agent.model_config = model_config;
        }
        agent.validate()?;
        self.store
            .save_agent(&agent)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?;
        info!(agent_id = %agent.id, "Updated agent");
        Ok(agent)
    }

    /// Delete an agent. Refused while the agent participates in any
    /// non-ended meeting; ending or deleting those meetings first is the
    /// caller's job.
    pub async fn delete_agent(&self, agent_id: &str) -> CoreResult<()> {
        // Ensure it exists so unknown ids surface as NotFound.
        self.get_agent(agent_id).await?;

        let meetings = self
            .store
            .list_meetings()
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?;
        if let Some(meeting) = meetings.iter().find(|m| {
            m.status != MeetingStatus::Ended && m.participant(agent_id).is_some()
        }) {
            return Err(CoreError::validation(
                "agent_id",
                format!(
                    "Agent {} is a participant in meeting {} ({}); end the meeting first",
                    agent_id,
                    meeting.id,
                    meeting.status.as_str()
                ),
            ));
        }

        self.store
            .delete_agent(agent_id)
            .await
            .map_err(|e| CoreError::persistence(e.to_string()))?;
        info!(agent_id, "Deleted agent");
        Ok(())
    }

    /// Probe the agent's provider with a minimal request.
    pub async fn test_connection(&self, agent_id: &str) -> CoreResult<()> {
        let agent = self.get_agent(agent_id).await?;
        let adapter = self.adapters.adapter_for(&agent.model_config)?;
        adapter.test_connection().await?;
        Ok(())
    }
}
