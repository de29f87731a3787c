//! Shared harness for engine tests: in-memory store + scripted adapters
//! wired into a real `MeetingEngine`.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::models::{
    Agent, Meeting, MeetingConfig, MeetingStatus, ModelConfig, Moderator, Provider, Role,
};
use crate::store::MemoryStore;
use crate::testing::{ScriptedAdapter, ScriptedFactory, ScriptedResponse};
use crate::traits::EntityStore;

use super::{MeetingEngine, NewMeeting};

pub(crate) struct TestHarness {
    pub engine: MeetingEngine,
    pub store: Arc<MemoryStore>,
    pub factory: Arc<ScriptedFactory>,
}

/// Deterministic agent: id is the lowercased name, model name is
/// `model-<name>` so each agent scripts independently via the factory.
pub(crate) fn test_agent(name: &str) -> Agent {
    Agent {
        id: name.to_lowercase(),
        name: name.to_string(),
        role: Role {
            name: format!("{} Role", name),
            description: format!("{} the participant", name),
            system_prompt: format!("You are {}.", name),
        },
        model_config: ModelConfig {
            provider: Provider::Openai,
            model_name: format!("model-{}", name),
            api_key: "test-key".to_string(),
            parameters: None,
        },
    }
}

impl TestHarness {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let factory = Arc::new(ScriptedFactory::new());
        let engine = MeetingEngine::new(store.clone(), factory.clone(), EngineConfig::default());
        Self {
            engine,
            store,
            factory,
        }
    }

    /// Script the responses for one agent (by name). Returns the adapter for
    /// inspection.
    pub fn script(&self, name: &str, responses: Vec<ScriptedResponse>) -> Arc<ScriptedAdapter> {
        self.factory.register(
            &format!("model-{}", name),
            ScriptedAdapter::with_responses(responses),
        )
    }

    pub async fn create_meeting(&self, names: &[&str]) -> Meeting {
        self.create_meeting_with(names, |_| {}).await
    }

    pub async fn create_meeting_with(
        &self,
        names: &[&str],
        customize: impl FnOnce(&mut NewMeeting),
    ) -> Meeting {
        let mut participant_ids = Vec::new();
        for name in names {
            let agent = test_agent(name);
            self.store.save_agent(&agent).await.unwrap();
            participant_ids.push(agent.id);
        }
        let mut new_meeting = NewMeeting {
            topic: "Test meeting".to_string(),
            participant_ids,
            moderator: Moderator::User,
            agenda: vec![],
            config: MeetingConfig::default(),
        };
        customize(&mut new_meeting);
        self.engine.create_meeting(new_meeting).await.unwrap()
    }

    pub async fn status(&self, meeting_id: &str) -> MeetingStatus {
        self.engine.get_meeting(meeting_id).await.unwrap().status
    }
}
