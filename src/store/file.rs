use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::models::{Agent, Meeting};
use crate::traits::EntityStore;

/// File-system entity store: `<base>/agents/<id>.json` and
/// `<base>/meetings/<id>.json`.
///
/// Saves write a sibling temp file and rename it into place, so a concurrent
/// reader sees either the old or the new document, never a torn one. The
/// engine's per-meeting lock keeps writes for one id from overlapping; writes
/// for distinct ids touch distinct paths and need no coordination.
pub struct FileStore {
    agents_dir: PathBuf,
    meetings_dir: PathBuf,
}

impl FileStore {
    pub async fn open(base: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base.into();
        let agents_dir = base.join("agents");
        let meetings_dir = base.join("meetings");
        tokio::fs::create_dir_all(&agents_dir).await?;
        tokio::fs::create_dir_all(&meetings_dir).await?;
        Ok(Self {
            agents_dir,
            meetings_dir,
        })
    }

    fn entity_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    async fn write_atomic<T: Serialize>(dir: &Path, id: &str, entity: &T) -> anyhow::Result<()> {
        let path = Self::entity_path(dir, id);
        let tmp = dir.join(format!("{}.json.tmp", id));
        let json = serde_json::to_vec_pretty(entity)?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_entity<T: DeserializeOwned>(dir: &Path, id: &str) -> anyhow::Result<Option<T>> {
        let path = Self::entity_path(dir, id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Load every `.json` document in `dir`, skipping corrupt files so one
    /// bad document cannot hide the rest.
    async fn read_all<T: DeserializeOwned>(dir: &Path) -> anyhow::Result<Vec<T>> {
        let mut entities = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable document: {}", e);
                    continue;
                }
            };
            match serde_json::from_slice(&raw) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    warn!(path = %path.display(), "Skipping corrupt document: {}", e);
                }
            }
        }
        Ok(entities)
    }

    async fn remove(dir: &Path, id: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(Self::entity_path(dir, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EntityStore for FileStore {
    async fn save_agent(&self, agent: &Agent) -> anyhow::Result<()> {
        Self::write_atomic(&self.agents_dir, &agent.id, agent).await
    }

    async fn load_agent(&self, agent_id: &str) -> anyhow::Result<Option<Agent>> {
        Self::read_entity(&self.agents_dir, agent_id).await
    }

    async fn list_agents(&self) -> anyhow::Result<Vec<Agent>> {
        Self::read_all(&self.agents_dir).await
    }

    async fn delete_agent(&self, agent_id: &str) -> anyhow::Result<()> {
        Self::remove(&self.agents_dir, agent_id).await
    }

    async fn save_meeting(&self, meeting: &Meeting) -> anyhow::Result<()> {
        Self::write_atomic(&self.meetings_dir, &meeting.id, meeting).await
    }

    async fn load_meeting(&self, meeting_id: &str) -> anyhow::Result<Option<Meeting>> {
        Self::read_entity(&self.meetings_dir, meeting_id).await
    }

    async fn list_meetings(&self) -> anyhow::Result<Vec<Meeting>> {
        Self::read_all(&self.meetings_dir).await
    }

    async fn delete_meeting(&self, meeting_id: &str) -> anyhow::Result<()> {
        Self::remove(&self.meetings_dir, meeting_id).await
    }
}
