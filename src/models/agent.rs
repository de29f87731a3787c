use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Supported model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
    Glm,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Glm => "glm",
        }
    }
}

/// Optional sampling parameters forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// Which model an agent speaks through, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model_name: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ModelParameters>,
}

impl ModelConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(CoreError::validation("model_name", "Model name cannot be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(CoreError::validation("api_key", "API key cannot be empty"));
        }
        Ok(())
    }
}

/// Role definition for an agent: who it plays in a meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

impl Role {
    pub fn validate(&self) -> CoreResult<()> {
        require_text("role.name", &self.name, 50)?;
        require_text("role.description", &self.description, 2000)?;
        require_text("role.system_prompt", &self.system_prompt, 2000)?;
        Ok(())
    }
}

/// An AI participant: identity plus model configuration.
///
/// Meetings capture a snapshot of each participant at creation time, so later
/// edits to the registry copy do not rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub model_config: ModelConfig,
}

impl Agent {
    pub fn validate(&self) -> CoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::validation("id", "Agent id cannot be empty"));
        }
        require_text("name", &self.name, 50)?;
        self.role.validate()?;
        self.model_config.validate()?;
        Ok(())
    }
}

fn require_text(field: &str, value: &str, max_chars: usize) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(
            field,
            format!("{} cannot be empty", field),
        ));
    }
    if value.chars().count() > max_chars {
        return Err(CoreError::validation(
            field,
            format!("{} must be {} characters or less", field, max_chars),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent() -> Agent {
        Agent {
            id: "a1".to_string(),
            name: "Alice".to_string(),
            role: Role {
                name: "Analyst".to_string(),
                description: "Looks at numbers".to_string(),
                system_prompt: "You are an analyst.".to_string(),
            },
            model_config: ModelConfig {
                provider: Provider::Anthropic,
                model_name: "claude-test".to_string(),
                api_key: "sk-test".to_string(),
                parameters: None,
            },
        }
    }

    #[test]
    fn test_valid_agent_passes() {
        assert!(sample_agent().validate().is_ok());
    }

    #[test]
    fn test_name_length_bound() {
        let mut agent = sample_agent();
        agent.name = "x".repeat(51);
        assert!(agent.validate().is_err());
        agent.name = "x".repeat(50);
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let mut agent = sample_agent();
        agent.model_config.api_key = "   ".to_string();
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_provider_serde_tag() {
        let json = serde_json::to_string(&Provider::Glm).unwrap();
        assert_eq!(json, "\"glm\"");
        let back: Provider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(back, Provider::Anthropic);
    }

    #[test]
    fn test_agent_round_trip() {
        let agent = sample_agent();
        let json = serde_json::to_string(&agent).unwrap();
        let back: Agent = serde_json::from_str(&json).unwrap();
        assert_eq!(agent, back);
    }
}
