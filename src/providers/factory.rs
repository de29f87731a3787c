use std::sync::Arc;

use crate::models::{ModelConfig, Provider};
use crate::providers::{
    AnthropicAdapter, GoogleAdapter, OpenAiCompatibleAdapter, ProviderError,
};
use crate::traits::ModelAdapter;

/// Seam for adapter construction, so tests can script providers while the
/// engine defaults to the live transports.
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, ProviderError>;
}

/// Production factory: real HTTP transports keyed on the provider tag.
#[derive(Default)]
pub struct LiveAdapterFactory;

impl AdapterFactory for LiveAdapterFactory {
    fn adapter_for(&self, config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
        adapter_for(config)
    }
}

/// Build the adapter for an agent's model configuration, keyed on the
/// provider tag. Adapters are cheap to build and safe for concurrent use, so
/// callers construct one per turn and share nothing.
pub fn adapter_for(config: &ModelConfig) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
    let adapter: Arc<dyn ModelAdapter> = match config.provider {
        Provider::Openai => Arc::new(OpenAiCompatibleAdapter::new(
            OpenAiCompatibleAdapter::OPENAI_BASE_URL,
            &config.api_key,
            &config.model_name,
        )?),
        Provider::Glm => Arc::new(OpenAiCompatibleAdapter::new(
            OpenAiCompatibleAdapter::GLM_BASE_URL,
            &config.api_key,
            &config.model_name,
        )?),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(
            AnthropicAdapter::BASE_URL,
            &config.api_key,
            &config.model_name,
        )?),
        Provider::Google => Arc::new(GoogleAdapter::new(
            GoogleAdapter::BASE_URL,
            &config.api_key,
            &config.model_name,
        )?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_provider_tag_resolves() {
        for provider in [
            Provider::Openai,
            Provider::Anthropic,
            Provider::Google,
            Provider::Glm,
        ] {
            let config = ModelConfig {
                provider,
                model_name: "m".to_string(),
                api_key: "k".to_string(),
                parameters: None,
            };
            assert!(adapter_for(&config).is_ok(), "{:?}", provider);
        }
    }
}
