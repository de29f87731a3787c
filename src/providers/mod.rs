//! Concrete model-provider transports behind the [`ModelAdapter`] trait.
//!
//! One adapter per wire format: the OpenAI-compatible chat-completions API
//! (used by both OpenAI and GLM), the Anthropic messages API, and the Google
//! GenAI API. All of them speak SSE for streaming.

mod anthropic;
mod error;
mod factory;
mod google;
mod openai_compatible;
mod sse;

pub use anthropic::AnthropicAdapter;
pub use error::{ProviderError, ProviderErrorKind};
pub use factory::{adapter_for, AdapterFactory, LiveAdapterFactory};
pub use google::GoogleAdapter;
pub use openai_compatible::OpenAiCompatibleAdapter;

use std::time::Duration;

/// Default deadline for one-shot completions.
pub const COMPLETE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default deadline for streaming responses (covers the whole stream).
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-subscriber buffer between the SSE reader task and the delta consumer.
pub(crate) const DELTA_CHANNEL_CAPACITY: usize = 64;

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::network(&e))
}
