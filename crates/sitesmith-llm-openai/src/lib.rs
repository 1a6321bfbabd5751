mod client;
mod convert;
mod types;

use sitesmith_llm::request::GenerateRequest;
use sitesmith_llm::{
    Error, LanguageModel, LanguageModelBackend, LanguageModelProvider,
    LanguageModelProviderBackend,
};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL_ID: &str = "deepseek-chat";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Configuration for a Chat Completions compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

impl OpenAIConfig {
    /// Structural check on the credentials. Keys are `sk-` prefixed; anything
    /// else will never authenticate, so it is rejected before any request.
    pub fn validate(&self) -> Result<(), Error> {
        let key = self.api_key.trim();
        if key.is_empty() {
            return Err(Error::Configuration("api key is not configured".into()));
        }
        if !key.starts_with("sk-") {
            return Err(Error::Configuration(
                "api key appears to be malformed (expected an `sk-` prefix)".into(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Configuration(format!(
                "base url is not http(s): {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Create a provider with the given config.
pub fn provider(config: OpenAIConfig) -> LanguageModelProvider {
    LanguageModelProvider::new(OpenAIProvider {
        state: Arc::new(ProviderState {
            client: reqwest::Client::new(),
            config: OpenAIConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        }),
    })
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct ProviderState {
    client: reqwest::Client,
    config: OpenAIConfig,
}

struct OpenAIProvider {
    state: Arc<ProviderState>,
}

impl LanguageModelProviderBackend for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self, model_id: &str) -> LanguageModel {
        LanguageModel::new(OpenAIModel {
            model_id: model_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct OpenAIModel {
    model_id: String,
    state: Arc<ProviderState>,
}

#[async_trait::async_trait]
impl LanguageModelBackend for OpenAIModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, Error> {
        self.state.config.validate()?;
        let body = convert::to_chat_request(&self.model_id, &request);
        client::complete(&self.state, &body, request.options.timeout).await
    }
}
