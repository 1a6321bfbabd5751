use crate::error::Error;
use crate::request::GenerateRequest;

/// A concrete, type-erased language model handle.
///
/// Wraps a [`LanguageModelBackend`] so callers never need generics.
pub struct LanguageModel {
    inner: Box<dyn LanguageModelBackend>,
}

impl LanguageModel {
    /// Wrap any backend implementation into a model.
    pub fn new(backend: impl LanguageModelBackend + 'static) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    /// The model identifier (e.g. `"deepseek-chat"`, `"deepseek-coder"`).
    pub fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    /// The provider name this model belongs to.
    pub fn provider(&self) -> &str {
        self.inner.provider()
    }

    /// Run one generation call and return the raw text, uninterpreted.
    ///
    /// This is a single attempt. Retrying is the caller's business.
    pub async fn generate(&self, request: impl Into<GenerateRequest>) -> Result<String, Error> {
        self.inner.generate(request.into()).await
    }
}

/// Trait that provider crates implement for a specific model.
#[async_trait::async_trait]
pub trait LanguageModelBackend: Send + Sync {
    fn model_id(&self) -> &str;
    fn provider(&self) -> &str;
    async fn generate(&self, request: GenerateRequest) -> Result<String, Error>;
}
