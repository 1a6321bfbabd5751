pub mod error;
pub mod model;
pub mod provider;
pub mod request;

pub use error::Error;
pub use model::{LanguageModel, LanguageModelBackend};
pub use provider::{LanguageModelProvider, LanguageModelProviderBackend};
pub use request::{GenerateOptions, GenerateRequest, Message, RequestBuilder, Role, request};
