//! Local generation backend speaking Ollama's single-prompt `/api/generate`.
//!
//! The endpoint has no notion of roles, so the conversation is flattened
//! into one prompt: system text first, then `User:` / `Assistant:` turns,
//! ending with an open `Assistant:` cue.

use serde::{Deserialize, Serialize};
use sitesmith_llm::request::{GenerateRequest, Message, Role};
use sitesmith_llm::{
    Error, LanguageModel, LanguageModelBackend, LanguageModelProvider,
    LanguageModelProviderBackend,
};
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL_ID: &str = "deepseek-coder";

/// Configuration for the local provider.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

/// Create a local provider with the given config.
pub fn provider(config: OllamaConfig) -> LanguageModelProvider {
    LanguageModelProvider::new(OllamaProvider {
        state: Arc::new(ProviderState {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }),
    })
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateBody {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<SamplingOptions>,
}

#[derive(Debug, Serialize)]
struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    response: Option<String>,
}

/// Flatten a role-tagged conversation into a single prompt string.
pub fn flatten_prompt(messages: &[Message]) -> String {
    let mut system = Vec::new();
    let mut turns = Vec::new();
    for m in messages {
        match m.role {
            Role::System => system.push(m.content.as_str()),
            Role::User => turns.push(format!("User: {}", m.content)),
            Role::Assistant => turns.push(format!("Assistant: {}", m.content)),
        }
    }

    let mut prompt = system.join("\n");
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str(&turns.join("\n\n"));
    prompt.push_str("\n\nAssistant:");
    prompt
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct ProviderState {
    client: reqwest::Client,
    base_url: String,
}

struct OllamaProvider {
    state: Arc<ProviderState>,
}

impl LanguageModelProviderBackend for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self, model_id: &str) -> LanguageModel {
        LanguageModel::new(OllamaModel {
            model_id: model_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct OllamaModel {
    model_id: String,
    state: Arc<ProviderState>,
}

#[async_trait::async_trait]
impl LanguageModelBackend for OllamaModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, Error> {
        let opts = &request.options;
        let body = GenerateBody {
            model: self.model_id.clone(),
            prompt: flatten_prompt(&request.messages),
            stream: false,
            options: Some(SamplingOptions {
                temperature: opts.temperature,
                top_p: opts.top_p,
                num_predict: opts.max_tokens,
            }),
        };

        let url = format!("{}/api/generate", self.state.base_url);
        let mut req = self.state.client.post(&url).json(&body);
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }

        tracing::debug!(model = %self.model_id, prompt_len = body.prompt.len(), "sending local generate");

        let resp = req.send().await.map_err(|e| Error::Http(Box::new(e)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                code: status.as_str().to_string(),
                message: text,
            });
        }

        let text = resp.text().await.map_err(|e| Error::Http(Box::new(e)))?;
        let reply: GenerateReply = serde_json::from_str(&text)?;
        reply
            .response
            .ok_or_else(|| Error::InvalidResponse("missing `response` field".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::flatten_prompt;
    use sitesmith_llm::Message;

    #[test]
    fn flattens_history_in_order_with_open_assistant_cue() {
        let prompt = flatten_prompt(&[
            Message::system("You build websites."),
            Message::user("a bakery site"),
            Message::assistant("<artifact></artifact>"),
            Message::user("add a menu page"),
        ]);
        assert_eq!(
            prompt,
            "You build websites.\n\nUser: a bakery site\n\nAssistant: <artifact></artifact>\n\nUser: add a menu page\n\nAssistant:"
        );
    }

    #[test]
    fn no_system_message_means_no_leading_blank_lines() {
        let prompt = flatten_prompt(&[Message::user("hi")]);
        assert_eq!(prompt, "User: hi\n\nAssistant:");
    }
}
