use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level request
// ---------------------------------------------------------------------------

/// A built request, consumed by `generate()`.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,
    pub options: GenerateOptions,
}

/// Knobs that control generation behavior.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    /// Per-call transport timeout. Backends apply it to the whole HTTP exchange.
    pub timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Provider-agnostic request builder.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    pub(crate) messages: Vec<Message>,
    pub(crate) options: GenerateOptions,
}

/// Convenience entry point: `sitesmith_llm::request()`.
pub fn request() -> RequestBuilder {
    RequestBuilder::default()
}

impl RequestBuilder {
    // -- messages --

    pub fn system(&mut self, text: impl Into<String>) -> &mut Self {
        self.messages.push(Message::system(text));
        self
    }

    pub fn user(&mut self, text: impl Into<String>) -> &mut Self {
        self.messages.push(Message::user(text));
        self
    }

    pub fn assistant(&mut self, text: impl Into<String>) -> &mut Self {
        self.messages.push(Message::assistant(text));
        self
    }

    pub fn message(&mut self, message: Message) -> &mut Self {
        self.messages.push(message);
        self
    }

    pub fn messages(&mut self, messages: impl IntoIterator<Item = Message>) -> &mut Self {
        self.messages.extend(messages);
        self
    }

    // -- options --

    pub fn temperature(&mut self, t: f32) -> &mut Self {
        self.options.temperature = Some(t);
        self
    }

    pub fn max_tokens(&mut self, n: u32) -> &mut Self {
        self.options.max_tokens = Some(n);
        self
    }

    pub fn top_p(&mut self, p: f32) -> &mut Self {
        self.options.top_p = Some(p);
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.timeout = Some(timeout);
        self
    }

    // -- build --

    pub fn build(self) -> GenerateRequest {
        self.into()
    }
}

impl From<RequestBuilder> for GenerateRequest {
    fn from(b: RequestBuilder) -> Self {
        GenerateRequest {
            messages: b.messages,
            options: b.options,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation. Order within a request is chronological
/// and backends must send it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_message_order_and_options() {
        let mut req = request();
        req.system("be terse")
            .user("make a site")
            .assistant("<artifact/>")
            .user("make it blue")
            .max_tokens(2500)
            .temperature(0.8)
            .top_p(0.95)
            .timeout(Duration::from_secs(75));
        let built = req.build();

        let roles: Vec<Role> = built.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(built.messages[3].content, "make it blue");
        assert_eq!(built.options.max_tokens, Some(2500));
        assert_eq!(built.options.timeout, Some(Duration::from_secs(75)));
    }

    #[test]
    fn message_serializes_with_lowercase_role() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
