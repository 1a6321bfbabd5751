//! Converts sitesmith-llm generic types into the Chat Completions wire format.

use sitesmith_llm::request::GenerateRequest;

use crate::types::{ChatMessage, ChatRequest};

pub fn to_chat_request(model_id: &str, req: &GenerateRequest) -> ChatRequest {
    // Chat Completions takes the history as-is; system messages stay inline.
    let messages = req
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        })
        .collect();

    ChatRequest {
        model: model_id.to_string(),
        messages,
        max_tokens: req.options.max_tokens,
        temperature: req.options.temperature,
        top_p: req.options.top_p,
    }
}
