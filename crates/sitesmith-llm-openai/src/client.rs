//! Sends one Chat Completions request and extracts the generated text.

use crate::ProviderState;
use crate::types::{ChatRequest, ChatResponse};
use sitesmith_llm::error::Error;
use std::time::Duration;

pub async fn complete(
    state: &ProviderState,
    body: &ChatRequest,
    timeout: Option<Duration>,
) -> Result<String, Error> {
    let url = format!("{}/chat/completions", state.config.base_url);
    let mut req = state
        .client
        .post(&url)
        .header("Authorization", format!("Bearer {}", state.config.api_key))
        .json(body);
    if let Some(timeout) = timeout {
        req = req.timeout(timeout);
    }

    tracing::debug!(
        model = %body.model,
        messages = body.messages.len(),
        max_tokens = ?body.max_tokens,
        "sending chat completion"
    );

    let resp = req.send().await.map_err(|e| Error::Http(Box::new(e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            code: status.as_str().to_string(),
            message: body_text,
        });
    }

    let text = resp.text().await.map_err(|e| Error::Http(Box::new(e)))?;
    let parsed: ChatResponse = serde_json::from_str(&text)?;
    parsed.into_text().ok_or_else(|| {
        Error::InvalidResponse("missing choices[0].message.content".to_string())
    })
}
