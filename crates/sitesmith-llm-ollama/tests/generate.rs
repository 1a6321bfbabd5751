use sitesmith_llm::Error;
use sitesmith_llm_ollama::{OllamaConfig, provider};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn model_for(server: &MockServer) -> sitesmith_llm::LanguageModel {
    provider(OllamaConfig {
        base_url: server.uri(),
    })
    .model("deepseek-coder")
}

#[tokio::test]
async fn sends_single_prompt_without_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({
            "model": "deepseek-coder",
            "prompt": "User: hi\n\nAssistant:",
            "stream": false
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "hello"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut req = sitesmith_llm::request();
    req.user("hi");
    let text = model_for(&server).generate(req).await.expect("generate");
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn reply_without_response_field_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .mount(&server)
        .await;

    let mut req = sitesmith_llm::request();
    req.user("hi");
    let err = model_for(&server).generate(req).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)), "got {err:?}");
}
