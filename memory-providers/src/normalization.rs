//! OpenRouter-shaped normalization client: rewrites raw snippets into
//! durable memory sentences via a chat-completions endpoint, with a
//! strict-JSON → line-based → echo-input fallback chain (§4.3).

use std::time::Duration;

use async_trait::async_trait;
use memory_core::error::Result;
use memory_core::traits::NormalizationClient;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::retry::retry_exponential;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(4);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(15);
const TEMPERATURE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 256;

const SYSTEM_PROMPT: &str = "You turn raw conversational snippets into durable memory \
sentences. Respond with a JSON array; each element is an object with keys \
\"memory\" (a single plain-text sentence capturing enduring information, or \
\"\" if nothing is worth keeping), \"scope\" (one of \"facts\", \"prefs\", \
\"persona\", \"constraints\"), \"confidence\" (0.0-1.0), \"language\" (a \
BCP-47 tag), and \"skip\" (true when the snippet is not worth persisting - \
greetings, questions, ephemeral chatter, or anything under about 12 \
meaningful characters). Combine snippets that restate the same fact. Reply \
with JSON only, no prose.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// One candidate memory as returned by the model's JSON array.
#[derive(Debug, Deserialize)]
struct NormalizedCandidate {
    #[serde(default)]
    memory: String,
    #[serde(default)]
    skip: bool,
}

/// Async client for an OpenRouter-compatible chat-completions endpoint.
pub struct OpenRouterNormalizationClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenRouterNormalizationClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::ClientBuild(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    async fn request_completion(
        &self,
        texts: &[String],
        model: &str,
    ) -> std::result::Result<String, ProviderError> {
        let user_content = texts
            .iter()
            .map(|text| format!("- {text}"))
            .collect::<Vec<_>>()
            .join("\n");

        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user", content: user_content },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = format!("normalization service returned {}", response.status());
            return Err(ProviderError::Response { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Decode("normalization response had no choices".to_string()))?;
        Ok(content)
    }
}

/// Parses a normalization response per the three-stage fallback chain:
/// strict JSON array, then line-based, then (by the caller) echoing the
/// original input. Exposed standalone so it's testable without a server.
fn parse_normalized_content(content: &str) -> Vec<String> {
    let trimmed = content.trim();

    if let Ok(candidates) = serde_json::from_str::<Vec<NormalizedCandidate>>(trimmed) {
        let memories: Vec<String> = candidates
            .into_iter()
            .filter(|candidate| !candidate.skip)
            .map(|candidate| candidate.memory.trim().to_string())
            .filter(|memory| !memory.is_empty())
            .collect();
        if !memories.is_empty() {
            return memories;
        }
    }

    trimmed
        .lines()
        .map(|line| line.trim().trim_start_matches("- ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[async_trait]
impl NormalizationClient for OpenRouterNormalizationClient {
    async fn normalize_memories(&self, texts: &[String], model: &str) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let content = retry_exponential(MAX_ATTEMPTS, BASE_DELAY, MAX_DELAY, || {
            self.request_completion(texts, model)
        })
        .await;

        let content = match content {
            Ok(content) => content,
            Err(error) => {
                warn!(%error, "normalization retries exhausted, falling back to raw input");
                return Ok(texts.to_vec());
            }
        };

        let normalized = parse_normalized_content(&content);
        if normalized.is_empty() {
            debug!("normalization produced no usable candidates, falling back to raw input");
            return Ok(texts.to_vec());
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"content": content}}]
        })
    }

    #[tokio::test]
    async fn empty_input_skips_the_network_call() {
        let client = OpenRouterNormalizationClient::new("http://localhost:9", "key").unwrap();
        let result = client.normalize_memories(&[], "model").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn parses_strict_json_and_drops_skipped_entries() {
        let server = MockServer::start().await;
        let content = serde_json::to_string(&serde_json::json!([
            {"memory": "Likes green tea in the mornings.", "scope": "prefs", "confidence": 0.8, "language": "en", "skip": false},
            {"memory": "", "scope": "facts", "confidence": 0.1, "language": "en", "skip": true},
        ]))
        .unwrap();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(&content)))
            .mount(&server)
            .await;

        let client = OpenRouterNormalizationClient::new(server.uri(), "key").unwrap();
        let result = client
            .normalize_memories(&["raw snippet".to_string()], "model")
            .await
            .unwrap();
        assert_eq!(result, vec!["Likes green tea in the mornings.".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_line_parsing_when_not_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
                "- Daily standup now at 09:30 CEST\n- Prefers green tea",
            )))
            .mount(&server)
            .await;

        let client = OpenRouterNormalizationClient::new(server.uri(), "key").unwrap();
        let result = client
            .normalize_memories(&["raw".to_string()], "model")
            .await
            .unwrap();
        assert_eq!(
            result,
            vec![
                "Daily standup now at 09:30 CEST".to_string(),
                "Prefers green tea".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_echo_original_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OpenRouterNormalizationClient::new(server.uri(), "key").unwrap();
        let original = vec!["Daily standup now at 09:30 CEST".to_string()];
        let result = client.normalize_memories(&original, "model").await.unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn parse_normalized_content_prefers_json() {
        let content = r#"[{"memory": "a fact", "skip": false}]"#;
        assert_eq!(parse_normalized_content(content), vec!["a fact".to_string()]);
    }

    #[test]
    fn parse_normalized_content_falls_back_to_lines() {
        let content = "- first\n- second\n";
        assert_eq!(
            parse_normalized_content(content),
            vec!["first".to_string(), "second".to_string()]
        );
    }
}
