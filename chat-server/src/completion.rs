//! Remote completion client.
//!
//! One outbound call per prompt to the generative-text provider. Every failure
//! mode comes back as a [`CompletionError`] value; nothing here panics or
//! propagates a transport error type, so the dispatcher sees exactly two
//! outcomes: reply text or a failure reason.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("provider returned status {0}")]
    Status(u16),

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider call timed out")]
    Timeout,

    /// The provider answered 2xx but the reply text was not where expected.
    #[error("unexpected response format")]
    UnexpectedResponse,

    #[error("prompt is empty")]
    EmptyPrompt,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Pull `candidates[0].content.parts[0].text` out of a response body.
pub fn extract_reply(body: &[u8]) -> Result<String, CompletionError> {
    let parsed: GenerateContentResponse =
        serde_json::from_slice(body).map_err(|_| CompletionError::UnexpectedResponse)?;
    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or(CompletionError::UnexpectedResponse)
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        if prompt.trim().is_empty() {
            return Err(CompletionError::EmptyPrompt);
        }

        let body = GenerateContentRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("X-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "completion provider returned an error status");
            return Err(CompletionError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify_transport_error)?;
        let reply = extract_reply(&bytes)?;
        debug!(reply_len = reply.len(), "completion received");
        Ok(reply)
    }
}

fn classify_transport_error(e: reqwest::Error) -> CompletionError {
    if e.is_timeout() {
        CompletionError::Timeout
    } else {
        CompletionError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const PATH: &str = "/v1beta/models/gemini-2.0-flash:generateContent";

    fn client_for(server: &mockito::ServerGuard) -> GeminiClient {
        GeminiClient::new(
            format!("{}{PATH}", server.url()),
            "test-key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_reply_fixed_path() {
        let body = br#"{"candidates":[{"content":{"parts":[{"text":"4"},{"text":"ignored"}]}}]}"#;
        assert_eq!(extract_reply(body).unwrap(), "4");
    }

    #[test]
    fn test_extract_reply_unrecognized_shapes() {
        let bodies: [&[u8]; 5] = [
            b"{}",
            br#"{"candidates":[]}"#,
            br#"{"candidates":[{"content":{"parts":[]}}]}"#,
            br#"{"candidates":[{"finishReason":"SAFETY"}]}"#,
            b"not json",
        ];
        for body in bodies {
            assert_eq!(extract_reply(body), Err(CompletionError::UnexpectedResponse));
        }
    }

    #[tokio::test]
    async fn test_complete_sends_prompt_and_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "contents": [{"parts": [{"text": "2+2?"}]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"4"}]}}]}"#)
            .create_async()
            .await;

        let reply = client_for(&server).complete("2+2?").await;
        assert_eq!(reply, Ok("4".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_non_success_status_carries_code() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(429)
            .with_body(r#"{"error":{"message":"quota"}}"#)
            .create_async()
            .await;

        let result = client_for(&server).complete("hello").await;
        assert_eq!(result, Err(CompletionError::Status(429)));
    }

    #[tokio::test]
    async fn test_complete_malformed_success_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#)
            .create_async()
            .await;

        let result = client_for(&server).complete("hello").await;
        assert_eq!(result, Err(CompletionError::UnexpectedResponse));
    }

    #[tokio::test]
    async fn test_complete_transport_failure() {
        // Nothing listens on port 9 on loopback.
        let client = GeminiClient::new(
            "http://127.0.0.1:9/generate".to_string(),
            "test-key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = client.complete("hello").await;
        assert!(matches!(
            result,
            Err(CompletionError::Transport(_)) | Err(CompletionError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_empty_prompt_never_hits_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", PATH).expect(0).create_async().await;

        let result = client_for(&server).complete("   ").await;
        assert_eq!(result, Err(CompletionError::EmptyPrompt));
        mock.assert_async().await;
    }
}
