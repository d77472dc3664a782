//! Streaming summarization client.
//!
//! Sends an item's title and content to a text-completion endpoint and
//! collects the streamed plain-text response into a single summary
//! string. Cancellation is the caller's concern: dropping the future
//! (e.g. from a `tokio::select!` arm) aborts the in-flight request.

use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

/// Content longer than this is truncated before being sent. Keeps the
/// request within model context limits; summaries rarely benefit from
/// the tail of a long article anyway.
const MAX_CONTENT_CHARS: usize = 10_000;

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarization request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("summarization endpoint returned HTTP {0}")]
    Http(u16),

    #[error("summarization response was not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    content: &'a str,
    title: &'a str,
}

/// Client for the summarization endpoint.
pub struct Summarizer {
    client: Client,
    endpoint: String,
}

impl Summarizer {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// Request a summary for an item, streaming the response body and
    /// invoking `on_chunk` with each decoded text fragment as it
    /// arrives. Returns the full accumulated summary.
    ///
    /// Chunks are buffered across reads so a UTF-8 sequence split at a
    /// chunk boundary still decodes.
    pub async fn summarize(
        &self,
        title: &str,
        content: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, SummarizeError> {
        let content = truncate_chars(content, MAX_CONTENT_CHARS);
        let request = SummarizeRequest {
            content,
            title,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SummarizeError::Http(status.as_u16()));
        }

        let mut summary = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(&chunk);

            match std::str::from_utf8(&pending) {
                Ok(text) => {
                    on_chunk(text);
                    summary.push_str(text);
                    pending.clear();
                }
                Err(e) if e.error_len().is_none() => {
                    // Incomplete multi-byte sequence at the tail; emit
                    // the valid prefix and carry the rest forward.
                    let valid = e.valid_up_to();
                    let text = std::str::from_utf8(&pending[..valid]).unwrap_or("");
                    if !text.is_empty() {
                        on_chunk(text);
                        summary.push_str(text);
                    }
                    pending.drain(..valid);
                }
                Err(_) => return Err(SummarizeError::InvalidUtf8),
            }
        }

        if !pending.is_empty() {
            return Err(SummarizeError::InvalidUtf8);
        }

        Ok(summary)
    }
}

/// Truncate to at most `max` characters, respecting char boundaries.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_summarizer(uri: &str) -> Summarizer {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Summarizer::new(client, format!("{}/api/summarize", uri))
    }

    #[tokio::test]
    async fn posts_title_and_content_and_collects_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/summarize"))
            .and(body_json_string(
                r#"{"content":"Body text","title":"A Title"}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("A short summary."))
            .mount(&server)
            .await;

        let mut streamed = String::new();
        let summary = test_summarizer(&server.uri())
            .summarize("A Title", "Body text", |chunk| streamed.push_str(chunk))
            .await
            .unwrap();

        assert_eq!(summary, "A short summary.");
        assert_eq!(streamed, summary);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/summarize"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = test_summarizer(&server.uri())
            .summarize("t", "c", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, SummarizeError::Http(500)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(5);
        assert_eq!(truncate_chars(&s, 3), "ééé");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
