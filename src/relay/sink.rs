//! Progress sinks: where coalesced updates are pushed.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// Maximum body size the remote channel accepts, in characters.
pub const MAX_PUSH_CHARS: usize = 4096;

/// Error type for sink operations.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non-success status.
    #[error("Sink rejected update: status {status}")]
    Rejected { status: u16 },
    /// The configured endpoint is not a valid URL.
    #[error("Invalid sink endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// A destination for rendered progress bodies.
///
/// Implementations must be safe to call from a spawned task; a push that
/// fails is logged and abandoned by the caller, never retried in place.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Push one rendered body, replacing the previous one.
    async fn push(&self, body: &str) -> Result<(), SinkError>;
}

/// HTTP sink posting JSON to a message-update endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: Url,
}

impl HttpSink {
    /// Create a sink for the given endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidEndpoint` if the URL does not parse.
    pub fn new(endpoint: &str) -> Result<Self, SinkError> {
        Ok(Self {
            client: Client::new(),
            endpoint: Url::parse(endpoint)?,
        })
    }

    /// The configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ProgressSink for HttpSink {
    async fn push(&self, body: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&serde_json::json!({ "text": body }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Fallback sink that writes progress to the log. Used when no remote
/// endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn push(&self, body: &str) -> Result<(), SinkError> {
        tracing::info!(chars = body.chars().count(), "Progress update:\n{body}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_sink_rejects_bad_url() {
        assert!(matches!(
            HttpSink::new("not a url"),
            Err(SinkError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_http_sink_keeps_endpoint() {
        let sink = HttpSink::new("https://example.com/hook").unwrap();
        assert_eq!(sink.endpoint().as_str(), "https://example.com/hook");
    }

    #[test]
    fn test_log_sink_always_succeeds() {
        let outcome = tokio_test::block_on(LogSink.push("hello"));
        assert!(outcome.is_ok());
    }
}
