//! Ferry Client
//!
//! Client for the Ferry log server, used by build agents to ship log lines
//! and by tools that follow a build's output live.
//!
//! # Example
//!
//! ```no_run
//! use ferry_client::LogStreamClient;
//! use ferry_core::domain::log::NewLogLine;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = LogStreamClient::connect("http://localhost:8080").await?;
//!
//!     let lines = vec![NewLogLine::new(1, "Compiling ferry v0.1.0", chrono::Utc::now())];
//!     let inserted = client.send_lines(futures_util::stream::iter(lines)).await?;
//!     println!("Inserted {} lines", inserted);
//!
//!     let mut events = client.follow(1, None).await?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", event?.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod sse;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use ferry_core::dto::log::LogEvent;

use std::collections::VecDeque;

use ferry_core::domain::log::{BuildId, NewLogLine};
use ferry_core::dto::log::LOG_EVENT_NAME;
use ferry_proto::v1::LogLineSubmission;
use ferry_proto::v1::builds_client::BuildsClient;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tonic::transport::{Channel, Endpoint};

use crate::sse::SseDecoder;

/// Client for the Ferry log server
///
/// Both the RPC ingestion call and the HTTP live stream go to the same
/// address; the server tells the protocols apart.
#[derive(Debug, Clone)]
pub struct LogStreamClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    http: Client,
    /// RPC client instance
    rpc: BuildsClient<Channel>,
}

impl LogStreamClient {
    /// Connect to a Ferry server
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server (e.g., "http://localhost:8080")
    pub async fn connect(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize(base_url.into());
        let channel = endpoint(&base_url)?.connect().await?;
        Ok(Self::with_channel(base_url, channel))
    }

    /// Create a client that connects on first use
    pub fn connect_lazy(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize(base_url.into());
        let channel = endpoint(&base_url)?.connect_lazy();
        Ok(Self::with_channel(base_url, channel))
    }

    fn with_channel(base_url: String, channel: Channel) -> Self {
        Self {
            base_url,
            http: Client::new(),
            rpc: BuildsClient::new(channel),
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Ingestion
    // =============================================================================

    /// Stream log lines to the server over one RPC call
    ///
    /// # Returns
    /// The number of lines the server persisted
    pub async fn send_lines<S>(&self, lines: S) -> Result<u64>
    where
        S: Stream<Item = NewLogLine> + Send + 'static,
    {
        self.send_submissions(lines.map(|line| LogLineSubmission::from(&line)))
            .await
    }

    /// Stream raw protocol submissions to the server over one RPC call
    pub async fn send_submissions<S>(&self, submissions: S) -> Result<u64>
    where
        S: Stream<Item = LogLineSubmission> + Send + 'static,
    {
        let summary = self
            .rpc
            .clone()
            .create_log_stream(submissions)
            .await?
            .into_inner();

        tracing::debug!(lines_inserted = summary.lines_inserted, "Log stream finished");

        Ok(summary.lines_inserted)
    }

    // =============================================================================
    // Live Stream
    // =============================================================================

    /// Follow a build's log lines as they are persisted
    ///
    /// # Arguments
    /// * `build_id` - The build to follow
    /// * `since` - Replay persisted lines with a greater `log_id` first
    ///
    /// # Returns
    /// A stream of events that ends when the server closes the connection
    pub async fn follow(
        &self,
        build_id: BuildId,
        since: Option<u64>,
    ) -> Result<BoxStream<'static, Result<LogEvent>>> {
        let url = format!("{}/api/build/{}/stream", self.base_url, build_id);
        let mut request = self.http.get(&url);
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        let state = (
            response.bytes_stream().boxed(),
            SseDecoder::default(),
            VecDeque::new(),
        );
        let events = futures_util::stream::unfold(state, |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (body, decoder, pending)));
                }

                match body.next().await? {
                    Ok(chunk) => pending.extend(
                        decoder
                            .feed(&chunk)
                            .into_iter()
                            .filter(|frame| frame.event == LOG_EVENT_NAME)
                            .map(|frame| parse_event(&frame.data)),
                    ),
                    Err(e) => return Some((Err(e.into()), (body, decoder, pending))),
                }
            }
        });

        Ok(events.boxed())
    }
}

fn normalize(base_url: String) -> String {
    base_url.trim_end_matches('/').to_string()
}

fn endpoint(base_url: &str) -> Result<Endpoint> {
    Endpoint::from_shared(base_url.to_string())
        .map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base_url, e)))
}

fn parse_event(data: &str) -> Result<LogEvent> {
    serde_json::from_str(data)
        .map_err(|e| ClientError::ParseError(format!("Failed to parse log event: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_trims_trailing_slash() {
        let client = LogStreamClient::connect_lazy("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_client_rejects_invalid_url() {
        let result = LogStreamClient::connect_lazy("not a url");
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }

    #[test]
    fn test_parse_event() {
        let event = parse_event(
            r#"{"logId":4,"buildId":1,"message":"a","timestamp":"2024-05-01T12:30:00Z"}"#,
        )
        .unwrap();

        assert_eq!(event.log_id, 4);
        assert_eq!(event.build_id, 1);
        assert_eq!(event.message, "a");
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        assert!(matches!(parse_event("{"), Err(ClientError::ParseError(_))));
    }
}
