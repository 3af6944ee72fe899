//! HTTP transport for opening a chat turn.

use colloquy_core::event::StreamEvent;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::{Error, Result, TRACING_TARGET, reader};

/// Opens streaming chat exchanges against a Colloquy-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl ChatTransport {
    /// Creates a transport for the given endpoint URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Creates a transport reusing an existing client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts a turn request and returns the decoded event stream.
    ///
    /// A non-success status is surfaced as [`Error::Rejected`] with the
    /// response body as the message, so callers can distinguish a refused
    /// request from a mid-stream transport failure.
    pub async fn open_turn<B>(&self, body: &B) -> Result<BoxStream<'static, Result<StreamEvent>>>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!(
            target: TRACING_TARGET,
            endpoint = %self.endpoint,
            "Opening chat turn"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::rejected(status.as_u16(), message));
        }

        Ok(reader::event_stream(response.bytes_stream()).boxed())
    }
}
