//! Relay backend: forwards turns to an upstream Colloquy endpoint.
//!
//! The upstream speaks the same wire contract this server exposes, so a
//! relay can front a remote deployment (or another relay) without any
//! protocol translation: the request is re-posted and the upstream's
//! event stream is decoded with the shared codec and passed through.

use anyhow::Context;
use async_trait::async_trait;
use colloquy_chat::{ChatBackend, Error, EventStream, Result, TurnOptions};
use colloquy_core::message::Message;
use futures::StreamExt;
use serde::Serialize;

/// Tracing target for the relay backend.
const TRACING_TARGET: &str = "colloquy_cli::relay";

/// Forwards turns over HTTP to an upstream chat endpoint.
#[derive(Debug, Clone)]
pub struct RelayBackend {
    client: reqwest::Client,
    url: reqwest::Url,
}

/// Outbound request body; mirrors the server's full-replacement payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    messages: &'a [Message],
    model_id: &'a str,
    enable_web_search: bool,
    enable_image: bool,
    enable_video: bool,
}

impl RelayBackend {
    /// Creates a relay against the given upstream URL.
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(url)
            .with_context(|| format!("invalid upstream url: {url}"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }
}

#[async_trait]
impl ChatBackend for RelayBackend {
    async fn stream_turn(
        &self,
        model_id: &str,
        messages: &[Message],
        options: &TurnOptions,
    ) -> Result<EventStream> {
        let request = RelayRequest {
            messages,
            model_id,
            enable_web_search: options.enable_web_search,
            enable_image: options.enable_image,
            enable_video: options.enable_video,
        };

        tracing::debug!(
            target: TRACING_TARGET,
            url = %self.url,
            model_id,
            message_count = messages.len(),
            "Relaying turn upstream"
        );

        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(Error::backend)?;

        let status = response.status();
        if !status.is_success() {
            // The upstream's own rejection text flows through verbatim so
            // the producer can classify context-length failures.
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("upstream returned {status}: {body}")));
        }

        let events = colloquy_client::event_stream(response.bytes_stream())
            .map(|item| item.map_err(Error::backend));
        Ok(events.boxed())
    }
}
