//! Server-sent-events feed from a bitsocket endpoint.
//!
//! The subscription query is base64-encoded onto the endpoint URL. Each SSE
//! `data:` payload is one JSON [`FeedMessage`].

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, warn};

use satchel_core::error::IndexerError;
use satchel_core::feed::{FeedEvent, FeedMessage, address_activity_query, encode_query};
use satchel_core::traits::{FeedStream, FeedTransport};

use crate::config::RpcConfig;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Splits an SSE byte stream into event payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete event's `data:` payload, joined across lines.
    /// Events without data (comments, keep-alives) are skipped.
    pub fn next_payload(&mut self) -> Option<String> {
        while let Some(index) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..index + 2).collect();
            let text = String::from_utf8_lossy(&frame);
            let mut payload = String::new();
            for line in text.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(rest) = line.strip_prefix("data:") {
                    if !payload.is_empty() {
                        payload.push('\n');
                    }
                    payload.push_str(rest.trim_start());
                }
            }
            if !payload.is_empty() {
                return Some(payload);
            }
        }
        None
    }
}

#[derive(Clone, Debug)]
pub struct BitsocketTransport {
    http: Client,
    url: String,
}

impl BitsocketTransport {
    /// `url` is the endpoint prefix; the encoded query is appended to it.
    pub fn new(http: Client, url: impl Into<String>) -> Self {
        Self { http, url: url.into() }
    }

    /// Own client without a request timeout; the stream stays open indefinitely.
    pub fn from_config(config: &RpcConfig) -> Result<Self, IndexerError> {
        let http = Client::builder()
            .build()
            .map_err(|e| IndexerError::Configuration(e.to_string()))?;
        Ok(Self::new(http, config.bitsocket_url.clone()))
    }

    pub fn subscription_url(&self, addresses: &[String]) -> String {
        format!("{}{}", self.url, encode_query(&address_activity_query(addresses)))
    }
}

#[async_trait]
impl FeedTransport for BitsocketTransport {
    async fn connect(&self, addresses: &[String]) -> Result<Box<dyn FeedStream>, IndexerError> {
        if addresses.is_empty() {
            return Err(IndexerError::Configuration("no addresses to watch".into()));
        }
        let response = self
            .http
            .get(self.subscription_url(addresses))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| IndexerError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| IndexerError::Transport(e.to_string()))?;
        debug!(watched = addresses.len(), "bitsocket connected");
        Ok(Box::new(BitsocketStream {
            stream: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
        }))
    }
}

pub struct BitsocketStream {
    stream: ByteStream,
    decoder: SseDecoder,
}

#[async_trait]
impl FeedStream for BitsocketStream {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, IndexerError> {
        loop {
            while let Some(payload) = self.decoder.next_payload() {
                match serde_json::from_str::<FeedMessage>(&payload) {
                    Ok(message) => return Ok(Some(FeedEvent::Message(message))),
                    Err(e) => warn!(error = %e, "undecodable feed message skipped"),
                }
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => return Err(IndexerError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}
