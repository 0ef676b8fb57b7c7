//! HTTP transport to the queen.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use swarmrun_proto::{decode, encode, LinkError, Message, QueenLink};

/// Posts encoded envelopes to the queen's `/v1/messages` endpoint.
#[derive(Debug, Clone)]
pub struct HttpLink {
    client: reqwest::Client,
    url: String,
}

impl HttpLink {
    pub fn new(queen_url: &str, timeout: Duration) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/v1/messages", queen_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl QueenLink for HttpLink {
    async fn exchange(&self, message: Message) -> Result<Message, LinkError> {
        let body = encode(&message)?;
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))?;

        // A capacity rejection still carries an envelope.
        if status.is_success() || status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(decode(&bytes)?);
        }
        Err(LinkError::Transport(format!(
            "queen returned {}: {}",
            status,
            String::from_utf8_lossy(&bytes)
        )))
    }
}
