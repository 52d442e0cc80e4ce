//! Transport seam to the backing store process

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::document::{from_wire, to_wire, SchemaDocument};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Malformed reply: {0}")]
    Malformed(String),
}

/// The `{status, message?}` reply shape used by save and finish.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StoreReply {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    fn into_result(self) -> Result<(), TransportError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(TransportError::Remote(
                self.message
                    .unwrap_or_else(|| "backing store reported an error".to_string()),
            ))
        }
    }
}

#[derive(Deserialize)]
struct SchemaReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// The three logical operations plus the health probe that gates
/// connection establishment.
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Whether the backing store is reachable right now.
    async fn health(&self) -> bool;

    async fn get_schema(&self) -> Result<SchemaDocument, TransportError>;

    async fn save_schema(&self, doc: &SchemaDocument) -> Result<(), TransportError>;

    async fn finish(&self) -> Result<(), TransportError>;
}

/// HTTP realization of the transport against a local backing store.
pub struct HttpTransport {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransport {
    /// `base_url` may omit the scheme (`localhost:5173`).
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let mut base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            base_url = format!("http://{base_url}");
        }
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::ConnectionLost(error.to_string())
    }
}

#[async_trait]
impl StoreTransport for HttpTransport {
    async fn health(&self) -> bool {
        self.client
            .get(self.endpoint("api/health"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map(|reply| reply.status().is_success())
            .unwrap_or(false)
    }

    async fn get_schema(&self) -> Result<SchemaDocument, TransportError> {
        let reply: SchemaReply = self
            .client
            .get(self.endpoint("api/schema"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(classify)?
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        if reply.status != "success" {
            return Err(TransportError::Remote(
                reply
                    .message
                    .unwrap_or_else(|| "backing store reported an error".to_string()),
            ));
        }
        let data = reply
            .data
            .ok_or_else(|| TransportError::Malformed("reply is missing `data`".to_string()))?;
        from_wire(&data).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn save_schema(&self, doc: &SchemaDocument) -> Result<(), TransportError> {
        let reply: StoreReply = self
            .client
            .post(self.endpoint("api/schema"))
            .timeout(self.request_timeout)
            .json(&to_wire(doc))
            .send()
            .await
            .map_err(classify)?
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        reply.into_result()
    }

    async fn finish(&self) -> Result<(), TransportError> {
        let reply: StoreReply = self
            .client
            .post(self.endpoint("api/finish"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(classify)?
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        reply.into_result()
    }
}
