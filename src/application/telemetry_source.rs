// Source traits for live telemetry delivery
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Key of the lifecycle marker carried by push messages.
pub const LIFECYCLE_KEY: &str = "__meta";

/// One item delivered by a subscription, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Open,
    Close,
    /// Transport failure, shown to the user; the source keeps retrying.
    Error(String),
    Payload(Value),
}

impl SourceEvent {
    /// Recognizes `{"__meta": "open"}` / `{"__meta": "close"}`; everything else is a payload.
    pub fn from_message(value: Value) -> Self {
        let signal = value
            .as_object()
            .filter(|map| map.len() == 1)
            .and_then(|map| map.get(LIFECYCLE_KEY))
            .and_then(Value::as_str);

        match signal {
            Some("open") => SourceEvent::Open,
            Some("close") => SourceEvent::Close,
            _ => SourceEvent::Payload(value),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Runs one connection session for `path`, forwarding `Open`, payloads
    /// and lifecycle messages into `events`. Returns when the remote side
    /// closes; reconnection is the caller's concern.
    async fn subscribe(
        &self,
        path: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), SourceError>;
}

#[async_trait]
pub trait PollSource: Send + Sync {
    /// Fetches one JSON value for `path`.
    async fn fetch(&self, path: &str) -> Result<Value, SourceError>;
}
