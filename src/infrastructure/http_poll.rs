// HTTP poll source
use crate::application::telemetry_source::{PollSource, SourceError};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpPollSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPollSource {
    pub fn new(base_url: String) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    async fn fetch(&self, path: &str) -> Result<Value, SourceError> {
        let url = self.url_for(path);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await?;
        let value = serde_json::from_str::<Value>(&body)?;
        tracing::trace!(url = %url, bytes = body.len(), "poll response received");
        Ok(value)
    }
}
