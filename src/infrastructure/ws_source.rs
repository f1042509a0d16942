// WebSocket push source
use crate::application::telemetry_source::{SourceError, SourceEvent, StreamSource};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct WebSocketSource {
    base_url: String,
}

impl WebSocketSource {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("ws://") || path.starts_with("wss://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl StreamSource for WebSocketSource {
    async fn subscribe(
        &self,
        path: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<(), SourceError> {
        let url = self.url_for(path);
        tracing::debug!(url = %url, "connecting websocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SourceError::Connect {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if events.send(SourceEvent::Open).await.is_err() {
            return Ok(());
        }
        tracing::info!(url = %url, "websocket connected");

        let (_write, mut read) = ws_stream.split();

        while let Some(item) = read.next().await {
            let msg = item.map_err(|e| SourceError::Transport(e.to_string()))?;

            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "skipping undecodable message");
                    continue;
                }
            };

            if events.send(SourceEvent::from_message(value)).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn test_url_for_joins_base_and_path() {
        let source = WebSocketSource::new("ws://localhost:9000/".to_string());
        assert_eq!(source.url_for("/ws/tank"), "ws://localhost:9000/ws/tank");
        assert_eq!(source.url_for("ws/tank"), "ws://localhost:9000/ws/tank");
        assert_eq!(source.url_for("wss://remote/feed"), "wss://remote/feed");
    }

    #[tokio::test]
    async fn test_session_skips_undecodable_frames_and_ends_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
            ws.send(Message::Text(r#"{"t": 1, "v": 2}"#.into())).await.unwrap();
            ws.send(Message::Text(r#"{"__meta": "close"}"#.into())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let source = WebSocketSource::new(format!("ws://{}", addr));
        let (tx, mut rx) = mpsc::channel(16);
        source.subscribe("/feed", tx).await.unwrap();
        server.await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                SourceEvent::Open,
                SourceEvent::Payload(json!({"t": 1, "v": 2})),
                SourceEvent::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = WebSocketSource::new(format!("ws://{}", addr));
        let (tx, mut rx) = mpsc::channel(4);
        let result = source.subscribe("/feed", tx).await;

        assert!(matches!(result, Err(SourceError::Connect { .. })));
        assert!(rx.recv().await.is_none());
    }
}
