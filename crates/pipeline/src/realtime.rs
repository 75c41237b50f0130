//! Realtime model connector over WebSocket
//!
//! Two pump tasks bridge the socket and the [`ModelLink`] channels: the
//! writer serialises commands, the reader parses events. Dropping the link's
//! command sender closes the socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use voice_qualifier_config::RealtimeConfig;

use crate::frames::ServerEvent;
use crate::link::{ModelConnector, ModelLink, ModelPeer, LINK_CAPACITY};
use crate::PipelineError;

#[derive(Debug, Clone)]
pub struct RealtimeConnector {
    endpoint: String,
    api_key: String,
    model: String,
}

impl RealtimeConnector {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_settings(config: &RealtimeConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Connection("realtime API key not configured".into()))?;
        Ok(Self::new(&config.endpoint, api_key, &config.model))
    }

    pub fn url(&self) -> String {
        format!("{}?model={}", self.endpoint.trim_end_matches('/'), self.model)
    }
}

#[async_trait]
impl ModelConnector for RealtimeConnector {
    async fn connect(&self, call_id: &str) -> Result<ModelLink, PipelineError> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| PipelineError::Connection(format!("invalid request: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| PipelineError::Connection(format!("invalid auth header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| PipelineError::Connection(e.to_string()))?;
        tracing::info!(call_id = %call_id, model = %self.model, "Connected to realtime model");

        let (mut sink, mut stream) = socket.split();
        let (link, peer) = ModelLink::pair(LINK_CAPACITY);
        let ModelPeer {
            to_pipeline,
            mut from_pipeline,
        } = peer;

        let writer_id = call_id.to_string();
        tokio::spawn(async move {
            while let Some(command) = from_pipeline.recv().await {
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(call_id = %writer_id, error = %e, "Unserialisable command");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    tracing::debug!(call_id = %writer_id, "Model socket closed for writing");
                    break;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
        });

        let reader_id = call_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        if to_pipeline.send(ServerEvent::parse(&text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!(call_id = %reader_id, frame = ?frame, "Model closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(call_id = %reader_id, error = %e, "Model socket error");
                        let _ = to_pipeline
                            .send(ServerEvent::TransportError(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(link)
    }
}
