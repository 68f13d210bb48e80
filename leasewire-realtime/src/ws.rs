//! WebSocket change feed.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{stream, SinkExt, StreamExt};
use leasewire_core::{Topic, TransportError};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::auth::{ClientError, Credentials};
use crate::feed::{ChangeFeed, EventStream};
use crate::wire;

/// Opens one WebSocket per topic against `ws_endpoint`.
#[derive(Debug, Clone)]
pub struct WsChangeFeed {
    endpoint: String,
    credentials: Credentials,
}

impl WsChangeFeed {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Result<Self, ClientError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ClientError::InvalidEndpoint {
                endpoint,
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }
        Ok(Self {
            endpoint,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn connect(&self, topic: &Topic) -> Result<EventStream, TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            topic: topic.to_string(),
            reason,
        };

        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| connect_failed(e.to_string()))?;
        let headers = request.headers_mut();
        for (name, value) in self.credentials.header_pairs() {
            let value = HeaderValue::from_str(&value).map_err(|e| connect_failed(e.to_string()))?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| connect_failed(e.to_string()))?;

        socket
            .send(Message::Text(wire::subscribe_frame(topic)))
            .await
            .map_err(|e| connect_failed(e.to_string()))?;
        tracing::debug!(topic = %topic, endpoint = %self.endpoint, "Change feed subscribed");

        let topic = topic.clone();
        let events = stream::unfold(Some(socket), move |state| {
            let topic = topic.clone();
            async move {
                let mut socket = state?;
                loop {
                    match socket.next().await {
                        Some(Ok(Message::Text(text))) => {
                            match wire::decode_frame(&text, &topic, Utc::now()) {
                                Ok(Some(event)) => return Some((Ok(event), Some(socket))),
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::warn!(topic = %topic, error = %err, "Dropping undecodable change frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(topic = %topic, ?frame, "Change feed closed by server");
                            return None;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            let lost = TransportError::ConnectionLost {
                                topic: topic.to_string(),
                                reason: err.to_string(),
                            };
                            return Some((Err(lost), None));
                        }
                        None => return None,
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}
