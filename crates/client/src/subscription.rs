//! GraphQL subscriptions over the `graphql-transport-ws` protocol.
//!
//! One socket carries one subscription. Decoded `data` payloads are forwarded
//! on a channel until the server completes the subscription, the socket
//! closes, or the receiver is dropped.

use crate::{graphql::GraphQlResponse, ClientError};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};

const PROTOCOL: &str = "graphql-transport-ws";
const SUBSCRIPTION_ID: &str = "1";
const BUFFER: usize = 32;

const WALLET_METRIC_UPDATED: &str = r#"
subscription OnWalletMetricUpdated($wallet: [UuidType!]) {
  onWalletMetricUpdated(filter: { wallet: $wallet }) {
    id
  }
}
"#;

/// Payload of a wallet metric update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMetricUpdated {
    pub on_wallet_metric_updated: MetricId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricId {
    pub id: String,
}

impl WalletMetricUpdated {
    pub fn id(&self) -> &str {
        &self.on_wallet_metric_updated.id
    }
}

/// Messages a `graphql-transport-ws` server sends.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Ping,
    Pong,
    Next { payload: Value },
    Error { payload: Value },
    Complete,
}

/// Live subscription: a receiver of decoded payloads plus the socket task.
#[derive(Debug)]
pub struct Subscription<R> {
    pub updates: mpsc::Receiver<R>,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionClient {
    endpoint: String,
    token: Option<String>,
}

impl SubscriptionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
        }
    }

    /// Client for the `ws(s)://` endpoint served next to an `http(s)://`
    /// GraphQL endpoint.
    pub fn for_http_endpoint(endpoint: &str) -> Self {
        Self::new(ws_endpoint(endpoint))
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Metric updates of `wallets`.
    pub async fn wallet_metric_updated(
        &self,
        wallets: &[String],
    ) -> Result<Subscription<WalletMetricUpdated>, ClientError> {
        self.subscribe(WALLET_METRIC_UPDATED, json!({ "wallet": wallets }))
            .await
    }

    /// Open a socket, wait for the server to acknowledge it and start the
    /// subscription.
    pub async fn subscribe<V, R>(&self, query: &str, variables: V) -> Result<Subscription<R>, ClientError>
    where
        V: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(PROTOCOL));

        let (mut socket, _) = connect_async(request)
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        let init = match &self.token {
            Some(token) => json!({
                "type": "connection_init",
                "payload": { "Authorization": format!("Bearer {token}") }
            }),
            None => json!({ "type": "connection_init" }),
        };
        socket
            .send(Message::Text(init.to_string()))
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        loop {
            let message = socket
                .next()
                .await
                .ok_or_else(|| ClientError::Connection("socket closed before ack".to_string()))?
                .map_err(|e| ClientError::Connection(e.to_string()))?;
            let Message::Text(text) = message else {
                continue;
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::ConnectionAck) => break,
                Ok(ServerMessage::Ping) => {}
                Ok(other) => {
                    return Err(ClientError::GraphQl(format!(
                        "expected connection_ack, got {other:?}"
                    )))
                }
                Err(e) => return Err(ClientError::Decode(e.to_string())),
            }
        }

        let subscribe = json!({
            "id": SUBSCRIPTION_ID,
            "type": "subscribe",
            "payload": { "query": query, "variables": variables },
        });
        socket
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "Subscription started");

        let (sender, updates) = mpsc::channel(BUFFER);
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = sender.closed() => break,
                    message = socket.next() => message,
                };
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Subscription socket failed");
                        break;
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Next { payload }) => {
                        match serde_json::from_value::<GraphQlResponse<R>>(payload)
                            .map_err(|e| ClientError::Decode(e.to_string()))
                            .and_then(GraphQlResponse::into_result)
                        {
                            Ok(data) => {
                                if sender.send(data).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Dropping subscription payload"),
                        }
                    }
                    Ok(ServerMessage::Ping) => {
                        let pong = json!({ "type": "pong" }).to_string();
                        if socket.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerMessage::Error { payload }) => {
                        warn!(%payload, "Subscription rejected");
                        break;
                    }
                    Ok(ServerMessage::Complete) => break,
                    Ok(ServerMessage::ConnectionAck | ServerMessage::Pong) => {}
                    Err(e) => warn!(error = %e, "Undecodable subscription message"),
                }
            }

            let _ = socket.close(None).await;
            debug!("Subscription closed");
        });

        Ok(Subscription { updates, task })
    }
}

/// `http://` becomes `ws://` and `https://` becomes `wss://`.
fn ws_endpoint(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        endpoint.to_string()
    }
}
