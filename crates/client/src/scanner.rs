//! Scanner (event indexer) HTTP client.
//!
//! The scanner tracks contracts registered for event indexing. The dashboard
//! reads their sync height and asks for transaction rescans after actions.

use crate::ClientError;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerContract {
    pub id: String,
    pub network: String,
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListener {
    pub id: String,
    pub name: String,
    pub sync_height: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest<'a> {
    network: &'a str,
    tx_hash: &'a str,
}

#[derive(Debug, Clone)]
pub struct ScannerClient {
    client: reqwest::Client,
    host: String,
}

impl ScannerClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.host, path);
        debug!(%url, "Scanner request");

        let response = self.client.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(ClientError::Http { status, body });
        }

        Ok(response.json().await?)
    }

    /// The registered scanner contract for `address` on `network`, if any.
    pub async fn get_contract(
        &self,
        network: &str,
        address: Address,
    ) -> Result<Option<ScannerContract>, ClientError> {
        let address = address.to_string().to_lowercase();
        let contracts: Vec<ScannerContract> = self
            .get(
                "/api/contract",
                &[("network", network), ("address", address.as_str())],
            )
            .await?;
        Ok(contracts.into_iter().next())
    }

    pub async fn get_event_listeners(
        &self,
        contract_id: &str,
    ) -> Result<Vec<EventListener>, ClientError> {
        self.get(&format!("/api/contract/{contract_id}/event-listener"), &[])
            .await
    }

    /// Lowest block every listener of the contract has indexed.
    ///
    /// `-1` when the contract is not registered with the scanner.
    pub async fn synced_block(&self, network: &str, address: Address) -> Result<i64, ClientError> {
        let Some(contract) = self.get_contract(network, address).await? else {
            return Ok(-1);
        };
        let listeners = self.get_event_listeners(&contract.id).await?;
        Ok(min_sync_height(&listeners))
    }

    /// Ask the scanner to index a confirmed transaction.
    pub async fn scan_transaction(&self, network: &str, tx_hash: &str) -> Result<(), ClientError> {
        let url = format!("{}/api/transaction/scan", self.host);
        let response = self
            .client
            .post(&url)
            .json(&ScanRequest { network, tx_hash })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(ClientError::Http { status, body });
        }
        Ok(())
    }
}

fn min_sync_height(listeners: &[EventListener]) -> i64 {
    listeners
        .iter()
        .map(|listener| listener.sync_height)
        .min()
        .map_or(0, |height| i64::try_from(height).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn listener(height: u64) -> EventListener {
        EventListener {
            id: format!("l{height}"),
            name: "Transfer".to_string(),
            sync_height: height,
        }
    }

    #[test]
    fn test_min_sync_height() {
        assert_eq!(min_sync_height(&[listener(120), listener(80), listener(99)]), 80);
        assert_eq!(min_sync_height(&[]), 0);
    }

    #[test]
    fn test_host_trailing_slash() {
        let client = ScannerClient::new("https://scanner.example/");
        assert_eq!(client.host, "https://scanner.example");
    }

    #[test]
    fn test_event_listener_deserialize() {
        let listener: EventListener = serde_json::from_str(
            r#"{ "id": "1", "name": "Deposit", "syncHeight": 1500 }"#,
        )
        .unwrap();
        assert_eq!(listener.sync_height, 1500);
    }

    /// Scanner answering transaction scan requests with `status`.
    async fn spawn_scanner(status: StatusCode) -> (ScannerClient, Arc<Mutex<Vec<Value>>>) {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let seen = received.clone();
        let app = Router::new().route(
            "/api/transaction/scan",
            post(move |Json(body): Json<Value>| {
                seen.lock().unwrap().push(body);
                async move { (status, "scan queued") }
            }),
        );
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (ScannerClient::new(format!("http://{addr}/")), received)
    }

    #[tokio::test]
    async fn test_scan_transaction() {
        let (client, received) = spawn_scanner(StatusCode::OK).await;

        client.scan_transaction("1", "0xfeed").await.unwrap();
        assert_eq!(
            received.lock().unwrap()[0],
            json!({ "network": "1", "txHash": "0xfeed" })
        );
    }

    #[tokio::test]
    async fn test_scan_transaction_rejected() {
        let (client, _) = spawn_scanner(StatusCode::SERVICE_UNAVAILABLE).await;

        let err = client.scan_transaction("1", "0xfeed").await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 503, .. }));
    }
}
