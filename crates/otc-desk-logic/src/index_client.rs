//! HTTP client for a remote orderflow service
//!
//! Implements `OrderIndex` against `POST/GET/DELETE /order`, so makers and
//! takers in separate processes share one authoritative index. The service
//! enforces uniqueness; a `409` is reported as `DuplicateListing`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{ApiResponse, OrderQuery};
use crate::error::IndexError;
use crate::index::{NewOrder, Order, OrderFilter, OrderIndex};
use crate::types::Address;

pub struct HttpOrderIndex {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrderIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self) -> String {
        format!("{}/order", self.base_url)
    }

    async fn query(&self, query: &OrderQuery) -> Result<Option<Vec<Order>>, IndexError> {
        let response = self
            .client
            .get(self.order_url())
            .query(query)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ApiResponse<Vec<Order>> = read_envelope(response).await?;
        Ok(Some(envelope.data.unwrap_or_default()))
    }
}

fn transport(err: reqwest::Error) -> IndexError {
    IndexError::Transport(err.to_string())
}

/// Decode a successful envelope; anything else becomes an `IndexError`
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<ApiResponse<T>, IndexError> {
    let status = response.status();
    if status.is_success() {
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| IndexError::Protocol(format!("undecodable response body: {}", e)))?;
        if !envelope.success {
            return Err(IndexError::Protocol(
                envelope.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        return Ok(envelope);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body)
        .ok()
        .and_then(|r| r.error.or(r.message))
        .unwrap_or(body);
    if status.is_server_error() {
        Err(IndexError::Storage(format!("{}: {}", status, detail)))
    } else {
        Err(IndexError::Protocol(format!("{}: {}", status, detail)))
    }
}

#[async_trait]
impl OrderIndex for HttpOrderIndex {
    async fn insert(&self, order: NewOrder) -> Result<Order, IndexError> {
        let escrow = order.escrow_address;
        let response = self
            .client
            .post(self.order_url())
            .json(&order)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::CONFLICT {
            return Err(IndexError::DuplicateListing(escrow));
        }
        let envelope: ApiResponse<Order> = read_envelope(response).await?;
        let created = envelope
            .data
            .ok_or_else(|| IndexError::Protocol("create response carried no order".to_string()))?;
        debug!("Remote index listed order {} for escrow {}", created.order_id, escrow);
        Ok(created)
    }

    async fn get_by_id(&self, order_id: &str) -> Result<Option<Order>, IndexError> {
        Ok(self
            .query(&OrderQuery::by_id(order_id))
            .await?
            .and_then(|orders| orders.into_iter().next()))
    }

    async fn get_by_escrow_address(&self, escrow: &Address) -> Result<Option<Order>, IndexError> {
        Ok(self
            .list_filtered(&OrderFilter::default().escrow(*escrow))
            .await?
            .into_iter()
            .next())
    }

    async fn list_filtered(&self, filter: &OrderFilter) -> Result<Vec<Order>, IndexError> {
        Ok(self
            .query(&OrderQuery::from_filter(filter))
            .await?
            .unwrap_or_default())
    }

    async fn remove(&self, order_id: &str) -> Result<bool, IndexError> {
        let response = self
            .client
            .delete(self.order_url())
            .query(&OrderQuery::by_id(order_id))
            .send()
            .await
            .map_err(transport)?;
        let envelope: ApiResponse<bool> = read_envelope(response).await?;
        Ok(envelope.data.unwrap_or(false))
    }

    async fn exists(&self, escrow: &Address) -> Result<bool, IndexError> {
        Ok(self.get_by_escrow_address(escrow).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let index = HttpOrderIndex::new("http://localhost:3000/", Duration::from_secs(5)).unwrap();
        assert_eq!(index.base_url(), "http://localhost:3000");
        assert_eq!(index.order_url(), "http://localhost:3000/order");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        // port 9 (discard) is not served in test environments
        let index = HttpOrderIndex::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = index.list_all().await.unwrap_err();
        assert!(matches!(err, IndexError::Transport(_)));
    }
}
