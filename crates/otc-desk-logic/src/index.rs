//! Order index: the registry of published listings
//!
//! The index is the only resource shared between makers and takers, so its
//! invariants carry the protocol: at most one listing per escrow address, and
//! removal that is safe to repeat. `OrderIndex` is the contract; the local
//! `MemoryOrderIndex` implements it behind a single lock (duplicate check and
//! insert under the same write guard), and `HttpOrderIndex` in `index_client`
//! implements it against a remote orderflow service.
//!
//! Listings are always returned most recently created first. Discovery clients
//! fill the first match, so this ordering is part of the contract.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::state::{load_snapshot, save_snapshot, IndexSnapshot};
use crate::types::{decimal_u256, Address, FieldElement};

// ============================================================================
// Records
// ============================================================================

/// A published listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub escrow_address: Address,
    pub sell_token_address: Address,
    #[serde(with = "decimal_u256")]
    pub sell_token_amount: U256,
    pub buy_token_address: Address,
    #[serde(with = "decimal_u256")]
    pub buy_token_amount: U256,
    /// Serialized escrow instance record (JSON `ContractDescriptor`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_descriptor: Option<String>,
    /// Escrow decryption key takers register before touching the escrow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_auth_key: Option<FieldElement>,
    /// Partial address the escrow keys are registered under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_key_derivation_index: Option<FieldElement>,
    pub created_at: DateTime<Utc>,
}

/// A listing as submitted, before the index assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub escrow_address: Address,
    pub sell_token_address: Address,
    #[serde(with = "decimal_u256")]
    pub sell_token_amount: U256,
    pub buy_token_address: Address,
    #[serde(with = "decimal_u256")]
    pub buy_token_amount: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_auth_key: Option<FieldElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_key_derivation_index: Option<FieldElement>,
}

impl NewOrder {
    pub fn into_order(self, order_id: String, created_at: DateTime<Utc>) -> Order {
        Order {
            order_id,
            escrow_address: self.escrow_address,
            sell_token_address: self.sell_token_address,
            sell_token_amount: self.sell_token_amount,
            buy_token_address: self.buy_token_address,
            buy_token_amount: self.buy_token_amount,
            contract_descriptor: self.contract_descriptor,
            escrow_auth_key: self.escrow_auth_key,
            escrow_key_derivation_index: self.escrow_key_derivation_index,
            created_at,
        }
    }
}

/// Conjunctive listing filter; absent fields impose no constraint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub escrow_address: Option<Address>,
    pub sell_token_address: Option<Address>,
    pub buy_token_address: Option<Address>,
}

impl OrderFilter {
    pub fn escrow(mut self, address: Address) -> Self {
        self.escrow_address = Some(address);
        self
    }

    pub fn sell_token(mut self, address: Address) -> Self {
        self.sell_token_address = Some(address);
        self
    }

    pub fn buy_token(mut self, address: Address) -> Self {
        self.buy_token_address = Some(address);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.escrow_address.is_none()
            && self.sell_token_address.is_none()
            && self.buy_token_address.is_none()
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.escrow_address.map_or(true, |a| a == order.escrow_address)
            && self.sell_token_address.map_or(true, |a| a == order.sell_token_address)
            && self.buy_token_address.map_or(true, |a| a == order.buy_token_address)
    }
}

// ============================================================================
// Contract
// ============================================================================

/// Registry of published listings
#[async_trait]
pub trait OrderIndex: Send + Sync {
    /// Insert a listing. Fails with `DuplicateListing` if the escrow is already listed.
    async fn insert(&self, order: NewOrder) -> Result<Order, IndexError>;

    async fn get_by_id(&self, order_id: &str) -> Result<Option<Order>, IndexError>;

    async fn get_by_escrow_address(&self, escrow: &Address) -> Result<Option<Order>, IndexError>;

    /// All listings, most recent first
    async fn list_all(&self) -> Result<Vec<Order>, IndexError> {
        self.list_filtered(&OrderFilter::default()).await
    }

    /// Listings matching every given criterion, most recent first
    async fn list_filtered(&self, filter: &OrderFilter) -> Result<Vec<Order>, IndexError>;

    /// Remove a listing. Returns false if it was not present.
    async fn remove(&self, order_id: &str) -> Result<bool, IndexError>;

    async fn exists(&self, escrow: &Address) -> Result<bool, IndexError>;
}

// ============================================================================
// In-memory store with optional snapshot file
// ============================================================================

#[derive(Default)]
struct IndexInner {
    /// Insertion-ordered, oldest first
    orders: IndexMap<String, Order>,
    by_escrow: HashMap<Address, String>,
}

impl IndexInner {
    fn from_orders(orders: Vec<Order>) -> Result<Self, IndexError> {
        let mut inner = IndexInner::default();
        for order in orders {
            if inner.by_escrow.contains_key(&order.escrow_address) {
                return Err(IndexError::Storage(format!(
                    "snapshot lists escrow {} twice",
                    order.escrow_address
                )));
            }
            inner.by_escrow.insert(order.escrow_address, order.order_id.clone());
            inner.orders.insert(order.order_id.clone(), order);
        }
        Ok(inner)
    }
}

/// Local order index, optionally persisted to a JSON snapshot
pub struct MemoryOrderIndex {
    inner: RwLock<IndexInner>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryOrderIndex {
    /// Volatile index (tests, ephemeral services)
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
            snapshot_path: None,
        }
    }

    /// Durable index backed by a snapshot file, loading it if present
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = load_snapshot(&path).map_err(|e| IndexError::Storage(format!("{:#}", e)))?;
        let inner = match snapshot {
            Some(s) => IndexInner::from_orders(s.orders)?,
            None => {
                info!("No index snapshot at {}, starting empty", path.display());
                IndexInner::default()
            }
        };
        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(path),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the snapshot on the blocking pool. Callers hold the write lock,
    /// so snapshots land in mutation order.
    async fn persist(&self, inner: &IndexInner) -> Result<(), IndexError> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let snapshot = IndexSnapshot::new(inner.orders.values().cloned().collect());
        tokio::task::spawn_blocking(move || save_snapshot(&path, &snapshot))
            .await
            .map_err(|e| IndexError::Storage(format!("snapshot writer failed: {}", e)))?
            .map_err(|e| IndexError::Storage(format!("{:#}", e)))
    }
}

impl Default for MemoryOrderIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderIndex for MemoryOrderIndex {
    async fn insert(&self, new_order: NewOrder) -> Result<Order, IndexError> {
        let mut inner = self.inner.write().await;

        if inner.by_escrow.contains_key(&new_order.escrow_address) {
            warn!("Rejecting duplicate listing for escrow {}", new_order.escrow_address);
            return Err(IndexError::DuplicateListing(new_order.escrow_address));
        }

        let order_id = uuid::Uuid::new_v4().to_string();
        let order = new_order.into_order(order_id.clone(), Utc::now());
        inner.by_escrow.insert(order.escrow_address, order_id.clone());
        inner.orders.insert(order_id.clone(), order.clone());

        if let Err(e) = self.persist(&inner).await {
            inner.orders.shift_remove(&order_id);
            inner.by_escrow.remove(&order.escrow_address);
            return Err(e);
        }

        info!(
            "Listed order {} for escrow {} ({} {} -> {} {})",
            order.order_id,
            order.escrow_address,
            order.sell_token_amount,
            order.sell_token_address,
            order.buy_token_amount,
            order.buy_token_address,
        );
        Ok(order)
    }

    async fn get_by_id(&self, order_id: &str) -> Result<Option<Order>, IndexError> {
        Ok(self.inner.read().await.orders.get(order_id).cloned())
    }

    async fn get_by_escrow_address(&self, escrow: &Address) -> Result<Option<Order>, IndexError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_escrow
            .get(escrow)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    async fn list_filtered(&self, filter: &OrderFilter) -> Result<Vec<Order>, IndexError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .rev()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect())
    }

    async fn remove(&self, order_id: &str) -> Result<bool, IndexError> {
        let mut inner = self.inner.write().await;

        let Some((position, id, order)) = inner.orders.shift_remove_full(order_id) else {
            debug!("Remove of unknown order {} is a no-op", order_id);
            return Ok(false);
        };
        inner.by_escrow.remove(&order.escrow_address);

        if let Err(e) = self.persist(&inner).await {
            inner.by_escrow.insert(order.escrow_address, id.clone());
            inner.orders.shift_insert(position, id, order);
            return Err(e);
        }

        info!("Removed order {} (escrow {})", id, order.escrow_address);
        Ok(true)
    }

    async fn exists(&self, escrow: &Address) -> Result<bool, IndexError> {
        Ok(self.inner.read().await.by_escrow.contains_key(escrow))
    }
}
