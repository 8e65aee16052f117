//! Shared fixtures for lifecycle integration tests
//!
//! - MockLedger: in-memory ledger and escrow program
//! - FlakyIndex: order index wrapper with injectable store failures
//! - Desk: a maker, two takers and their coordinators over one ledger and index

#![allow(dead_code)]

pub mod mock_ledger;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use otc_desk_logic::authwit::SigningContext;
use otc_desk_logic::coordinator::{CoordinatorSettings, LifecycleCoordinator, RetryPolicy};
use otc_desk_logic::error::IndexError;
use otc_desk_logic::escrow::Offer;
use otc_desk_logic::index::{MemoryOrderIndex, NewOrder, Order, OrderFilter, OrderIndex};
use otc_desk_logic::types::Address;

pub use mock_ledger::{Fault, MockLedger};

/// Order index whose inserts, lookups and removes can be made to fail
pub struct FlakyIndex {
    inner: Arc<MemoryOrderIndex>,
    fail_inserts: AtomicBool,
    fail_lookups: AtomicBool,
    fail_removes: AtomicBool,
}

impl FlakyIndex {
    pub fn new(inner: Arc<MemoryOrderIndex>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Lookup by escrow address fails
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderIndex for FlakyIndex {
    async fn insert(&self, order: NewOrder) -> Result<Order, IndexError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(IndexError::Transport("index unreachable".to_string()));
        }
        self.inner.insert(order).await
    }

    async fn get_by_id(&self, order_id: &str) -> Result<Option<Order>, IndexError> {
        self.inner.get_by_id(order_id).await
    }

    async fn get_by_escrow_address(&self, escrow: &Address) -> Result<Option<Order>, IndexError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(IndexError::Transport("index unreachable".to_string()));
        }
        self.inner.get_by_escrow_address(escrow).await
    }

    async fn list_filtered(&self, filter: &OrderFilter) -> Result<Vec<Order>, IndexError> {
        self.inner.list_filtered(filter).await
    }

    async fn remove(&self, order_id: &str) -> Result<bool, IndexError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(IndexError::Storage("disk full".to_string()));
        }
        self.inner.remove(order_id).await
    }

    async fn exists(&self, escrow: &Address) -> Result<bool, IndexError> {
        self.inner.exists(escrow).await
    }
}

pub type Coordinator = LifecycleCoordinator<MockLedger, FlakyIndex>;

pub struct Participant {
    pub account: Arc<SigningContext>,
    pub index: Arc<FlakyIndex>,
    pub coordinator: Arc<Coordinator>,
}

pub struct Desk {
    pub ledger: Arc<MockLedger>,
    pub index: Arc<MemoryOrderIndex>,
    pub maker: Participant,
    pub taker: Participant,
    pub rival: Participant,
    pub sell_token: Address,
    pub buy_token: Address,
}

pub const SELL_AMOUNT: u64 = 1_000;
pub const BUY_AMOUNT: u64 = 5_000;

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        call_timeout: Duration::from_secs(1),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

fn participant(ledger: &Arc<MockLedger>, index: &Arc<MemoryOrderIndex>, settings: CoordinatorSettings) -> Participant {
    let index = Arc::new(FlakyIndex::new(index.clone()));
    Participant {
        account: Arc::new(SigningContext::generate()),
        index: index.clone(),
        coordinator: Arc::new(LifecycleCoordinator::new(ledger.clone(), index, settings)),
    }
}

impl Desk {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    /// Maker holds the sell token; both takers hold enough buy token for one fill
    pub fn with_settings(settings: CoordinatorSettings) -> Self {
        let ledger = Arc::new(MockLedger::new());
        let index = Arc::new(MemoryOrderIndex::new());
        let sell_token = Address::random();
        let buy_token = Address::random();

        let maker = participant(&ledger, &index, settings);
        let taker = participant(&ledger, &index, settings);
        let rival = participant(&ledger, &index, settings);

        ledger.mint(sell_token, maker.account.address(), SELL_AMOUNT * 10);
        ledger.mint(buy_token, taker.account.address(), BUY_AMOUNT);
        ledger.mint(buy_token, rival.account.address(), BUY_AMOUNT);

        Self {
            ledger,
            index,
            maker,
            taker,
            rival,
            sell_token,
            buy_token,
        }
    }

    pub fn offer(&self) -> Offer {
        Offer {
            sell_token: self.sell_token,
            sell_amount: alloy_primitives::U256::from(SELL_AMOUNT),
            buy_token: self.buy_token,
            buy_amount: alloy_primitives::U256::from(BUY_AMOUNT),
        }
    }

    pub async fn create(&self) -> Order {
        self.maker
            .coordinator
            .create_order(&self.maker.account, &self.offer())
            .await
            .expect("create_order")
    }
}
