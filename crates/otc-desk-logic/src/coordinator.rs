//! Order lifecycle coordinator
//!
//! Sequences escrow calls and index mutations so the index only moves after
//! the matching on-chain step is confirmed:
//!
//! ```text
//! Created --deposit--> Deposited --publish--> Listed --fill--> Filled
//!     --delist--> FilledUnlisted --finalize--> Finalized
//! ```
//!
//! plus `Cancelled` from `Created`/`Deposited`/`Listed`. The ledger is
//! authoritative; the records kept here are advisory.
//!
//! A timed-out or unreachable call is never compensated blindly: the ledger is
//! queried first, and a step that landed is treated as confirmed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::authwit::SigningContext;
use crate::error::{LifecycleError, RejectReason, RuntimeError, Step};
use crate::escrow::{EscrowClient, EscrowHandle, Offer};
use crate::index::{Order, OrderFilter, OrderIndex};
use crate::runtime::{CallOutcome, EscrowRuntime, EscrowStatus};
use crate::secrets::{MakerCapability, MakerVault};
use crate::types::{Address, FieldElement, TxHash};

// ============================================================================
// Advisory lifecycle state
// ============================================================================

/// Coordinator's view of where an order is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStage {
    /// Escrow deployed, nothing deposited
    Created,
    /// Sell-side funds locked, not yet listed
    Deposited,
    /// Listed in the index and fillable
    Listed,
    /// Fill confirmed on-chain, listing not yet removed
    Filled,
    /// Fill confirmed and listing removed
    FilledUnlisted,
    Finalized,
    Cancelled,
}

impl fmt::Display for OrderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStage::Created => write!(f, "Created"),
            OrderStage::Deposited => write!(f, "Deposited"),
            OrderStage::Listed => write!(f, "Listed"),
            OrderStage::Filled => write!(f, "Filled"),
            OrderStage::FilledUnlisted => write!(f, "FilledUnlisted"),
            OrderStage::Finalized => write!(f, "Finalized"),
            OrderStage::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Advisory record of one escrow's lifecycle as seen by this coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRecord {
    pub stage: OrderStage,
    pub order_id: Option<String>,
    /// Last transaction this coordinator saw land for the escrow
    pub last_tx: Option<TxHash>,
    pub updated_at: DateTime<Utc>,
}

/// Retry schedule for calls that failed because the network was unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a confirmed fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillReceipt {
    pub order_id: String,
    pub escrow_address: Address,
    /// `None` when the fill was inferred from the ledger after a timeout
    pub tx_hash: Option<TxHash>,
}

/// Outcome of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Order ids whose escrows can no longer be filled, now delisted
    pub removed: Vec<String>,
    /// Order ids with a lifecycle call in flight here, left alone
    pub skipped: Vec<String>,
    /// Order ids whose status or removal failed, with the reason
    pub undetermined: Vec<(String, String)>,
}

// ============================================================================
// Error translation
// ============================================================================

fn rejected(escrow: Address, step: Step, reason: RejectReason) -> LifecycleError {
    match reason {
        RejectReason::InvalidState(reason) => LifecycleError::InvalidState { escrow, step, reason },
        RejectReason::AuthorizationMismatch(reason) => {
            LifecycleError::AuthorizationMismatch { escrow, step, reason }
        }
        other => LifecycleError::Runtime {
            step,
            source: RuntimeError::Rejected(other),
        },
    }
}

fn runtime_error(escrow: Address, step: Step, err: RuntimeError) -> LifecycleError {
    match err {
        RuntimeError::Unavailable(reason) => LifecycleError::NetworkUnavailable { step, reason },
        RuntimeError::Rejected(reason) => rejected(escrow, step, reason),
        RuntimeError::Witness(refusal) => LifecycleError::Witness(refusal),
        other => LifecycleError::Runtime { step, source: other },
    }
}

// ============================================================================
// Step driver
// ============================================================================

/// A lifecycle call that may need to be re-issued with a fresh witness
enum PendingCall<'a> {
    Deploy {
        maker: &'a SigningContext,
        handle: &'a EscrowHandle,
    },
    Deposit {
        maker: &'a SigningContext,
        handle: &'a EscrowHandle,
    },
    Fill {
        taker: &'a SigningContext,
        handle: &'a EscrowHandle,
    },
    Finalize {
        maker: &'a SigningContext,
        capability: &'a MakerCapability,
    },
    Cancel {
        maker: &'a SigningContext,
        capability: &'a MakerCapability,
    },
}

impl PendingCall<'_> {
    fn step(&self) -> Step {
        match self {
            PendingCall::Deploy { .. } => Step::Instantiate,
            PendingCall::Deposit { .. } => Step::Deposit,
            PendingCall::Fill { .. } => Step::Fill,
            PendingCall::Finalize { .. } => Step::Finalize,
            PendingCall::Cancel { .. } => Step::Cancel,
        }
    }
}

enum Unconfirmed {
    TimedOut(TxHash),
    Unavailable(String),
}

/// Releases the escrow's in-flight slot on drop
struct InFlightGuard<'a> {
    escrows: &'a StdMutex<HashSet<Address>>,
    escrow: Address,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.escrows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.escrow);
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct LifecycleCoordinator<R: EscrowRuntime, I: OrderIndex + ?Sized> {
    client: EscrowClient<R>,
    index: Arc<I>,
    vault: MakerVault,
    records: Mutex<HashMap<Address, LifecycleRecord>>,
    in_flight: StdMutex<HashSet<Address>>,
    retry: RetryPolicy,
}

impl<R: EscrowRuntime, I: OrderIndex + ?Sized> LifecycleCoordinator<R, I> {
    pub fn new(runtime: Arc<R>, index: Arc<I>, settings: CoordinatorSettings) -> Self {
        Self {
            client: EscrowClient::new(runtime, settings.call_timeout),
            index,
            vault: MakerVault::new(),
            records: Mutex::new(HashMap::new()),
            in_flight: StdMutex::new(HashSet::new()),
            retry: settings.retry,
        }
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    pub fn vault(&self) -> &MakerVault {
        &self.vault
    }

    /// Advisory record for an escrow, if this coordinator has touched it
    pub async fn record(&self, escrow: &Address) -> Option<LifecycleRecord> {
        self.records.lock().await.get(escrow).cloned()
    }

    pub async fn records(&self) -> Vec<(Address, LifecycleRecord)> {
        self.records
            .lock()
            .await
            .iter()
            .map(|(a, r)| (*a, r.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Maker: create
    // ------------------------------------------------------------------

    /// Instantiate an escrow, deposit the sell side and publish the listing.
    ///
    /// The maker capability is stored before the deployment is sent, so every
    /// failure from there on returns `PartialCreateFailure` naming the escrow,
    /// from which `resume_create` continues. The listing is published only
    /// after the deposit is confirmed.
    pub async fn create_order(&self, maker: &SigningContext, offer: &Offer) -> Result<Order, LifecycleError> {
        // nothing has reached the ledger yet, so there is no escrow to name
        let capability = self
            .client
            .instantiate(maker, offer)
            .await
            .map_err(|e| runtime_error(Address::ZERO, Step::Instantiate, e))?;
        let escrow = capability.escrow();
        let capability = self.vault.insert(capability).await;

        let _guard = self.begin(escrow)?;
        let result = match self.deploy(maker, &capability.handle).await {
            Ok(()) => self.fund_and_publish(maker, &capability.handle).await,
            Err(e) => Err(e),
        };
        result.map_err(|cause| partial_create(escrow, cause))
    }

    /// Continue an order that stopped with `PartialCreateFailure`.
    ///
    /// Checks the ledger before acting: a deployment that never landed is sent
    /// again, and a deposit whose receipt was lost may already have landed, in
    /// which case only the listing is published.
    pub async fn resume_create(&self, maker: &SigningContext, escrow: Address) -> Result<Order, LifecycleError> {
        let capability = self.capability(&escrow).await?;
        let _guard = self.begin(escrow)?;

        if let Some(order) = self.index.get_by_escrow_address(&escrow).await? {
            info!("Escrow {} is already listed as order {}", escrow, order.order_id);
            self.set_record(escrow, OrderStage::Listed, Some(order.order_id.clone()), None)
                .await;
            return Ok(order);
        }

        let status = match self.client.status(maker.address(), escrow).await {
            Ok(status) => Some(status),
            Err(RuntimeError::UnknownEscrow(_)) => None,
            Err(e) => return Err(partial_create(escrow, runtime_error(escrow, Step::Deposit, e))),
        };

        let result = match status {
            None => {
                info!("Escrow {} is not on the ledger, sending its deployment again", escrow);
                match self.deploy(maker, &capability.handle).await {
                    Ok(()) => self.fund_and_publish(maker, &capability.handle).await,
                    Err(e) => Err(e),
                }
            }
            Some(EscrowStatus::Created) => self.fund_and_publish(maker, &capability.handle).await,
            Some(EscrowStatus::Deposited) => {
                self.set_record(escrow, OrderStage::Deposited, None, None).await;
                self.publish(&capability.handle).await
            }
            Some(other) => {
                return Err(LifecycleError::InvalidState {
                    escrow,
                    step: Step::Publish,
                    reason: format!("escrow is {}, not fillable", other),
                })
            }
        };
        result.map_err(|cause| partial_create(escrow, cause))
    }

    async fn deploy(&self, maker: &SigningContext, handle: &EscrowHandle) -> Result<(), LifecycleError> {
        let escrow = handle.address();
        let tx = self
            .drive(escrow, &PendingCall::Deploy { maker, handle })
            .await?;
        self.set_record(escrow, OrderStage::Created, None, tx).await;
        info!("Escrow {} deployed for maker {}", escrow, maker.address());
        Ok(())
    }

    async fn fund_and_publish(&self, maker: &SigningContext, handle: &EscrowHandle) -> Result<Order, LifecycleError> {
        self.deposit(maker, handle).await?;
        self.publish(handle).await
    }

    async fn deposit(&self, maker: &SigningContext, handle: &EscrowHandle) -> Result<(), LifecycleError> {
        let escrow = handle.address();
        let tx = self
            .drive(escrow, &PendingCall::Deposit { maker, handle })
            .await?;
        self.set_record(escrow, OrderStage::Deposited, None, tx).await;
        info!("Escrow {} funded with {} of {}", escrow, handle.terms().sell_amount, handle.terms().sell_token);
        Ok(())
    }

    async fn publish(&self, handle: &EscrowHandle) -> Result<Order, LifecycleError> {
        let escrow = handle.address();
        let listing = handle
            .listing()
            .map_err(|e| runtime_error(escrow, Step::Publish, e))?;
        let order = self.index.insert(listing).await?;
        self.set_record(escrow, OrderStage::Listed, Some(order.order_id.clone()), None)
            .await;
        info!("Order {} published for escrow {}", order.order_id, escrow);
        Ok(order)
    }

    // ------------------------------------------------------------------
    // Taker: discover and fill
    // ------------------------------------------------------------------

    /// Listings matching `filter`, most recent first
    pub async fn discover(&self, filter: &OrderFilter) -> Result<Vec<Order>, LifecycleError> {
        Ok(self.index.list_filtered(filter).await?)
    }

    /// Fill a listed order, then delist it.
    ///
    /// The listing is removed only after this taker's fill is confirmed. A
    /// fill from an earlier call that timed out counts: the escrow's events are
    /// checked before paying again. A lost race (`InvalidState`) leaves the
    /// listing alone. If the fill landed but removal fails, returns
    /// `ReconciliationRequired` and does not fill again.
    pub async fn fill_order(&self, taker: &SigningContext, order: &Order) -> Result<FillReceipt, LifecycleError> {
        let escrow = order.escrow_address;
        let _guard = self.begin(escrow)?;

        let handle = self
            .client
            .register(taker.address(), order)
            .await
            .map_err(|e| runtime_error(escrow, Step::Fill, e))?;

        let call = PendingCall::Fill { taker, handle: &handle };
        let already_filled = match self.landed(&call).await {
            Ok(filled) => filled,
            Err(e) => {
                debug!("Could not read fills of escrow {} before filling: {}", escrow, e);
                false
            }
        };
        let tx_hash = if already_filled {
            info!("Order {} was already filled by {}", order.order_id, taker.address());
            None
        } else {
            match self.drive(escrow, &call).await {
                Ok(tx_hash) => tx_hash,
                Err(e) => {
                    if e.is_lost_race() {
                        warn!("Lost fill race for order {} (escrow {}): {}", order.order_id, escrow, e);
                    }
                    return Err(e);
                }
            }
        };
        self.set_record(escrow, OrderStage::Filled, Some(order.order_id.clone()), tx_hash)
            .await;
        info!("Order {} filled by {}", order.order_id, taker.address());

        match self.index.remove(&order.order_id).await {
            Ok(removed) => {
                if !removed {
                    debug!("Order {} was already delisted", order.order_id);
                }
                self.set_record(escrow, OrderStage::FilledUnlisted, None, None).await;
                Ok(FillReceipt {
                    order_id: order.order_id.clone(),
                    escrow_address: escrow,
                    tx_hash,
                })
            }
            Err(e) => {
                error!(
                    "Order {} filled on-chain but could not be delisted: {}",
                    order.order_id, e
                );
                Err(LifecycleError::ReconciliationRequired {
                    order_id: Some(order.order_id.clone()),
                    escrow_address: escrow,
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Fill the most recent listing matching `filter`, moving past lost races
    pub async fn fill_first(&self, taker: &SigningContext, filter: &OrderFilter) -> Result<FillReceipt, LifecycleError> {
        let candidates = self.discover(filter).await?;
        let total = candidates.len();

        for order in candidates {
            match self.fill_order(taker, &order).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_lost_race() => continue,
                Err(LifecycleError::AlreadyInFlight(escrow)) => {
                    debug!("Skipping escrow {}: call already in flight", escrow);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LifecycleError::NotFound(format!(
            "no fillable listing among {} candidates",
            total
        )))
    }

    // ------------------------------------------------------------------
    // Maker: finalize and cancel
    // ------------------------------------------------------------------

    /// Reveal the maker secret and release the taker's payment
    pub async fn finalize_order(&self, maker: &SigningContext, escrow: Address) -> Result<Option<TxHash>, LifecycleError> {
        let capability = self.capability(&escrow).await?;
        let _guard = self.begin(escrow)?;

        let tx = self
            .drive(escrow, &PendingCall::Finalize { maker, capability: &*capability })
            .await?;
        self.vault.remove(&escrow).await;
        self.set_record(escrow, OrderStage::Finalized, None, tx).await;
        info!("Escrow {} finalized", escrow);

        // a fill whose delisting failed can leave a stale listing behind
        match self.index.get_by_escrow_address(&escrow).await {
            Ok(Some(order)) => {
                warn!("Removing stale listing {} for finalized escrow {}", order.order_id, escrow);
                if let Err(e) = self.index.remove(&order.order_id).await {
                    warn!("Stale listing {} not removed: {}", order.order_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not check for stale listing of escrow {}: {}", escrow, e),
        }
        Ok(tx)
    }

    /// Refund the maker on-chain, then delist.
    ///
    /// Removal is gated on the cancel being confirmed; a removal failure
    /// afterwards returns `ReconciliationRequired`.
    pub async fn cancel_order(&self, maker: &SigningContext, escrow: Address) -> Result<Option<TxHash>, LifecycleError> {
        let capability = self.capability(&escrow).await?;
        let _guard = self.begin(escrow)?;

        let tx = self
            .drive(escrow, &PendingCall::Cancel { maker, capability: &*capability })
            .await?;
        self.vault.remove(&escrow).await;
        self.set_record(escrow, OrderStage::Cancelled, None, tx).await;
        info!("Escrow {} cancelled", escrow);

        let order = match self.index.get_by_escrow_address(&escrow).await {
            Ok(Some(order)) => order,
            Ok(None) => return Ok(tx),
            Err(e) => {
                error!("Escrow {} cancelled but its listing could not be looked up: {}", escrow, e);
                return Err(LifecycleError::ReconciliationRequired {
                    order_id: None,
                    escrow_address: escrow,
                    cause: e.to_string(),
                });
            }
        };
        if let Err(e) = self.index.remove(&order.order_id).await {
            error!("Escrow {} cancelled but order {} not delisted: {}", escrow, order.order_id, e);
            return Err(LifecycleError::ReconciliationRequired {
                order_id: Some(order.order_id),
                escrow_address: escrow,
                cause: e.to_string(),
            });
        }
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Delist every listing whose escrow can no longer be filled: anything not
    /// `Deposited`, including escrows the ledger does not know.
    ///
    /// Escrows with a call in flight on this coordinator are skipped, so a
    /// sweep never races the coordinator's own fill.
    pub async fn reconcile(&self, viewer: &SigningContext) -> Result<ReconcileReport, LifecycleError> {
        let orders = self.index.list_all().await?;
        let mut report = ReconcileReport {
            checked: orders.len(),
            ..Default::default()
        };

        for order in orders {
            if self.is_in_flight(&order.escrow_address) {
                report.skipped.push(order.order_id);
                continue;
            }

            let state = match self.client.status(viewer.address(), order.escrow_address).await {
                Ok(status) if status.is_fillable() => continue,
                Ok(status) => status.to_string(),
                Err(RuntimeError::UnknownEscrow(_)) => "not on the ledger".to_string(),
                Err(e) => {
                    warn!("Reconcile: status of escrow {} unknown: {}", order.escrow_address, e);
                    report.undetermined.push((order.order_id, e.to_string()));
                    continue;
                }
            };

            match self.index.remove(&order.order_id).await {
                Ok(_) => {
                    info!(
                        "Reconcile: delisted order {} (escrow {} is {})",
                        order.order_id, order.escrow_address, state
                    );
                    report.removed.push(order.order_id);
                }
                Err(e) => report.undetermined.push((order.order_id, e.to_string())),
            }
        }

        info!(
            "Reconcile: checked {}, removed {}, skipped {}, undetermined {}",
            report.checked,
            report.removed.len(),
            report.skipped.len(),
            report.undetermined.len()
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn capability(&self, escrow: &Address) -> Result<Arc<MakerCapability>, LifecycleError> {
        self.vault
            .get(escrow)
            .await
            .ok_or_else(|| LifecycleError::NotFound(format!("no maker capability for escrow {}", escrow)))
    }

    fn begin(&self, escrow: Address) -> Result<InFlightGuard<'_>, LifecycleError> {
        let mut escrows = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !escrows.insert(escrow) {
            return Err(LifecycleError::AlreadyInFlight(escrow));
        }
        Ok(InFlightGuard {
            escrows: &self.in_flight,
            escrow,
        })
    }

    fn is_in_flight(&self, escrow: &Address) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(escrow)
    }

    async fn set_record(&self, escrow: Address, stage: OrderStage, order_id: Option<String>, tx: Option<TxHash>) {
        let mut records = self.records.lock().await;
        let record = records.entry(escrow).or_insert_with(|| LifecycleRecord {
            stage,
            order_id: None,
            last_tx: None,
            updated_at: Utc::now(),
        });
        record.stage = stage;
        if order_id.is_some() {
            record.order_id = order_id;
        }
        if tx.is_some() {
            record.last_tx = tx;
        }
        record.updated_at = Utc::now();
        debug!("Escrow {} -> {}", escrow, stage);
    }

    /// Issue a lifecycle call until it is confirmed, rejected, or retries run out.
    ///
    /// Returns the landing transaction when known. After a timeout or transport
    /// failure the ledger is checked before anything else happens; a retry is
    /// always a new call with a new witness and nonce.
    async fn drive(&self, escrow: Address, call: &PendingCall<'_>) -> Result<Option<TxHash>, LifecycleError> {
        let step = call.step();
        let mut attempt = 0u32;
        let mut last_tx = None;

        loop {
            attempt += 1;
            let unconfirmed = match self.attempt(call).await {
                Ok(CallOutcome::Confirmed(receipt)) => return Ok(Some(receipt.tx_hash)),
                Ok(CallOutcome::Rejected(reason)) => {
                    // an earlier unconfirmed attempt or call may be why this one was refused
                    let recheck = attempt > 1 || matches!(reason, RejectReason::InvalidState(_));
                    if recheck && self.landed(call).await.unwrap_or(false) {
                        info!("{} on escrow {} had already landed", step, escrow);
                        return Ok(last_tx);
                    }
                    return Err(rejected(escrow, step, reason));
                }
                Ok(CallOutcome::TimedOut { tx_hash }) => {
                    last_tx = Some(tx_hash);
                    Unconfirmed::TimedOut(tx_hash)
                }
                Err(RuntimeError::Unavailable(reason)) => Unconfirmed::Unavailable(reason),
                Err(e) => return Err(runtime_error(escrow, step, e)),
            };

            match self.landed(call).await {
                Ok(true) => {
                    info!("{} on escrow {} landed despite no receipt", step, escrow);
                    return Ok(last_tx);
                }
                Ok(false) => {}
                Err(e) => debug!("Could not tell whether {} on escrow {} landed: {}", step, escrow, e),
            }

            match unconfirmed {
                Unconfirmed::TimedOut(tx_hash) => {
                    warn!("{} on escrow {} timed out (tx {})", step, escrow, tx_hash);
                    return Err(LifecycleError::Timeout {
                        escrow,
                        step,
                        waited: self.client.call_timeout(),
                    });
                }
                Unconfirmed::Unavailable(reason) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{} on escrow {} failed (attempt {}/{}): {}, retrying in {:?}",
                        step, escrow, attempt, self.retry.max_attempts, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Unconfirmed::Unavailable(reason) => {
                    return Err(LifecycleError::NetworkUnavailable { step, reason });
                }
            }
        }
    }

    async fn attempt(&self, call: &PendingCall<'_>) -> Result<CallOutcome, RuntimeError> {
        match call {
            PendingCall::Deploy { maker, handle } => self.client.deploy(maker, handle).await,
            PendingCall::Deposit { maker, handle } => self.client.deposit(maker, handle).await,
            PendingCall::Fill { taker, handle } => {
                Ok(self.client.fill(taker, handle, FieldElement::random()).await?.outcome)
            }
            PendingCall::Finalize { maker, capability } => self.client.finalize(maker, capability).await,
            PendingCall::Cancel { maker, capability } => self.client.cancel(maker, capability).await,
        }
    }

    /// Whether the ledger shows the call's effect
    async fn landed(&self, call: &PendingCall<'_>) -> Result<bool, RuntimeError> {
        match call {
            PendingCall::Deploy { maker, handle } => {
                match self.client.status(maker.address(), handle.address()).await {
                    Ok(_) => Ok(true),
                    Err(RuntimeError::UnknownEscrow(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            }
            PendingCall::Deposit { maker, handle } => {
                let status = self.client.status(maker.address(), handle.address()).await?;
                Ok(matches!(
                    status,
                    EscrowStatus::Deposited | EscrowStatus::Filled | EscrowStatus::Finalized
                ))
            }
            // any fill paid by this taker, whichever attempt or call submitted it
            PendingCall::Fill { taker, handle } => {
                self.client
                    .filled_by(taker.address(), handle.address(), taker.address())
                    .await
            }
            PendingCall::Finalize { maker, capability } => {
                let status = self.client.status(maker.address(), capability.escrow()).await?;
                Ok(status == EscrowStatus::Finalized)
            }
            PendingCall::Cancel { maker, capability } => {
                let status = self.client.status(maker.address(), capability.escrow()).await?;
                Ok(status == EscrowStatus::Cancelled)
            }
        }
    }
}

fn partial_create(escrow: Address, cause: LifecycleError) -> LifecycleError {
    match cause {
        already @ LifecycleError::PartialCreateFailure { .. } => already,
        cause => {
            warn!("Escrow {} created but not listed: {}", escrow, cause);
            LifecycleError::PartialCreateFailure {
                escrow_address: escrow,
                cause: Box::new(cause),
            }
        }
    }
}
