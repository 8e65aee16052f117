//! Escrow protocol client
//!
//! Issues the lifecycle calls against the escrow program through an
//! `EscrowRuntime`. Each call builds its witness, submits, then waits for
//! finality up to `call_timeout`. Errors are the runtime's own `RuntimeError`s;
//! translating them into lifecycle errors is the coordinator's job.
//!
//! A call rejected at submission (simulation failure) is reported as
//! `Ok(CallOutcome::Rejected)`, the same as a call rejected on-chain.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::authwit::{AuthAction, AuthorizationWitness, SigningContext, TokenTransfer, WitnessBuilder};
use crate::error::{RejectReason, RuntimeError};
use crate::index::{NewOrder, Order};
use crate::runtime::{
    CallOutcome, ContractDescriptor, EscrowCall, EscrowEventKind, EscrowQuery, EscrowRuntime,
    EscrowStatus, EscrowTerms, QueryValue,
};
use crate::secrets::{MakerCapability, MakerSecret};
use crate::types::{Address, FieldElement};

/// What the maker offers: sell `sell_amount` of `sell_token` for `buy_amount` of `buy_token`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub sell_token: Address,
    pub sell_amount: U256,
    pub buy_token: Address,
    pub buy_amount: U256,
}

/// A registered escrow: its instance record plus its decryption key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowHandle {
    pub descriptor: ContractDescriptor,
    pub secret_key: FieldElement,
}

impl EscrowHandle {
    pub fn address(&self) -> Address {
        self.descriptor.address
    }

    pub fn terms(&self) -> &EscrowTerms {
        &self.descriptor.terms
    }

    /// Listing record for this escrow, carrying what a taker needs to register it
    pub fn listing(&self) -> Result<NewOrder, RuntimeError> {
        let terms = self.terms();
        Ok(NewOrder {
            escrow_address: self.address(),
            sell_token_address: terms.sell_token,
            sell_token_amount: terms.sell_amount,
            buy_token_address: terms.buy_token,
            buy_token_amount: terms.buy_amount,
            contract_descriptor: Some(self.descriptor.to_json()?),
            escrow_auth_key: Some(self.secret_key),
            escrow_key_derivation_index: Some(self.descriptor.partial_address),
        })
    }
}

/// Result of `fill`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillSubmission {
    pub outcome: CallOutcome,
    pub fill_commitment: FieldElement,
}

pub struct EscrowClient<R: EscrowRuntime> {
    runtime: Arc<R>,
    witnesses: WitnessBuilder,
    call_timeout: Duration,
}

impl<R: EscrowRuntime> EscrowClient<R> {
    pub fn new(runtime: Arc<R>, call_timeout: Duration) -> Self {
        Self {
            runtime,
            witnesses: WitnessBuilder::new(),
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Derive a fresh escrow instance for `offer` and register its keys.
    ///
    /// Nothing is sent to the ledger: the returned capability already names the
    /// escrow address, so the caller can keep it before `deploy` is attempted.
    pub async fn instantiate(&self, maker: &SigningContext, offer: &Offer) -> Result<MakerCapability, RuntimeError> {
        let secret = MakerSecret::generate();
        let terms = EscrowTerms {
            sell_token: offer.sell_token,
            sell_amount: offer.sell_amount,
            buy_token: offer.buy_token,
            buy_amount: offer.buy_amount,
            maker_commitment: secret.commitment(),
        };
        let secret_key = FieldElement::random();
        let salt = FieldElement::random();

        let descriptor = self
            .runtime
            .compute_instance(maker.address(), &terms, salt, &secret_key)
            .await?;
        self.runtime
            .register_escrow(maker.address(), &descriptor, &secret_key, &descriptor.partial_address)
            .await?;
        debug!("Escrow {} instantiated for maker {}", descriptor.address, maker.address());

        let handle = EscrowHandle { descriptor, secret_key };
        Ok(MakerCapability::new(handle, maker.address(), secret))
    }

    /// Send the deployment of an instantiated escrow.
    ///
    /// The descriptor is deterministic, so re-sending after a lost deployment
    /// deploys the same address.
    pub async fn deploy(&self, maker: &SigningContext, escrow: &EscrowHandle) -> Result<CallOutcome, RuntimeError> {
        let terms = escrow.terms();
        info!(
            "Deploying escrow {} for maker {} ({} {} -> {} {})",
            escrow.address(),
            maker.address(),
            terms.sell_amount,
            terms.sell_token,
            terms.buy_amount,
            terms.buy_token
        );
        self.submit_and_wait(
            maker.address(),
            EscrowCall::Deploy {
                descriptor: escrow.descriptor.clone(),
            },
            Vec::new(),
        )
        .await
    }

    /// Fund the escrow with exactly the sell amount from `maker`
    pub async fn deposit(&self, maker: &SigningContext, escrow: &EscrowHandle) -> Result<CallOutcome, RuntimeError> {
        let terms = escrow.terms();
        let nonce = WitnessBuilder::fresh_nonce();
        let action = AuthAction::Deposit(TokenTransfer {
            token: terms.sell_token,
            from: maker.address(),
            to: escrow.address(),
            amount: terms.sell_amount,
            nonce,
        });
        let witness = self.witness(maker, escrow.address(), action, nonce)?;

        self.submit_and_wait(
            maker.address(),
            EscrowCall::Deposit {
                escrow: escrow.address(),
                nonce,
            },
            vec![witness],
        )
        .await
    }

    /// Pay the buy amount from `taker` and record `fill_commitment`
    pub async fn fill(
        &self,
        taker: &SigningContext,
        escrow: &EscrowHandle,
        fill_commitment: FieldElement,
    ) -> Result<FillSubmission, RuntimeError> {
        let terms = escrow.terms();
        let nonce = WitnessBuilder::fresh_nonce();
        let action = AuthAction::Fill(TokenTransfer {
            token: terms.buy_token,
            from: taker.address(),
            to: escrow.address(),
            amount: terms.buy_amount,
            nonce,
        });
        let witness = self.witness(taker, escrow.address(), action, nonce)?;

        let outcome = self
            .submit_and_wait(
                taker.address(),
                EscrowCall::Fill {
                    escrow: escrow.address(),
                    nonce,
                    fill_commitment,
                },
                vec![witness],
            )
            .await?;
        Ok(FillSubmission { outcome, fill_commitment })
    }

    /// Reveal the maker secret and release the purchased asset.
    ///
    /// The fill commitment the program checks against is read from the
    /// escrow's private events.
    pub async fn finalize(&self, maker: &SigningContext, capability: &MakerCapability) -> Result<CallOutcome, RuntimeError> {
        let escrow = capability.escrow();
        let Some(fill_commitment) = self.fill_commitments(maker.address(), escrow).await?.pop() else {
            debug!("Escrow {} has no fill event, nothing to finalize", escrow);
            return Ok(CallOutcome::Rejected(RejectReason::InvalidState(
                "escrow has not been filled".to_string(),
            )));
        };

        self.submit_and_wait(
            maker.address(),
            EscrowCall::Finalize {
                escrow,
                secret: capability.reveal(),
                fill_commitment,
            },
            Vec::new(),
        )
        .await
    }

    /// Refund the maker. Valid only before a fill.
    pub async fn cancel(&self, maker: &SigningContext, capability: &MakerCapability) -> Result<CallOutcome, RuntimeError> {
        self.submit_and_wait(
            maker.address(),
            EscrowCall::Cancel {
                escrow: capability.escrow(),
                secret: capability.reveal(),
            },
            Vec::new(),
        )
        .await
    }

    /// Register a listed escrow with `account`'s context and return its handle.
    ///
    /// The listing's descriptor must describe the listed escrow and the listed
    /// amounts; anything else is refused before any key material is registered.
    pub async fn register(&self, account: Address, order: &Order) -> Result<EscrowHandle, RuntimeError> {
        let descriptor_json = order.contract_descriptor.as_deref().ok_or_else(|| {
            RuntimeError::InvalidDescriptor(format!("order {} has no contract descriptor", order.order_id))
        })?;
        let secret_key = order.escrow_auth_key.ok_or_else(|| {
            RuntimeError::InvalidDescriptor(format!("order {} has no escrow key", order.order_id))
        })?;
        let partial_address = order.escrow_key_derivation_index.ok_or_else(|| {
            RuntimeError::InvalidDescriptor(format!("order {} has no key derivation index", order.order_id))
        })?;

        let descriptor = ContractDescriptor::from_json(descriptor_json)?;
        let terms = &descriptor.terms;
        if descriptor.address != order.escrow_address
            || terms.sell_token != order.sell_token_address
            || terms.sell_amount != order.sell_token_amount
            || terms.buy_token != order.buy_token_address
            || terms.buy_amount != order.buy_token_amount
        {
            warn!(
                "Order {} descriptor does not match its listing (escrow {})",
                order.order_id, order.escrow_address
            );
            return Err(RuntimeError::InvalidDescriptor(format!(
                "descriptor for order {} does not match the listed escrow terms",
                order.order_id
            )));
        }

        self.runtime
            .register_escrow(account, &descriptor, &secret_key, &partial_address)
            .await?;
        debug!("Registered escrow {} with account {}", descriptor.address, account);

        // the descriptor's own terms are only a claim until the program confirms them
        let on_chain = self.terms(account, descriptor.address).await?;
        if on_chain != descriptor.terms {
            warn!(
                "Order {} descriptor terms differ from escrow {} on the ledger",
                order.order_id, descriptor.address
            );
            return Err(RuntimeError::InvalidDescriptor(format!(
                "escrow {} was instantiated with different terms than order {} lists",
                descriptor.address, order.order_id
            )));
        }

        Ok(EscrowHandle { descriptor, secret_key })
    }

    /// Current on-chain status
    pub async fn status(&self, viewer: Address, escrow: Address) -> Result<EscrowStatus, RuntimeError> {
        match self.runtime.simulate(viewer, EscrowQuery::Status { escrow }).await? {
            QueryValue::Status(status) => Ok(status),
            other => Err(RuntimeError::Other(format!(
                "status query for {} returned {:?}",
                escrow, other
            ))),
        }
    }

    /// Terms the escrow was instantiated with, as the program reports them
    pub async fn terms(&self, viewer: Address, escrow: Address) -> Result<EscrowTerms, RuntimeError> {
        match self.runtime.simulate(viewer, EscrowQuery::Terms { escrow }).await? {
            QueryValue::Terms(terms) => Ok(terms),
            other => Err(RuntimeError::Other(format!(
                "terms query for {} returned {:?}",
                escrow, other
            ))),
        }
    }

    /// Whether the escrow records a fill paid by `taker`
    pub async fn filled_by(&self, viewer: Address, escrow: Address, taker: Address) -> Result<bool, RuntimeError> {
        let events = self.runtime.private_events(viewer, escrow).await?;
        Ok(events
            .iter()
            .any(|e| matches!(e.kind, EscrowEventKind::Filled { taker: t, .. } if t == taker)))
    }

    /// Fill commitments recorded by the escrow, oldest first
    pub async fn fill_commitments(&self, viewer: Address, escrow: Address) -> Result<Vec<FieldElement>, RuntimeError> {
        let events = self.runtime.private_events(viewer, escrow).await?;
        Ok(events
            .into_iter()
            .filter_map(|e| match e.kind {
                EscrowEventKind::Filled { fill_commitment, .. } => Some(fill_commitment),
                _ => None,
            })
            .collect())
    }

    fn witness(
        &self,
        granter: &SigningContext,
        escrow: Address,
        action: AuthAction,
        nonce: FieldElement,
    ) -> Result<AuthorizationWitness, RuntimeError> {
        Ok(self.witnesses.build(granter, escrow, action, nonce)?)
    }

    async fn submit_and_wait(
        &self,
        caller: Address,
        call: EscrowCall,
        witnesses: Vec<AuthorizationWitness>,
    ) -> Result<CallOutcome, RuntimeError> {
        let escrow = call.escrow();
        let method = call.method();

        let submitted = timeout(self.call_timeout, self.runtime.submit(caller, call, witnesses)).await;
        let tx_hash = match submitted {
            Ok(Ok(tx_hash)) => tx_hash,
            Ok(Err(RuntimeError::Rejected(reason))) => {
                warn!("{} on escrow {} rejected at submission: {}", method, escrow, reason);
                return Ok(CallOutcome::Rejected(reason));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(RuntimeError::Unavailable(format!(
                    "submission of {} did not complete within {:?}",
                    method, self.call_timeout
                )))
            }
        };

        debug!("{} on escrow {} submitted as {}", method, escrow, tx_hash);

        match timeout(self.call_timeout, self.runtime.wait_for_receipt(tx_hash, self.call_timeout)).await {
            Ok(result) => {
                let outcome = result?;
                match &outcome {
                    CallOutcome::Confirmed(receipt) => {
                        debug!("{} on escrow {} confirmed at block {}", method, escrow, receipt.block_number)
                    }
                    CallOutcome::TimedOut { .. } => {
                        warn!("{} on escrow {} not final after {:?}", method, escrow, self.call_timeout)
                    }
                    CallOutcome::Rejected(reason) => {
                        warn!("{} on escrow {} rejected: {}", method, escrow, reason)
                    }
                }
                Ok(outcome)
            }
            Err(_) => {
                warn!("{} on escrow {} not final after {:?}", method, escrow, self.call_timeout);
                Ok(CallOutcome::TimedOut { tx_hash })
            }
        }
    }
}
