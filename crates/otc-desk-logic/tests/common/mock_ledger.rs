//! In-memory ledger and escrow program for lifecycle tests
//!
//! Simulates the runtime collaborator without external dependencies:
//! - Private token balances per (token, holder)
//! - Escrow instances with the Created/Deposited/Filled/Finalized/Cancelled machine
//! - Witness verification against the action re-derived from each call
//! - Key registration gating private reads and calls
//! - Fault injection: unreachable submissions, withheld receipts, lost transactions

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use otc_desk_logic::authwit::{verify_witness, AuthAction, AuthorizationWitness, TokenTransfer};
use otc_desk_logic::error::{RejectReason, RuntimeError};
use otc_desk_logic::runtime::{
    CallOutcome, ContractDescriptor, EscrowCall, EscrowEventKind, EscrowQuery, EscrowRuntime,
    EscrowStatus, EscrowTerms, PrivateEvent, QueryValue, Receipt,
};
use otc_desk_logic::types::{Address, FieldElement, TxHash};

/// What happens to the next submission of a given method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Submission fails with `Unavailable`; nothing is applied
    Unreachable,
    /// Applied, but the receipt never arrives
    WithholdReceipt,
    /// Accepted for submission but never applied; the receipt never arrives
    Lose,
}

#[derive(Debug, Clone)]
struct MockEscrow {
    descriptor: ContractDescriptor,
    status: EscrowStatus,
    taker: Option<Address>,
    fill_commitment: Option<FieldElement>,
    events: Vec<PrivateEvent>,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    next_tx: u64,
    balances: HashMap<(Address, Address), U256>,
    escrows: HashMap<Address, MockEscrow>,
    registrations: HashSet<(Address, Address)>,
    consumed_nonces: HashSet<(Address, FieldElement)>,
    receipts: HashMap<TxHash, Receipt>,
    withheld: HashSet<TxHash>,
    faults: HashMap<&'static str, Vec<Fault>>,
    applied: HashMap<&'static str, usize>,
    offline: bool,
    /// Remaining `private_events` reads that fail with `Unavailable`
    failing_event_reads: usize,
}

/// Simulated ledger plus escrow program
pub struct MockLedger {
    state: Mutex<LedgerState>,
    receipt_delay: Mutex<Duration>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                height: 1_000,
                ..Default::default()
            }),
            receipt_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn mint(&self, token: Address, holder: Address, amount: u64) {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry((token, holder)).or_default() += U256::from(amount);
    }

    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        let state = self.state.lock().unwrap();
        state.balances.get(&(token, holder)).copied().unwrap_or_default()
    }

    pub fn status_of(&self, escrow: Address) -> Option<EscrowStatus> {
        self.state.lock().unwrap().escrows.get(&escrow).map(|e| e.status)
    }

    pub fn escrow_count(&self) -> usize {
        self.state.lock().unwrap().escrows.len()
    }

    /// Number of successfully applied calls of `method`
    pub fn applied(&self, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.applied.get(method).copied().unwrap_or(0)
    }

    /// Queue a fault for the next submission of `method` (e.g. "fill_order")
    pub fn inject(&self, method: &'static str, fault: Fault) {
        self.state.lock().unwrap().faults.entry(method).or_default().push(fault);
    }

    /// All queries and submissions fail with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// The next `count` private event reads fail with `Unavailable`
    pub fn fail_event_reads(&self, count: usize) {
        self.state.lock().unwrap().failing_event_reads = count;
    }

    /// How long `wait_for_receipt` takes to observe finality
    pub fn set_receipt_delay(&self, delay: Duration) {
        *self.receipt_delay.lock().unwrap() = delay;
    }

    fn check_online(state: &LedgerState) -> Result<(), RuntimeError> {
        if state.offline {
            return Err(RuntimeError::Unavailable("ledger unreachable".to_string()));
        }
        Ok(())
    }
}

fn keys_hash(secret_key: &FieldElement) -> FieldElement {
    let mut h = Sha256::new();
    h.update(b"keys");
    h.update(secret_key.as_bytes());
    FieldElement::from_bytes(h.finalize().into())
}

fn partial_address(deployer: &Address, terms: &EscrowTerms, salt: &FieldElement) -> FieldElement {
    let mut h = Sha256::new();
    h.update(b"partial");
    h.update(deployer.as_bytes());
    h.update(salt.as_bytes());
    h.update(serde_json::to_vec(terms).unwrap());
    FieldElement::from_bytes(h.finalize().into())
}

fn escrow_address(public_keys_hash: &FieldElement, partial: &FieldElement) -> Address {
    let mut h = Sha256::new();
    h.update(b"address");
    h.update(public_keys_hash.as_bytes());
    h.update(partial.as_bytes());
    Address::from_bytes(h.finalize().into())
}

fn invalid_state(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::Rejected(RejectReason::InvalidState(msg.into()))
}

fn mismatch(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::Rejected(RejectReason::AuthorizationMismatch(msg.into()))
}

fn other(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::Rejected(RejectReason::Other(msg.into()))
}

impl LedgerState {
    fn escrow(&self, address: &Address) -> Result<&MockEscrow, RuntimeError> {
        self.escrows.get(address).ok_or(RuntimeError::UnknownEscrow(*address))
    }

    fn require_registered(&self, account: Address, escrow: Address) -> Result<(), RuntimeError> {
        if !self.registrations.contains(&(account, escrow)) {
            return Err(RuntimeError::NotRegistered(escrow));
        }
        Ok(())
    }

    fn transfer(&mut self, token: Address, from: Address, to: Address, amount: U256) -> Result<(), RuntimeError> {
        let from_balance = self.balances.get(&(token, from)).copied().unwrap_or_default();
        if from_balance < amount {
            return Err(other(format!("insufficient balance of {} for {}", token, from)));
        }
        self.balances.insert((token, from), from_balance - amount);
        *self.balances.entry((token, to)).or_default() += amount;
        Ok(())
    }

    /// Check the witness for `expected` and burn its nonce
    fn consume_witness(
        &mut self,
        escrow: Address,
        expected: &AuthAction,
        witnesses: &[AuthorizationWitness],
    ) -> Result<(), RuntimeError> {
        let witness = witnesses
            .iter()
            .find(|w| w.grantee == escrow)
            .ok_or_else(|| mismatch("no authorization witness for this escrow"))?;
        verify_witness(witness, &escrow, expected).map_err(|e| mismatch(e.to_string()))?;

        let key = (witness.granter, witness.nonce);
        if !self.consumed_nonces.insert(key) {
            return Err(mismatch("witness nonce already consumed"));
        }
        Ok(())
    }

    fn apply(&mut self, caller: Address, call: &EscrowCall, witnesses: &[AuthorizationWitness]) -> Result<(), RuntimeError> {
        let block_number = self.height + 1;
        match call {
            EscrowCall::Deploy { descriptor } => {
                if descriptor.deployer != caller {
                    return Err(mismatch("deployer is not the caller"));
                }
                let partial = partial_address(&descriptor.deployer, &descriptor.terms, &descriptor.salt);
                if partial != descriptor.partial_address
                    || escrow_address(&descriptor.public_keys_hash, &partial) != descriptor.address
                {
                    return Err(other("descriptor does not match its deployment"));
                }
                if self.escrows.contains_key(&descriptor.address) {
                    return Err(other("escrow already deployed"));
                }
                self.escrows.insert(
                    descriptor.address,
                    MockEscrow {
                        descriptor: descriptor.clone(),
                        status: EscrowStatus::Created,
                        taker: None,
                        fill_commitment: None,
                        events: Vec::new(),
                    },
                );
            }
            EscrowCall::Deposit { escrow, nonce } => {
                self.require_registered(caller, *escrow)?;
                let e = self.escrow(escrow)?.clone();
                if e.status != EscrowStatus::Created {
                    return Err(invalid_state(format!("cannot deposit: escrow is {}", e.status)));
                }
                if caller != e.descriptor.deployer {
                    return Err(mismatch("only the maker may deposit"));
                }
                let terms = &e.descriptor.terms;
                let expected = AuthAction::Deposit(TokenTransfer {
                    token: terms.sell_token,
                    from: caller,
                    to: *escrow,
                    amount: terms.sell_amount,
                    nonce: *nonce,
                });
                self.consume_witness(*escrow, &expected, witnesses)?;
                self.transfer(terms.sell_token, caller, *escrow, terms.sell_amount)?;

                let entry = self.escrows.get_mut(escrow).unwrap();
                entry.status = EscrowStatus::Deposited;
                entry.events.push(PrivateEvent {
                    escrow: *escrow,
                    block_number,
                    kind: EscrowEventKind::Deposited {
                        maker: caller,
                        amount: terms.sell_amount,
                    },
                });
            }
            EscrowCall::Fill {
                escrow,
                nonce,
                fill_commitment,
            } => {
                self.require_registered(caller, *escrow)?;
                let e = self.escrow(escrow)?.clone();
                if e.status != EscrowStatus::Deposited {
                    return Err(invalid_state(format!("cannot fill: escrow is {}", e.status)));
                }
                let terms = &e.descriptor.terms;
                let expected = AuthAction::Fill(TokenTransfer {
                    token: terms.buy_token,
                    from: caller,
                    to: *escrow,
                    amount: terms.buy_amount,
                    nonce: *nonce,
                });
                self.consume_witness(*escrow, &expected, witnesses)?;
                self.transfer(terms.buy_token, caller, *escrow, terms.buy_amount)?;

                let entry = self.escrows.get_mut(escrow).unwrap();
                entry.status = EscrowStatus::Filled;
                entry.taker = Some(caller);
                entry.fill_commitment = Some(*fill_commitment);
                entry.events.push(PrivateEvent {
                    escrow: *escrow,
                    block_number,
                    kind: EscrowEventKind::Filled {
                        taker: caller,
                        fill_commitment: *fill_commitment,
                    },
                });
            }
            EscrowCall::Finalize {
                escrow,
                secret,
                fill_commitment,
            } => {
                let e = self.escrow(escrow)?.clone();
                if caller != e.descriptor.deployer {
                    return Err(mismatch("only the maker may finalize"));
                }
                if e.status != EscrowStatus::Filled {
                    return Err(invalid_state(format!("cannot finalize: escrow is {}", e.status)));
                }
                if !secret.opens(&e.descriptor.terms.maker_commitment) {
                    return Err(mismatch("maker secret does not open the commitment"));
                }
                if e.fill_commitment != Some(*fill_commitment) {
                    return Err(mismatch("fill commitment does not match"));
                }
                let terms = &e.descriptor.terms;
                let taker = e.taker.ok_or_else(|| invalid_state("filled escrow has no taker"))?;
                self.transfer(terms.buy_token, *escrow, caller, terms.buy_amount)?;
                self.transfer(terms.sell_token, *escrow, taker, terms.sell_amount)?;

                let entry = self.escrows.get_mut(escrow).unwrap();
                entry.status = EscrowStatus::Finalized;
                entry.events.push(PrivateEvent {
                    escrow: *escrow,
                    block_number,
                    kind: EscrowEventKind::Finalized,
                });
            }
            EscrowCall::Cancel { escrow, secret } => {
                let e = self.escrow(escrow)?.clone();
                if caller != e.descriptor.deployer {
                    return Err(mismatch("only the maker may cancel"));
                }
                if !matches!(e.status, EscrowStatus::Created | EscrowStatus::Deposited) {
                    return Err(invalid_state(format!("cannot cancel: escrow is {}", e.status)));
                }
                if !secret.opens(&e.descriptor.terms.maker_commitment) {
                    return Err(mismatch("maker secret does not open the commitment"));
                }
                if e.status == EscrowStatus::Deposited {
                    let terms = &e.descriptor.terms;
                    self.transfer(terms.sell_token, *escrow, caller, terms.sell_amount)?;
                }

                let entry = self.escrows.get_mut(escrow).unwrap();
                entry.status = EscrowStatus::Cancelled;
                entry.events.push(PrivateEvent {
                    escrow: *escrow,
                    block_number,
                    kind: EscrowEventKind::Cancelled,
                });
            }
        }
        self.height = block_number;
        Ok(())
    }

    fn next_tx_hash(&mut self) -> TxHash {
        self.next_tx += 1;
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&self.next_tx.to_be_bytes());
        TxHash::from_bytes(bytes)
    }
}

#[async_trait]
impl EscrowRuntime for MockLedger {
    async fn compute_instance(
        &self,
        deployer: Address,
        terms: &EscrowTerms,
        salt: FieldElement,
        secret_key: &FieldElement,
    ) -> Result<ContractDescriptor, RuntimeError> {
        let public_keys_hash = keys_hash(secret_key);
        let partial = partial_address(&deployer, terms, &salt);
        Ok(ContractDescriptor {
            address: escrow_address(&public_keys_hash, &partial),
            deployer,
            salt,
            public_keys_hash,
            partial_address: partial,
            terms: terms.clone(),
        })
    }

    async fn register_escrow(
        &self,
        account: Address,
        descriptor: &ContractDescriptor,
        secret_key: &FieldElement,
        partial_address: &FieldElement,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if keys_hash(secret_key) != descriptor.public_keys_hash
            || *partial_address != descriptor.partial_address
            || escrow_address(&descriptor.public_keys_hash, partial_address) != descriptor.address
        {
            return Err(RuntimeError::InvalidDescriptor(
                "key material does not derive the escrow address".to_string(),
            ));
        }
        state.registrations.insert((account, descriptor.address));
        Ok(())
    }

    async fn simulate(&self, _caller: Address, query: EscrowQuery) -> Result<QueryValue, RuntimeError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        match query {
            EscrowQuery::Status { escrow } => Ok(QueryValue::Status(state.escrow(&escrow)?.status)),
            EscrowQuery::Terms { escrow } => Ok(QueryValue::Terms(state.escrow(&escrow)?.descriptor.terms.clone())),
        }
    }

    async fn submit(
        &self,
        caller: Address,
        call: EscrowCall,
        witnesses: Vec<AuthorizationWitness>,
    ) -> Result<TxHash, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;

        let method = call.method();
        let fault = state
            .faults
            .get_mut(method)
            .and_then(|queue| if queue.is_empty() { None } else { Some(queue.remove(0)) });

        match fault {
            Some(Fault::Unreachable) => Err(RuntimeError::Unavailable(format!("{} submission dropped", method))),
            Some(Fault::Lose) => {
                let tx_hash = state.next_tx_hash();
                state.withheld.insert(tx_hash);
                Ok(tx_hash)
            }
            fault => {
                state.apply(caller, &call, &witnesses)?;
                *state.applied.entry(method).or_default() += 1;
                let tx_hash = state.next_tx_hash();
                let block_number = state.height;
                state.receipts.insert(tx_hash, Receipt { tx_hash, block_number });
                if fault == Some(Fault::WithholdReceipt) {
                    state.withheld.insert(tx_hash);
                }
                Ok(tx_hash)
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash, timeout: Duration) -> Result<CallOutcome, RuntimeError> {
        let delay = *self.receipt_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay.min(timeout)).await;
            if delay > timeout {
                return Ok(CallOutcome::TimedOut { tx_hash });
            }
        }

        let state = self.state.lock().unwrap();
        if state.withheld.contains(&tx_hash) {
            return Ok(CallOutcome::TimedOut { tx_hash });
        }
        match state.receipts.get(&tx_hash) {
            Some(receipt) => Ok(CallOutcome::Confirmed(*receipt)),
            None => Err(RuntimeError::Other(format!("unknown transaction {}", tx_hash))),
        }
    }

    async fn block_height(&self) -> Result<u64, RuntimeError> {
        let state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        Ok(state.height)
    }

    async fn private_events(&self, viewer: Address, escrow: Address) -> Result<Vec<PrivateEvent>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check_online(&state)?;
        if state.failing_event_reads > 0 {
            state.failing_event_reads -= 1;
            return Err(RuntimeError::Unavailable("event indexer unreachable".to_string()));
        }
        state.require_registered(viewer, escrow)?;
        Ok(state.escrow(&escrow)?.events.clone())
    }
}
