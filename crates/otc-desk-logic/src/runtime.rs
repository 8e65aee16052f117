//! Runtime collaborator interface
//!
//! The proving and submission runtime, the escrow program and the ledger are
//! external. `EscrowRuntime` is the seam: the escrow client drives it, tests
//! drive it with an in-memory ledger, and a production wallet bridge
//! implements it against the real network.

use std::fmt;
use std::time::Duration;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::authwit::AuthorizationWitness;
use crate::error::{RejectReason, RuntimeError};
use crate::secrets::RevealedSecret;
use crate::types::{decimal_u256, Address, FieldElement, TxHash};

// ============================================================================
// Escrow instance records
// ============================================================================

/// Immutable terms an escrow is instantiated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTerms {
    pub sell_token: Address,
    #[serde(with = "decimal_u256")]
    pub sell_amount: U256,
    pub buy_token: Address,
    #[serde(with = "decimal_u256")]
    pub buy_amount: U256,
    /// Commitment to the maker secret
    pub maker_commitment: FieldElement,
}

/// Deterministic instance record of an escrow deployment
///
/// Published in the listing so a taker can register the escrow before
/// touching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDescriptor {
    pub address: Address,
    pub deployer: Address,
    pub salt: FieldElement,
    pub public_keys_hash: FieldElement,
    pub partial_address: FieldElement,
    pub terms: EscrowTerms,
}

impl ContractDescriptor {
    pub fn to_json(&self) -> Result<String, RuntimeError> {
        serde_json::to_string(self).map_err(|e| RuntimeError::InvalidDescriptor(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        serde_json::from_str(json).map_err(|e| RuntimeError::InvalidDescriptor(e.to_string()))
    }
}

// ============================================================================
// Calls and queries
// ============================================================================

/// A state-changing escrow call
#[derive(Debug, Clone)]
pub enum EscrowCall {
    Deploy {
        descriptor: ContractDescriptor,
    },
    /// Pull `sell_amount` of the sell token from the caller
    Deposit {
        escrow: Address,
        nonce: FieldElement,
    },
    /// Pay `buy_amount` of the buy token from the caller and record a fill commitment
    Fill {
        escrow: Address,
        nonce: FieldElement,
        fill_commitment: FieldElement,
    },
    /// Release both legs; requires the maker secret and the recorded fill commitment
    Finalize {
        escrow: Address,
        secret: RevealedSecret,
        fill_commitment: FieldElement,
    },
    /// Refund the maker before any fill
    Cancel {
        escrow: Address,
        secret: RevealedSecret,
    },
}

impl EscrowCall {
    pub fn escrow(&self) -> Address {
        match self {
            EscrowCall::Deploy { descriptor } => descriptor.address,
            EscrowCall::Deposit { escrow, .. }
            | EscrowCall::Fill { escrow, .. }
            | EscrowCall::Finalize { escrow, .. }
            | EscrowCall::Cancel { escrow, .. } => *escrow,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            EscrowCall::Deploy { .. } => "constructor",
            EscrowCall::Deposit { .. } => "deposit_tokens",
            EscrowCall::Fill { .. } => "fill_order",
            EscrowCall::Finalize { .. } => "finalize_order",
            EscrowCall::Cancel { .. } => "cancel_order",
        }
    }
}

/// Read-only escrow methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowQuery {
    Status { escrow: Address },
    Terms { escrow: Address },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Status(EscrowStatus),
    Terms(EscrowTerms),
}

/// On-chain escrow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscrowStatus {
    Created,
    Deposited,
    Filled,
    Finalized,
    Cancelled,
}

impl EscrowStatus {
    /// Only a funded, unfilled escrow can take a fill; a listing in any other state is stale
    pub fn is_fillable(&self) -> bool {
        *self == EscrowStatus::Deposited
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowStatus::Created => write!(f, "created"),
            EscrowStatus::Deposited => write!(f, "deposited"),
            EscrowStatus::Filled => write!(f, "filled"),
            EscrowStatus::Finalized => write!(f, "finalized"),
            EscrowStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ============================================================================
// Outcomes and events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// Result of waiting on a submitted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Confirmed(Receipt),
    /// Finality not observed within the bound. The call may still land.
    TimedOut { tx_hash: TxHash },
    Rejected(RejectReason),
}

/// Private log entry emitted by an escrow, readable by registered accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateEvent {
    pub escrow: Address,
    pub block_number: u64,
    pub kind: EscrowEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowEventKind {
    Deposited { maker: Address, amount: U256 },
    Filled { taker: Address, fill_commitment: FieldElement },
    Finalized,
    Cancelled,
}

// ============================================================================
// Runtime trait
// ============================================================================

/// Proving and submission runtime bound to a ledger
#[async_trait]
pub trait EscrowRuntime: Send + Sync {
    /// Deterministic instance record for a deployment, computed before it is sent
    async fn compute_instance(
        &self,
        deployer: Address,
        terms: &EscrowTerms,
        salt: FieldElement,
        secret_key: &FieldElement,
    ) -> Result<ContractDescriptor, RuntimeError>;

    /// Register an escrow's decryption material with `account`'s private context
    async fn register_escrow(
        &self,
        account: Address,
        descriptor: &ContractDescriptor,
        secret_key: &FieldElement,
        partial_address: &FieldElement,
    ) -> Result<(), RuntimeError>;

    /// Simulate a read-only method
    async fn simulate(&self, caller: Address, query: EscrowQuery) -> Result<QueryValue, RuntimeError>;

    /// Prove and send a call. Simulation failures surface as `RuntimeError::Rejected`.
    async fn submit(
        &self,
        caller: Address,
        call: EscrowCall,
        witnesses: Vec<AuthorizationWitness>,
    ) -> Result<TxHash, RuntimeError>;

    /// Wait for finality of a submitted call, up to `timeout`
    async fn wait_for_receipt(&self, tx_hash: TxHash, timeout: Duration) -> Result<CallOutcome, RuntimeError>;

    async fn block_height(&self) -> Result<u64, RuntimeError>;

    /// Private events of `escrow` visible to `viewer`
    async fn private_events(&self, viewer: Address, escrow: Address) -> Result<Vec<PrivateEvent>, RuntimeError>;
}
