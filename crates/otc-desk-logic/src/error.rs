//! Error types for the OTC desk
//!
//! Each layer has its own error: the index store (`IndexError`), the runtime
//! collaborator (`RuntimeError`), witness construction (`WitnessError`). Only the
//! lifecycle coordinator translates them into `LifecycleError`, which is the
//! taxonomy callers act on.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Address, FieldElement};

/// Errors from an order index store
#[derive(Error, Debug)]
pub enum IndexError {
    /// An order for this escrow is already listed
    #[error("Order with escrow address {0} already exists")]
    DuplicateListing(Address),

    /// Durable write or read failed
    #[error("Order store failure: {0}")]
    Storage(String),

    /// Remote index did not respond
    #[error("Order index unreachable: {0}")]
    Transport(String),

    /// Remote index answered with something we could not interpret
    #[error("Unexpected order index response: {0}")]
    Protocol(String),
}

/// Why the escrow program rejected a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Lifecycle precondition violated (wrong escrow state)
    InvalidState(String),
    /// Witness or secret did not match what the program re-derived
    AuthorizationMismatch(String),
    /// Anything else the program reported
    Other(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidState(m) => write!(f, "invalid state: {}", m),
            RejectReason::AuthorizationMismatch(m) => write!(f, "authorization mismatch: {}", m),
            RejectReason::Other(m) => write!(f, "{}", m),
        }
    }
}

/// Raw errors reported by the runtime collaborator
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    /// Transport to the runtime or ledger did not respond
    #[error("Runtime unavailable: {0}")]
    Unavailable(String),

    /// The call was rejected during simulation or submission
    #[error("Call rejected: {0}")]
    Rejected(RejectReason),

    /// Escrow keys are not registered with this account's private context
    #[error("Escrow {0} is not registered with the private execution context")]
    NotRegistered(Address),

    /// Escrow does not exist on the ledger
    #[error("Unknown escrow {0}")]
    UnknownEscrow(Address),

    /// A listing carried an unusable contract descriptor or key material
    #[error("Invalid escrow descriptor: {0}")]
    InvalidDescriptor(String),

    /// The witness builder refused to sign the call's authorization
    #[error("Witness construction failed: {0}")]
    Witness(#[from] WitnessError),

    #[error("Runtime error: {0}")]
    Other(String),
}

/// Errors constructing or checking an authorization witness
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WitnessError {
    #[error("Nonce {nonce} already used by granter {granter}")]
    NonceReused { granter: Address, nonce: FieldElement },

    #[error("Action nonce {action} does not match witness nonce {witness}")]
    NonceMismatch { action: FieldElement, witness: FieldElement },

    #[error("Action transfers from {action_from} but the granter is {granter}")]
    GranterMismatch { granter: Address, action_from: Address },

    #[error("Witness grantee {actual} does not match expected caller {expected}")]
    GranteeMismatch { expected: Address, actual: Address },

    #[error("Witness action does not match the call being executed")]
    ActionMismatch,

    #[error("Witness signature is invalid")]
    InvalidSignature,
}

/// Lifecycle step, used in error and log context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Instantiate,
    Deposit,
    Publish,
    Fill,
    Finalize,
    Cancel,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Instantiate => write!(f, "instantiate"),
            Step::Deposit => write!(f, "deposit"),
            Step::Publish => write!(f, "publish"),
            Step::Fill => write!(f, "fill"),
            Step::Finalize => write!(f, "finalize"),
            Step::Cancel => write!(f, "cancel"),
        }
    }
}

/// Order lifecycle error taxonomy
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The escrow is already listed. Never retried automatically.
    #[error("Duplicate listing for escrow {0}")]
    DuplicateListing(Address),

    /// On-chain precondition violated, typically a lost race
    #[error("Escrow {escrow} rejected {step}: {reason}")]
    InvalidState { escrow: Address, step: Step, reason: String },

    /// Witness or secret mismatch. Fatal.
    #[error("Authorization mismatch on {step} for escrow {escrow}: {reason}")]
    AuthorizationMismatch { escrow: Address, step: Step, reason: String },

    /// Runtime or ledger did not respond
    #[error("Network unavailable during {step}: {reason}")]
    NetworkUnavailable { step: Step, reason: String },

    /// Submitted, but finality was not observed in time and the ledger did not show the step
    #[error("Timed out after {waited:?} waiting for {step} on escrow {escrow}")]
    Timeout { escrow: Address, step: Step, waited: Duration },

    /// Escrow instantiated but not deposited or not published; resume at deposit
    #[error("Escrow {escrow_address} created but not listed: {cause}")]
    PartialCreateFailure {
        escrow_address: Address,
        cause: Box<LifecycleError>,
    },

    /// Filled or cancelled on-chain but the listing could not be removed.
    /// `order_id` is `None` when the listing itself could not be looked up.
    #[error("Escrow {escrow_address} needs reconciliation of its listing: {cause}")]
    ReconciliationRequired {
        order_id: Option<String>,
        escrow_address: Address,
        cause: String,
    },

    /// No listing, lifecycle record or vault entry for the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// This coordinator already has a lifecycle call in flight for the escrow
    #[error("A lifecycle call is already in flight for escrow {0}")]
    AlreadyInFlight(Address),

    #[error("Order index error: {0}")]
    Index(IndexError),

    #[error("Witness error: {0}")]
    Witness(#[from] WitnessError),

    #[error("Runtime error during {step}: {source}")]
    Runtime { step: Step, source: RuntimeError },
}

impl LifecycleError {
    /// Safe to retry with a fresh nonce and witness
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::NetworkUnavailable { .. } | LifecycleError::Timeout { .. } => true,
            LifecycleError::PartialCreateFailure { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// The escrow was already moved on by someone else
    pub fn is_lost_race(&self) -> bool {
        matches!(self, LifecycleError::InvalidState { .. })
    }
}

impl From<IndexError> for LifecycleError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DuplicateListing(escrow) => LifecycleError::DuplicateListing(escrow),
            other => LifecycleError::Index(other),
        }
    }
}
