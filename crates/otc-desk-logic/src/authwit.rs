//! Authorization witnesses: scoped, single-use transfer capabilities
//!
//! A witness lets one caller (the grantee, always an escrow instance) execute
//! exactly one token transfer against the granter's private balance.
//!
//! ## Canonical Format
//!
//! Each action is serialized as `key=value\n` lines in a fixed order. Addresses
//! and field elements are `0x`-prefixed lowercase hex; amounts are decimal.
//!
//! ## Signing Scheme
//!
//! `ed25519-sha256-authwit-v1`:
//! `Sign(Ed25519, SHA-256(grantee || SHA-256(canonical_action)))`
//!
//! The inner hash binds the action; the outer hash binds it to the one caller
//! allowed to consume it. The escrow program re-derives the action from the
//! call it is executing, so a witness built for a different amount, token or
//! nonce fails verification.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use alloy_primitives::U256;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::WitnessError;
use crate::types::{Address, FieldElement};

// ============================================================================
// Signing context
// ============================================================================

/// An account address plus the Ed25519 key that signs on its behalf
///
/// The address is derived from the public key (`SHA-256(public_key)`), so a
/// verifier can check that a witness was signed by the granter it names.
pub struct SigningContext {
    address: Address,
    signing_key: SigningKey,
}

impl SigningContext {
    /// Fresh account key from the OS RNG
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(signing_key.verifying_key().as_bytes());
        Self { address, signing_key }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Account address for an Ed25519 public key
pub fn address_of(public_key: &[u8; 32]) -> Address {
    let digest: [u8; 32] = Sha256::digest(public_key).into();
    Address::from_bytes(digest)
}

// ============================================================================
// Actions
// ============================================================================

/// A private-to-private token transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub nonce: FieldElement,
}

/// The closed set of actions a witness can authorize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Maker funds the escrow with the sell-side asset
    Deposit(TokenTransfer),
    /// Taker pays the buy-side asset into the escrow
    Fill(TokenTransfer),
}

impl AuthAction {
    pub fn transfer(&self) -> &TokenTransfer {
        match self {
            AuthAction::Deposit(t) | AuthAction::Fill(t) => t,
        }
    }

    pub fn nonce(&self) -> FieldElement {
        self.transfer().nonce
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthAction::Deposit(_) => "deposit",
            AuthAction::Fill(_) => "fill",
        }
    }

    /// Canonical payload for this action
    pub fn canonical(&self) -> Vec<u8> {
        let t = self.transfer();
        format!(
            "action={}\nmethod=transfer_private_to_private\ntoken={}\nfrom={}\nto={}\namount={}\nnonce={}\n",
            self.kind(),
            t.token,
            t.from,
            t.to,
            t.amount,
            t.nonce
        )
        .into_bytes()
    }

    /// Hash the granter signs: `SHA-256(grantee || SHA-256(canonical))`
    pub fn message_hash(&self, grantee: &Address) -> [u8; 32] {
        let inner = Sha256::digest(self.canonical());
        let mut outer = Sha256::new();
        outer.update(grantee.as_bytes());
        outer.update(inner);
        outer.finalize().into()
    }
}

// ============================================================================
// Witness
// ============================================================================

/// Signed, single-use authorization for one action
///
/// Never persisted; built immediately before the call that consumes it.
#[derive(Debug, Clone)]
pub struct AuthorizationWitness {
    pub granter: Address,
    pub grantee: Address,
    pub action: AuthAction,
    pub nonce: FieldElement,
    pub public_key: [u8; 32],
    pub signature: [u8; 64],
}

/// Builds witnesses and refuses to issue the same nonce twice for a granter
#[derive(Debug, Default)]
pub struct WitnessBuilder {
    issued: Mutex<HashMap<Address, HashSet<FieldElement>>>,
}

impl WitnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unpredictable nonce from the OS RNG
    pub fn fresh_nonce() -> FieldElement {
        FieldElement::random()
    }

    /// Sign `action` for `grantee`.
    ///
    /// `nonce` must equal the nonce embedded in the action, the action must
    /// transfer from the granter, and the nonce must not have been issued
    /// before by this granter.
    pub fn build(
        &self,
        granter: &SigningContext,
        grantee: Address,
        action: AuthAction,
        nonce: FieldElement,
    ) -> Result<AuthorizationWitness, WitnessError> {
        if action.nonce() != nonce {
            return Err(WitnessError::NonceMismatch {
                action: action.nonce(),
                witness: nonce,
            });
        }
        if action.transfer().from != granter.address() {
            return Err(WitnessError::GranterMismatch {
                granter: granter.address(),
                action_from: action.transfer().from,
            });
        }

        {
            let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
            if !issued.entry(granter.address()).or_default().insert(nonce) {
                return Err(WitnessError::NonceReused {
                    granter: granter.address(),
                    nonce,
                });
            }
        }

        let signature = granter.sign(&action.message_hash(&grantee));

        debug!(
            "Built {} witness: granter={} grantee={} amount={} nonce={}",
            action.kind(),
            granter.address(),
            grantee,
            action.transfer().amount,
            nonce
        );

        Ok(AuthorizationWitness {
            granter: granter.address(),
            grantee,
            action,
            nonce,
            public_key: granter.public_key(),
            signature: signature.to_bytes(),
        })
    }
}

/// Check a witness against the call actually being executed.
///
/// `expected_grantee` is the contract consuming the witness and
/// `expected_action` is the action re-derived from the call's arguments.
pub fn verify_witness(
    witness: &AuthorizationWitness,
    expected_grantee: &Address,
    expected_action: &AuthAction,
) -> Result<(), WitnessError> {
    if witness.grantee != *expected_grantee {
        return Err(WitnessError::GranteeMismatch {
            expected: *expected_grantee,
            actual: witness.grantee,
        });
    }
    if witness.action != *expected_action {
        return Err(WitnessError::ActionMismatch);
    }
    if witness.nonce != expected_action.nonce() {
        return Err(WitnessError::NonceMismatch {
            action: expected_action.nonce(),
            witness: witness.nonce,
        });
    }
    if address_of(&witness.public_key) != witness.granter
        || expected_action.transfer().from != witness.granter
    {
        return Err(WitnessError::GranterMismatch {
            granter: witness.granter,
            action_from: expected_action.transfer().from,
        });
    }

    let verifying_key =
        VerifyingKey::from_bytes(&witness.public_key).map_err(|_| WitnessError::InvalidSignature)?;
    let signature = Signature::from_bytes(&witness.signature);
    verifying_key
        .verify(&expected_action.message_hash(expected_grantee), &signature)
        .map_err(|_| WitnessError::InvalidSignature)
}
