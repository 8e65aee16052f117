//! Maker secrets and the vault that holds them
//!
//! The maker secret authorizes finalize and cancel. The escrow only ever sees
//! its commitment until the maker reveals it in one of those calls. None of
//! these types implement `Serialize`, and their `Debug` output is redacted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::escrow::EscrowHandle;
use crate::types::{Address, FieldElement};

fn commit(secret: &[u8; 32]) -> FieldElement {
    let mut hasher = Sha256::new();
    hasher.update(b"otc-maker-secret");
    hasher.update(secret);
    FieldElement::from_bytes(hasher.finalize().into())
}

/// Private value chosen at instantiation; only its commitment goes on-chain
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MakerSecret([u8; 32]);

impl MakerSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Commitment bound into the escrow terms
    pub fn commitment(&self) -> FieldElement {
        commit(&self.0)
    }

    /// Copy of the secret for a finalize or cancel call
    pub fn reveal(&self) -> RevealedSecret {
        RevealedSecret(self.0)
    }
}

impl fmt::Debug for MakerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MakerSecret(<redacted>)")
    }
}

/// Secret as carried inside a finalize or cancel call
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RevealedSecret([u8; 32]);

impl RevealedSecret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Whether this secret opens `commitment`
    pub fn opens(&self, commitment: &FieldElement) -> bool {
        commit(&self.0) == *commitment
    }
}

impl fmt::Debug for RevealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevealedSecret(<redacted>)")
    }
}

/// Everything the maker needs to drive an escrow after instantiation
#[derive(Debug)]
pub struct MakerCapability {
    pub handle: EscrowHandle,
    pub maker: Address,
    secret: MakerSecret,
}

impl MakerCapability {
    pub fn new(handle: EscrowHandle, maker: Address, secret: MakerSecret) -> Self {
        Self { handle, maker, secret }
    }

    pub fn escrow(&self) -> Address {
        self.handle.address()
    }

    pub fn reveal(&self) -> RevealedSecret {
        self.secret.reveal()
    }
}

/// Maker-side store of capabilities, keyed by escrow address
///
/// In-memory only. Durable custody belongs to the embedding wallet.
#[derive(Default)]
pub struct MakerVault {
    entries: Mutex<HashMap<Address, Arc<MakerCapability>>>,
}

impl MakerVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, capability: MakerCapability) -> Arc<MakerCapability> {
        let capability = Arc::new(capability);
        self.entries
            .lock()
            .await
            .insert(capability.escrow(), capability.clone());
        capability
    }

    pub async fn get(&self, escrow: &Address) -> Option<Arc<MakerCapability>> {
        self.entries.lock().await.get(escrow).cloned()
    }

    pub async fn remove(&self, escrow: &Address) -> Option<Arc<MakerCapability>> {
        self.entries.lock().await.remove(escrow)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reveal_opens_commitment() {
        let secret = MakerSecret::generate();
        let commitment = secret.commitment();
        assert!(secret.reveal().opens(&commitment));
        assert!(!MakerSecret::generate().reveal().opens(&commitment));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = MakerSecret::generate();
        let revealed = secret.reveal();
        assert_eq!(format!("{:?}", secret), "MakerSecret(<redacted>)");
        assert_eq!(format!("{:?}", revealed), "RevealedSecret(<redacted>)");
    }
}
