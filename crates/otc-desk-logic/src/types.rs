//! Primitive types shared by the index, the witness builder and the escrow client
//!
//! Addresses, field elements and transaction hashes are all 32-byte values
//! rendered as `0x`-prefixed lowercase hex. Token amounts are `U256` and are
//! carried as decimal strings whenever they cross a serialization boundary.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error parsing a 32-byte hex value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHexError {
    #[error("hex value is empty")]
    Empty,
    #[error("hex value too long: at most 64 digits, got {0}")]
    TooLong(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// Error parsing a decimal token amount
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount must contain only decimal digits, got '{0}'")]
    NotDecimal(String),
    #[error("amount does not fit in 256 bits: {0}")]
    Overflow(String),
}

/// Parse up to 64 hex digits (with or without `0x`) into a left-padded 32-byte value.
pub fn parse_bytes32(input: &str) -> Result<[u8; 32], ParseHexError> {
    let digits = input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or(input.trim());
    if digits.is_empty() {
        return Err(ParseHexError::Empty);
    }
    if digits.len() > 64 {
        return Err(ParseHexError::TooLong(digits.len()));
    }

    let padded = format!("{:0>64}", digits);
    let bytes = hex::decode(&padded).map_err(|e| ParseHexError::InvalidHex(e.to_string()))?;

    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

macro_rules! bytes32_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Fresh value from the OS RNG
            pub fn random() -> Self {
                let mut bytes = [0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                Self(bytes)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_bytes32(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

bytes32_type!(
    /// Account, token or contract address
    Address
);

bytes32_type!(
    /// Opaque field element (nonces, commitments, key material)
    FieldElement
);

bytes32_type!(
    /// Transaction hash reported by the runtime
    TxHash
);

/// Parse a decimal token amount without any floating-point step.
pub fn parse_amount(input: &str) -> Result<U256, ParseAmountError> {
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseAmountError::NotDecimal(input.to_string()));
    }
    U256::from_str_radix(input, 10).map_err(|_| ParseAmountError::Overflow(input.to_string()))
}

/// Serde adapter carrying `U256` as a decimal string
pub mod decimal_u256 {
    use super::*;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_amount(&s).map_err(serde::de::Error::custom)
    }
}
