//! OTC Desk Logic - escrow-backed OTC order lifecycle
//!
//! A maker locks the sell side in a dedicated escrow and lists it; a taker
//! discovers the listing and fills it through a single-use transfer
//! authorization; the maker finalizes with a private secret.
//!
//! Key components:
//! - Order index (`OrderIndex` trait): in-memory store with snapshots, and an HTTP client
//! - Authorization witness builder (`authwit`)
//! - Escrow protocol client over a pluggable runtime (`EscrowRuntime` trait)
//! - Maker vault for per-escrow secrets
//! - Lifecycle coordinator keeping the index consistent with the ledger

pub mod api;
pub mod authwit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod escrow;
pub mod index;
pub mod index_client;
pub mod logging;
pub mod runtime;
pub mod secrets;
pub mod state;
pub mod types;
