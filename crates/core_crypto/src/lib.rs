//! core_crypto — cryptographic primitives for the messaging core.
//!
//! # Design principles
//! - No custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//!
//! # Module layout
//! - `identity` — long-term X25519 identity keypair
//! - `ratchet`  — `Peer`: the two-DH handshake + single-state symmetric ratchet
//! - `aead`     — AES-256-GCM encrypt/decrypt helpers
//! - `kdf`      — HKDF-SHA256 key derivation (`hkdf32`, `kdf_root`)
//! - `error`    — unified error type

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod ratchet;

pub use error::CryptoError;
pub use identity::Bundle;
pub use ratchet::{Peer, SessionState, SymmetricChain};
