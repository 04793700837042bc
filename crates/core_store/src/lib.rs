//! core_store — encrypted-at-rest local storage for the messaging core.
//!
//! # Encryption strategy
//! There is no database underneath — everything is a plain file. A single
//! random master key (`master.key`, mode 0600) wraps every other file on
//! disk: the identity secret, each contact record, each session's ratchet
//! state, and each entry in a contact's message log. Wrapping is AES-256-GCM
//! via `core_crypto::aead`, framed as `u16 BE nonce_len || nonce ||
//! ciphertext`, with no associated data.
//!
//! # Layout
//! ```text
//! <root>/
//!   master.key           raw 32 bytes, mode 0600
//!   identity.id           wrap(identity secret), mode 0600
//!   contacts/<id>.json    wrap(Contact JSON)
//!   sessions/<id>/state.bin  wrap(SessionStateRecord JSON)
//!   msgs/<id>.log         u32 BE length || wrap(MessageRecord JSON), repeated
//! ```
//! `<id>` is always `base64::URL_SAFE_NO_PAD` of the remote's 32-byte
//! identity public key.

pub mod error;
pub mod models;
pub mod store;

pub use error::StoreError;
pub use models::{Contact, MessageRecord, SessionStateRecord};
pub use store::{id_from_b64, Store};
