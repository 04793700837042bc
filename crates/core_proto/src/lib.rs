//! core_proto — wire types, delivery, and session/lifecycle management for
//! the messaging core.
//!
//! # Module layout
//! - `wire`      — `Bundle`, `InitMessage`, `CipherMessage`
//! - `transport`  — `Transport` trait + `LoopbackTransport` test double
//! - `session`    — per-contact `Session` façade over `core_crypto::Peer`
//! - `manager`    — `Manager`: local identity, contacts, session lifecycle
//! - `error`      — unified error types

pub mod error;
pub mod manager;
pub mod session;
pub mod transport;
pub mod wire;

pub use error::{ManagerError, SessionError, TransportError};
pub use manager::Manager;
pub use session::{MessageEntry, Session};
pub use transport::{LoopbackTransport, Transport};
pub use wire::{Bundle, CipherMessage, InitMessage};
