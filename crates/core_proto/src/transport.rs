//! Message delivery between peers.
//!
//! Production delivery (over the network) is outside this crate's scope —
//! `Transport` is the seam a real transport plugs into. `LoopbackTransport`
//! is an in-process test double that delivers synchronously, modelled on
//! the reference implementation's dummy transport.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::manager::Manager;
use crate::wire::{CipherMessage, InitMessage};

pub trait Transport: Send + Sync {
    /// Deliver a session-opening message to `to`. Implementations should
    /// fail loudly if `to` cannot be reached — an init that silently
    /// vanishes leaves the initiator's session half-established.
    fn send_init(&self, to: [u8; 32], init: InitMessage) -> Result<(), TransportError>;

    /// Deliver an encrypted message to `to`. Unlike `send_init`, an unknown
    /// recipient is not necessarily an error — see `LoopbackTransport` for
    /// the "accepted but undelivered" convention this mirrors.
    fn send_cipher(&self, to: [u8; 32], msg: CipherMessage) -> Result<(), TransportError>;

    /// Make `manager` reachable at its own identity key. Address-based
    /// transports (a real network transport) have no use for this; only
    /// in-process test doubles need a registry.
    fn register(&self, _manager: &Arc<Manager>) {}
}

fn key(identity_pub: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(identity_pub)
}

/// In-process transport used by tests (and anything else running all
/// parties in one binary). Registered managers are held weakly so the
/// transport never keeps one alive on its own.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: Mutex<HashMap<String, Weak<Manager>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, to: &[u8; 32]) -> Option<Arc<Manager>> {
        self.peers.lock().get(&key(to)).and_then(Weak::upgrade)
    }
}

impl Transport for LoopbackTransport {
    fn register(&self, manager: &Arc<Manager>) {
        self.peers
            .lock()
            .insert(key(&manager.local_identity_pub()), Arc::downgrade(manager));
    }

    fn send_init(&self, to: [u8; 32], init: InitMessage) -> Result<(), TransportError> {
        let manager = self.lookup(&to).ok_or(TransportError::UnknownPeerInit)?;
        manager
            .handle_init(init.identity_pub, init)
            .map_err(|e| TransportError::DeliveryFailed(e.to_string()))
    }

    fn send_cipher(&self, to: [u8; 32], msg: CipherMessage) -> Result<(), TransportError> {
        let Some(manager) = self.lookup(&to) else {
            // Unknown recipient: accepted but undelivered, same as the
            // reference dummy transport.
            return Ok(());
        };
        if let Err(e) = manager.handle_cipher(msg.from_identity_pub, msg) {
            tracing::warn!(error = %e, "loopback delivery accepted but processing failed");
        }
        Ok(())
    }
}
