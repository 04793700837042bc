//! Top-level lifecycle owner: one local identity, a set of contacts, and a
//! lazily-populated map of their sessions.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use core_crypto::Peer;
use core_store::{id_from_b64, Contact, Store};
use parking_lot::Mutex;

use crate::error::ManagerError;
use crate::session::{MessageEntry, Session};
use crate::transport::Transport;
use crate::wire::Bundle;

fn key(identity_pub: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(identity_pub)
}

/// Convert an epoch-nanosecond timestamp to `DateTime<Utc>`, splitting into
/// the `(secs, nanos)` pair `DateTime::from_timestamp` wants. `0` maps to
/// the Unix epoch, which callers use to mean "include all messages".
fn since_from_epoch_ns(since_epoch_ns: i64) -> DateTime<Utc> {
    let secs = since_epoch_ns.div_euclid(1_000_000_000);
    let nanos = since_epoch_ns.rem_euclid(1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
}

/// Owns the local peer identity and every contact's `Session`. Sessions are
/// restored from `store` on first use rather than all at once — a fresh
/// store with many contacts shouldn't pay to restore sessions nobody has
/// opened a conversation with yet.
pub struct Manager {
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    local_peer: Arc<Peer>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl Manager {
    /// Build a manager over `store`, generating a local identity on first
    /// use. The caller still needs to wrap the result in an `Arc` and call
    /// `transport.register(&manager)` before other parties can reach it —
    /// construction alone does not make a manager reachable.
    pub fn new(store: Arc<Store>, transport: Arc<dyn Transport>) -> Result<Self, ManagerError> {
        let identity = store.ensure_identity()?;
        let local_peer = Arc::new(Peer::with_identity(identity));
        Ok(Self {
            store,
            transport,
            local_peer,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn local_identity_pub(&self) -> [u8; 32] {
        self.local_peer.identity_public()
    }

    pub fn local_bundle(&self) -> Bundle {
        Bundle::new(self.local_peer.bundle().identity_pub)
    }

    /// Restore every contact's session from the store. Unlike the reference
    /// implementation, this never seeds a demo contact — a fresh store
    /// starts with whatever contacts were actually added.
    pub fn initialise(&self) -> Result<(), ManagerError> {
        for contact in self.store.list_contacts()? {
            self.session_for(&key(&contact.id_pub))?;
        }
        Ok(())
    }

    /// Every known contact, sorted by name.
    pub fn contacts(&self) -> Result<Vec<Contact>, ManagerError> {
        Ok(self.store.list_contacts()?)
    }

    /// Add `identity_pub` as a named contact and start a session with it,
    /// sending the init message over `transport`.
    pub fn connect(&self, name: &str, remote_bundle: &Bundle) -> Result<(), ManagerError> {
        self.store.add_contact_if_missing(name, remote_bundle.identity_pub)?;
        let session = self.session_for(&key(&remote_bundle.identity_pub))?;
        session.start_handshake(remote_bundle)?;
        Ok(())
    }

    /// Look up (or lazily build and restore) the session for a contact,
    /// identified by its base64url id.
    fn session_for(&self, id_b64: &str) -> Result<Arc<Session>, ManagerError> {
        if let Some(session) = self.sessions.lock().get(id_b64).cloned() {
            tracing::debug!(id = id_b64, "session already in memory");
            return Ok(session);
        }

        tracing::debug!(id = id_b64, "restoring session from store");
        let remote_identity_pub = id_from_b64(id_b64).map_err(|_| ManagerError::UnknownContact(id_b64.to_string()))?;
        self.store
            .load_contact(&remote_identity_pub)
            .map_err(|_| ManagerError::UnknownContact(id_b64.to_string()))?;

        let session = Arc::new(Session::new(
            self.local_peer.clone(),
            self.store.clone(),
            self.transport.clone(),
            remote_identity_pub,
        ));
        session.restore()?;

        self.sessions.lock().insert(id_b64.to_string(), session.clone());
        Ok(session)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn local_peer(&self) -> &Arc<Peer> {
        &self.local_peer
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn send(&self, id_b64: &str, text: &str) -> Result<(), ManagerError> {
        let session = self.session_for(id_b64)?;
        session.send(text)?;
        Ok(())
    }

    /// `since_epoch_ns` is nanoseconds since the Unix epoch, matching
    /// spec.md §4.6/§6's external `messages(contact_id_string,
    /// since_epoch_ns)` contract; `0` returns the full history.
    pub fn messages(&self, id_b64: &str, since_epoch_ns: i64) -> Result<Vec<MessageEntry>, ManagerError> {
        let session = self.session_for(id_b64)?;
        Ok(session.load_plain_messages(since_from_epoch_ns(since_epoch_ns))?)
    }

    /// Hand an inbound init message to the right (possibly new) session.
    pub fn handle_init(&self, from_identity_pub: [u8; 32], init: crate::wire::InitMessage) -> Result<(), ManagerError> {
        let id_b64 = key(&from_identity_pub);
        self.store.add_contact_if_missing(&id_b64, from_identity_pub)?;
        let session = self.session_for(&id_b64)?;
        session.handle_init(init)?;
        Ok(())
    }

    /// Hand an inbound ciphertext to the right session.
    pub fn handle_cipher(&self, from_identity_pub: [u8; 32], msg: crate::wire::CipherMessage) -> Result<(), ManagerError> {
        let id_b64 = key(&from_identity_pub);
        let session = self.session_for(&id_b64)?;
        session.receive(msg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use tempfile::tempdir;

    fn epoch() -> i64 {
        0
    }

    fn new_manager(path: impl Into<std::path::PathBuf>, transport: &Arc<LoopbackTransport>) -> Arc<Manager> {
        let store = Arc::new(Store::open(path).unwrap());
        let manager = Arc::new(Manager::new(store, transport.clone()).unwrap());
        transport.register(&manager);
        manager
    }

    #[test]
    fn two_managers_exchange_messages_end_to_end() {
        let alice_dir = tempdir().unwrap();
        let bob_dir = tempdir().unwrap();
        let transport = Arc::new(LoopbackTransport::new());

        let alice = new_manager(alice_dir.path(), &transport);
        let bob = new_manager(bob_dir.path(), &transport);

        alice.connect("Bob", &bob.local_bundle()).unwrap();

        let bob_id = key(&bob.local_identity_pub());
        let alice_id = key(&alice.local_identity_pub());

        alice.send(&bob_id, "Hi Bob").unwrap();
        let bob_view = bob.messages(&alice_id, epoch()).unwrap();
        assert_eq!(bob_view.len(), 1);
        assert_eq!(bob_view[0].text, "Hi Bob");
        assert!(!bob_view[0].out);

        bob.send(&alice_id, "Hi Alice").unwrap();
        let alice_view = alice.messages(&bob_id, epoch()).unwrap();
        assert_eq!(alice_view.len(), 2);
        assert_eq!(alice_view[0].text, "Hi Bob");
        assert!(alice_view[0].out);
        assert_eq!(alice_view[1].text, "Hi Alice");
        assert!(!alice_view[1].out);
    }

    #[test]
    fn manager_resumes_sessions_after_restart() {
        let alice_dir = tempdir().unwrap();
        let bob_dir = tempdir().unwrap();
        let transport = Arc::new(LoopbackTransport::new());

        let alice = new_manager(alice_dir.path(), &transport);
        let bob = new_manager(bob_dir.path(), &transport);
        let bob_id = key(&bob.local_identity_pub());
        let alice_id = key(&alice.local_identity_pub());

        alice.connect("Bob", &bob.local_bundle()).unwrap();
        alice.send(&bob_id, "persisted across restart").unwrap();

        drop(bob);
        let bob = new_manager(bob_dir.path(), &transport);
        bob.initialise().unwrap();

        let messages = bob.messages(&alice_id, epoch()).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "persisted across restart");

        // And the ratchet survived too — Bob can still reply.
        bob.send(&alice_id, "still works").unwrap();
        let alice_view = alice.messages(&bob_id, epoch()).unwrap();
        assert_eq!(alice_view.last().unwrap().text, "still works");
    }

    #[test]
    fn unknown_contact_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(LoopbackTransport::new());
        let alice = new_manager(dir.path(), &transport);

        let err = alice.send(&key(&[42u8; 32]), "nobody home");
        assert!(matches!(err, Err(ManagerError::UnknownContact(_))));
    }
}
