//! Per-contact session façade: ties one remote's ratchet state to the
//! local peer, the store, and a transport, and persists after every
//! mutating call.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use core_crypto::Peer;
use core_store::{models::MessageRecord, Store};

use crate::error::SessionError;
use crate::transport::Transport;
use crate::wire::{Bundle, CipherMessage, InitMessage};

/// A message log entry as handed back across the external API: the
/// on-disk `MessageRecord` plus a synthetic, stable id derived from the
/// ratchet frame that produced it — `base64url(header) ‖ base64url(nonce)` —
/// rather than a randomly generated one, so the same message always gets
/// the same id across reloads.
#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub out: bool,
    pub text: String,
}

fn message_id(header: &[u8], nonce: &[u8]) -> String {
    format!("{}{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(nonce))
}

impl From<MessageRecord> for MessageEntry {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: message_id(&record.hdr, &record.non),
            at: record.ts,
            out: record.out,
            text: record.plain.unwrap_or_default(),
        }
    }
}

/// A single remote contact's session: one local `Peer` (shared across every
/// contact's `Session`), one remote identity key, and the store/transport
/// needed to persist and deliver.
pub struct Session {
    local_peer: Arc<Peer>,
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    remote_identity_pub: [u8; 32],
}

impl Session {
    pub fn new(local_peer: Arc<Peer>, store: Arc<Store>, transport: Arc<dyn Transport>, remote_identity_pub: [u8; 32]) -> Self {
        Self {
            local_peer,
            store,
            transport,
            remote_identity_pub,
        }
    }

    pub fn local_identity_pub(&self) -> [u8; 32] {
        self.local_peer.identity_public()
    }

    pub fn remote_identity_pub(&self) -> [u8; 32] {
        self.remote_identity_pub
    }

    pub fn local_bundle(&self) -> Bundle {
        Bundle::new(self.local_peer.bundle().identity_pub)
    }

    fn persist(&self) {
        let Some(state) = self.local_peer.session_state(&self.remote_identity_pub) else {
            return;
        };
        if let Err(e) = self.store.save_session(&self.remote_identity_pub, &state) {
            tracing::warn!(error = %e, "failed to persist session state");
        }
    }

    /// Reload ratchet state previously written by `persist`. A missing
    /// on-disk session simply leaves the in-memory `Peer` untouched — the
    /// next handshake call will create state fresh.
    pub fn restore(&self) -> Result<(), SessionError> {
        match self.store.load_session(&self.remote_identity_pub) {
            Ok(state) => {
                self.local_peer.set_session_state(self.remote_identity_pub, state);
                Ok(())
            }
            Err(core_store::StoreError::NoSession) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Initiator side: begin a session against `remote_bundle` and send the
    /// init message over `transport`.
    pub fn start_handshake(&self, remote_bundle: &Bundle) -> Result<(), SessionError> {
        let ephemeral_pub = self.local_peer.initiate_session(remote_bundle.identity_pub);
        self.persist();
        self.transport.send_init(
            remote_bundle.identity_pub,
            InitMessage {
                identity_pub: self.local_identity_pub(),
                ephemeral_pub,
            },
        )?;
        Ok(())
    }

    /// Responder side: complete the handshake from an init message.
    pub fn handle_init(&self, init: InitMessage) -> Result<(), SessionError> {
        self.local_peer.accept_session(init.identity_pub, init.ephemeral_pub);
        self.persist();
        Ok(())
    }

    /// Encrypt and deliver `text`, recording it in the local message log.
    pub fn send(&self, text: &str) -> Result<(), SessionError> {
        let (header, nonce, ciphertext) = self.local_peer.encrypt(self.remote_identity_pub, text.as_bytes())?;
        self.persist();

        let message = MessageRecord {
            ts: Utc::now(),
            out: true,
            plain: Some(text.to_string()),
            hdr: header,
            non: nonce.clone(),
            ct: ciphertext.clone(),
        };
        if let Err(e) = self.store.append_message(&self.remote_identity_pub, &message) {
            tracing::warn!(error = %e, "failed to persist outgoing message");
        }

        self.transport.send_cipher(
            self.remote_identity_pub,
            CipherMessage {
                from_identity_pub: self.local_identity_pub(),
                header,
                nonce,
                ciphertext,
            },
        )?;
        Ok(())
    }

    /// Decrypt an inbound message and record it in the local message log.
    pub fn receive(&self, msg: CipherMessage) -> Result<(), SessionError> {
        let plaintext = self
            .local_peer
            .decrypt(self.remote_identity_pub, msg.header, &msg.nonce, &msg.ciphertext)?;
        self.persist();

        let text = String::from_utf8_lossy(&plaintext).into_owned();
        let message = MessageRecord {
            ts: Utc::now(),
            out: false,
            plain: Some(text),
            hdr: msg.header,
            non: msg.nonce,
            ct: msg.ciphertext,
        };
        if let Err(e) = self.store.append_message(&self.remote_identity_pub, &message) {
            tracing::warn!(error = %e, "failed to persist incoming message");
        }
        Ok(())
    }

    /// Every locally stored message with this contact at or after `since`.
    pub fn load_plain_messages(&self, since: DateTime<Utc>) -> Result<Vec<MessageEntry>, SessionError> {
        Ok(self
            .store
            .load_messages(&self.remote_identity_pub, since)?
            .into_iter()
            .map(MessageEntry::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use core_crypto::Peer;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Captures whatever gets sent without delivering it anywhere — enough
    /// to test persistence and local state transitions in isolation from a
    /// full `Manager`/`LoopbackTransport` pair.
    #[derive(Default)]
    struct RecordingTransport {
        inits: Mutex<Vec<InitMessage>>,
        ciphers: Mutex<Vec<CipherMessage>>,
    }

    impl Transport for RecordingTransport {
        fn send_init(&self, _to: [u8; 32], init: InitMessage) -> Result<(), TransportError> {
            self.inits.lock().push(init);
            Ok(())
        }

        fn send_cipher(&self, _to: [u8; 32], msg: CipherMessage) -> Result<(), TransportError> {
            self.ciphers.lock().push(msg);
            Ok(())
        }
    }

    #[test]
    fn start_handshake_persists_state_and_sends_init() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let identity = store.ensure_identity().unwrap();
        let local_peer = Arc::new(Peer::with_identity(identity));
        let transport = Arc::new(RecordingTransport::default());
        let remote_bundle = Bundle::new([7u8; 32]);

        let session = Session::new(local_peer, store.clone(), transport.clone(), remote_bundle.identity_pub);
        session.start_handshake(&remote_bundle).unwrap();

        assert_eq!(transport.inits.lock().len(), 1);
        assert!(store.load_session(&remote_bundle.identity_pub).is_ok());
    }

    #[test]
    fn send_persists_outgoing_message_and_delivers_ciphertext() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let identity = store.ensure_identity().unwrap();
        let local_peer = Arc::new(Peer::with_identity(identity));
        let transport = Arc::new(RecordingTransport::default());
        let remote_bundle = Bundle::new([8u8; 32]);

        let session = Session::new(local_peer, store.clone(), transport.clone(), remote_bundle.identity_pub);
        session.start_handshake(&remote_bundle).unwrap();
        session.send("hello there").unwrap();

        assert_eq!(transport.ciphers.lock().len(), 1);
        let messages = session
            .load_plain_messages(DateTime::<Utc>::from_timestamp(0, 0).unwrap())
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello there");
        assert!(messages[0].out);

        let ciphers = transport.ciphers.lock();
        let sent = &ciphers[0];
        assert_eq!(messages[0].id, message_id(&sent.header, &sent.nonce));
    }

    #[test]
    fn message_id_is_stable_across_reload() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let identity = store.ensure_identity().unwrap();
        let local_peer = Arc::new(Peer::with_identity(identity));
        let transport = Arc::new(RecordingTransport::default());
        let remote_bundle = Bundle::new([9u8; 32]);

        let session = Session::new(local_peer, store.clone(), transport, remote_bundle.identity_pub);
        session.start_handshake(&remote_bundle).unwrap();
        session.send("hi").unwrap();

        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let first = session.load_plain_messages(epoch).unwrap();
        let second = session.load_plain_messages(epoch).unwrap();
        assert_eq!(first[0].id, second[0].id);
    }
}
