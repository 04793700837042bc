//! Peer identity plus a simplified two-DH handshake and a single-state
//! symmetric-chain ratchet.
//!
//! This is deliberately **not** Signal's full Double Ratchet:
//!
//! - The handshake mixes only two DH outputs (`IK×IK`, `EK×IK`), not the
//!   four-or-five-way X3DH construction with signed prekeys.
//! - `SessionState` tracks a `send_chain`/`recv_chain` pair whose presence
//!   or absence drives the DH-ratchet-step decision; there is no message
//!   counter and no skipped-message-key cache, so a message that arrives
//!   out of order after a DH ratchet has moved on cannot be decrypted.
//!
//! `RK` — root key, updated on every DH ratchet step.
//! `CKs`/`CKr` — sending/receiving chain key, updated per message.
//! `MK` — message key, derived from a chain key and reused as the chain's
//! next state (see `SymmetricChain::next`).

use std::collections::HashMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{
    aead,
    error::CryptoError,
    identity::{Bundle, IdentityKeyPair},
    kdf::{hkdf32, kdf_root},
};

/// A single-state symmetric ratchet: `next()` derives the next state via
/// `hkdf32` and returns that same value as the message key. There is no
/// separate "chain key" vs. "message key" split — the spec's ratchet reuses
/// one 32-byte state for both roles.
#[derive(Clone)]
pub struct SymmetricChain(pub(crate) [u8; 32]);

impl SymmetricChain {
    pub fn new(state: [u8; 32]) -> Self {
        Self(state)
    }

    pub fn next(&mut self) -> [u8; 32] {
        self.0 = hkdf32(&self.0);
        self.0
    }

    pub fn as_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Drop for SymmetricChain {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Per-remote ratchet state. Mirrors the on-disk v1 session shape field for
/// field — `core_store` serialises this directly.
#[derive(Clone)]
pub struct SessionState {
    pub root_key: [u8; 32],
    /// Our current DH-ratchet secret scalar. `None` only before any
    /// handshake has run for this remote.
    pub dh_self_priv: Option<[u8; 32]>,
    /// The remote's last-known DH-ratchet public key.
    pub dh_remote_pub: Option<[u8; 32]>,
    pub send_chain: Option<SymmetricChain>,
    pub recv_chain: Option<SymmetricChain>,
}

impl SessionState {
    pub fn empty() -> Self {
        Self {
            root_key: [0u8; 32],
            dh_self_priv: None,
            dh_remote_pub: None,
            send_chain: None,
            recv_chain: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        if let Some(ref mut s) = self.dh_self_priv {
            s.zeroize();
        }
    }
}

/// A participant in the protocol: one long-term identity key plus one
/// ratchet state per remote it has exchanged messages with.
pub struct Peer {
    identity: IdentityKeyPair,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl Peer {
    pub fn new() -> Self {
        Self::with_identity(IdentityKeyPair::generate())
    }

    pub fn with_identity(identity: IdentityKeyPair) -> Self {
        Self {
            identity,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity_public(&self) -> [u8; 32] {
        self.identity.public()
    }

    pub fn identity_secret_bytes(&self) -> [u8; 32] {
        self.identity.secret_bytes()
    }

    /// This peer's publicly advertisable bundle — just the identity key,
    /// per spec.md §4.2's minimal `bundle()`.
    pub fn bundle(&self) -> Bundle {
        Bundle {
            identity_pub: self.identity_public(),
        }
    }

    fn key_of(remote_identity_pub: &[u8; 32]) -> String {
        URL_SAFE_NO_PAD.encode(remote_identity_pub)
    }

    /// Read out the current ratchet state for a remote, for persistence.
    /// Returns `None` if no session has ever been started with this remote.
    pub fn session_state(&self, remote_identity_pub: &[u8; 32]) -> Option<SessionState> {
        self.sessions.lock().get(&Self::key_of(remote_identity_pub)).cloned()
    }

    /// Install ratchet state for a remote, e.g. when restoring from storage.
    pub fn set_session_state(&self, remote_identity_pub: [u8; 32], state: SessionState) {
        self.sessions
            .lock()
            .insert(Self::key_of(&remote_identity_pub), state);
    }

    /// Initiator side: start a session with `remote_identity_pub`. Computes
    /// the two-DH shared secret, performs the first DH-ratchet step, and
    /// establishes the sending chain. Returns our fresh ephemeral public key
    /// to be sent as part of the init message.
    pub fn initiate_session(&self, remote_identity_pub: [u8; 32]) -> [u8; 32] {
        let remote_id_pub = PublicKey::from(remote_identity_pub);
        let ephemeral_priv = StaticSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral_priv);

        let dh1 = self.identity.secret().diffie_hellman(&remote_id_pub);
        let dh2 = ephemeral_priv.diffie_hellman(&remote_id_pub);
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(dh1.as_bytes());
        ikm.extend_from_slice(dh2.as_bytes());
        let shared_secret = hkdf32(&ikm);

        // First DH-ratchet step: our fresh ephemeral key is also the first
        // ratchet key, ratcheted against the remote's identity key.
        let (root_key, chain_key) = kdf_root(&shared_secret, dh2.as_bytes());

        self.sessions.lock().insert(
            Self::key_of(&remote_identity_pub),
            SessionState {
                root_key,
                dh_self_priv: Some(ephemeral_priv.to_bytes()),
                dh_remote_pub: Some(remote_identity_pub),
                send_chain: Some(SymmetricChain::new(chain_key)),
                recv_chain: None,
            },
        );

        ephemeral_pub.to_bytes()
    }

    /// Responder side: complete the handshake from an init message carrying
    /// the remote's identity key and fresh ephemeral key. Establishes the
    /// receiving chain; the first outbound message will force a fresh
    /// sending ratchet key (see `encrypt`).
    pub fn accept_session(&self, remote_identity_pub: [u8; 32], remote_ephemeral_pub: [u8; 32]) {
        let remote_id_pub = PublicKey::from(remote_identity_pub);
        let remote_ek_pub = PublicKey::from(remote_ephemeral_pub);

        let dh1 = self.identity.secret().diffie_hellman(&remote_id_pub);
        let dh2 = self.identity.secret().diffie_hellman(&remote_ek_pub);
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(dh1.as_bytes());
        ikm.extend_from_slice(dh2.as_bytes());
        let shared_secret = hkdf32(&ikm);

        // Our identity key doubles as the initial DH-ratchet key until the
        // first send forces a fresh ephemeral keypair.
        let (root_key, chain_key) = kdf_root(&shared_secret, dh2.as_bytes());

        self.sessions.lock().insert(
            Self::key_of(&remote_identity_pub),
            SessionState {
                root_key,
                dh_self_priv: Some(self.identity.secret_bytes()),
                dh_remote_pub: Some(remote_ephemeral_pub),
                send_chain: None,
                recv_chain: Some(SymmetricChain::new(chain_key)),
            },
        );
    }

    /// Encrypt `plaintext` for `remote_identity_pub`, generating a fresh
    /// DH-ratchet keypair first if there is no active sending chain (i.e.
    /// right after a direction reversal). Returns `(header_pub, nonce,
    /// ciphertext)`.
    pub fn encrypt(
        &self,
        remote_identity_pub: [u8; 32],
        plaintext: &[u8],
    ) -> Result<([u8; 32], Vec<u8>, Vec<u8>), CryptoError> {
        let mut sessions = self.sessions.lock();
        let state = sessions
            .entry(Self::key_of(&remote_identity_pub))
            .or_insert_with(SessionState::empty);

        if state.send_chain.is_none() {
            let remote_pub = state
                .dh_remote_pub
                .ok_or(CryptoError::SessionNotInitialised)?;
            let priv_key = StaticSecret::random_from_rng(OsRng);
            let secret = priv_key.diffie_hellman(&PublicKey::from(remote_pub));
            let (new_root, chain_key) = kdf_root(&state.root_key, secret.as_bytes());
            state.root_key = new_root;
            state.dh_self_priv = Some(priv_key.to_bytes());
            state.send_chain = Some(SymmetricChain::new(chain_key));
        }

        let self_priv = state
            .dh_self_priv
            .ok_or(CryptoError::SessionNotInitialised)?;
        let header = PublicKey::from(&StaticSecret::from(self_priv)).to_bytes();
        let msg_key = state
            .send_chain
            .as_mut()
            .expect("just ensured above")
            .next();

        let (nonce, ciphertext) = aead::encrypt(&msg_key, plaintext, &header)?;
        Ok((header, nonce, ciphertext))
    }

    /// Decrypt a message from `remote_identity_pub`. If `header` carries a
    /// DH-ratchet public key we have not seen before, performs a DH-ratchet
    /// step first (and drops the current sending chain, forcing a fresh
    /// one on the next `encrypt` call).
    pub fn decrypt(
        &self,
        remote_identity_pub: [u8; 32],
        header: [u8; 32],
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let peer_pub = PublicKey::from(header);
        let mut sessions = self.sessions.lock();
        let state = sessions
            .entry(Self::key_of(&remote_identity_pub))
            .or_insert_with(SessionState::empty);

        let needs_ratchet = state.dh_remote_pub != Some(header);
        if needs_ratchet {
            let self_priv = state
                .dh_self_priv
                .ok_or(CryptoError::SessionNotInitialised)?;
            let secret = StaticSecret::from(self_priv).diffie_hellman(&peer_pub);
            let (new_root, chain_key) = kdf_root(&state.root_key, secret.as_bytes());
            state.root_key = new_root;
            state.recv_chain = Some(SymmetricChain::new(chain_key));
            state.dh_remote_pub = Some(header);
            state.send_chain = None;
        }

        let msg_key = state
            .recv_chain
            .as_mut()
            .ok_or(CryptoError::SessionNotInitialised)?
            .next();

        aead::decrypt(&msg_key, nonce, ciphertext, &header)
    }
}

impl Default for Peer {
    fn default() -> Self {
        Self::new()
    }
}
