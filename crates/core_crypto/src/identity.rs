//! Identity key management.
//!
//! Each peer has exactly one long-term X25519 identity keypair (IK). It is
//! used directly as an ECDH key — there is no Ed25519 signing key, no
//! device keys, and no device certificates. The identity key also doubles
//! as the responder's initial DH-ratchet key (see `ratchet::Peer::accept_session`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;

/// The publicly advertisable material a peer hands out so others can start
/// a session with it. The core's handshake needs only the identity public
/// key; a richer variant carrying a signed prekey lives at the wire layer
/// one crate up, which embeds this minimal bundle rather than duplicating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bundle {
    pub identity_pub: [u8; 32],
}

/// Long-term X25519 identity keypair. The secret half zeroizes itself on
/// drop (`x25519_dalek::StaticSecret` clears its own memory).
pub struct IdentityKeyPair {
    public: [u8; 32],
    secret: StaticSecret,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    /// Reconstruct a keypair from a previously generated secret scalar.
    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret_bytes);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, secret }
    }

    pub fn public(&self) -> [u8; 32] {
        self.public
    }

    pub fn public_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public)
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

/// Decode a base64url (no padding) identity public key.
pub fn public_from_b64(s: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = URL_SAFE_NO_PAD.decode(s)?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("identity public key must be 32 bytes".into()))
}
