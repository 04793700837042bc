//! Wire types exchanged between peers over a `Transport`.
//!
//! There is no relay server in this design — these are sent directly,
//! peer to peer. Accordingly there is no envelope metadata beyond what the
//! recipient actually needs to advance its ratchet state.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

/// A peer's published identity, handed to whoever wants to start a session
/// with it. `signed_prekey_pub`/`signature` are carried for forward
/// compatibility with a future signed-prekey handshake — this design's
/// handshake does not verify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub identity_pub: [u8; 32],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_prekey_pub: Option<[u8; 32]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl Bundle {
    pub fn new(identity_pub: [u8; 32]) -> Self {
        Self {
            identity_pub,
            signed_prekey_pub: None,
            signature: None,
        }
    }

    pub fn identity_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.identity_pub)
    }
}

/// The session-opening message: the initiator's identity key plus its
/// fresh ephemeral ratchet key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitMessage {
    pub identity_pub: [u8; 32],
    pub ephemeral_pub: [u8; 32],
}

/// One encrypted message, post-handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherMessage {
    /// The sender's long-term identity key — used for routing to the right
    /// contact session on arrival, distinct from `header`.
    pub from_identity_pub: [u8; 32],
    /// The sender's current DH-ratchet public key.
    pub header: [u8; 32],
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}
