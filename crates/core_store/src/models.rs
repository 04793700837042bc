//! On-disk record shapes. These are the literal JSON payloads written
//! inside `wrap()`-encrypted blobs — see `store` for the framing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_crypto::SessionState;

use crate::error::StoreError;

fn b64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

fn b64_decode(s: &str) -> Result<Vec<u8>, StoreError> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s)
        .map_err(|e| StoreError::InvalidStore(format!("bad base64: {e}")))
}

fn b64_decode_32(s: &str) -> Result<[u8; 32], StoreError> {
    let bytes = b64_decode(s)?;
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidStore("expected 32-byte field".into()))
}

/// A known remote peer, as saved under `contacts/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    #[serde(with = "b64_array32")]
    pub id_pub: [u8; 32],
    pub name: String,
    pub created: DateTime<Utc>,
}

mod b64_array32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::b64_encode(key))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::b64_decode_32(&s).map_err(serde::de::Error::custom)
    }
}

/// The one supported on-disk ratchet session format. `v` is checked on
/// load; anything other than `1` is a hard error, never silently migrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateRecord {
    pub v: u8,
    pub rk: String,
    pub dhs: Option<String>,
    pub dhr: Option<String>,
    pub sc: Option<String>,
    pub rc: Option<String>,
}

const SESSION_STATE_VERSION: u8 = 1;

impl SessionStateRecord {
    pub fn from_session_state(state: &SessionState) -> Self {
        Self {
            v: SESSION_STATE_VERSION,
            rk: b64_encode(&state.root_key),
            dhs: state.dh_self_priv.map(|b| b64_encode(&b)),
            dhr: state.dh_remote_pub.map(|b| b64_encode(&b)),
            sc: state.send_chain.as_ref().map(|c| b64_encode(&c.as_bytes())),
            rc: state.recv_chain.as_ref().map(|c| b64_encode(&c.as_bytes())),
        }
    }

    pub fn into_session_state(self) -> Result<SessionState, StoreError> {
        if self.v != SESSION_STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(self.v));
        }
        Ok(SessionState {
            root_key: b64_decode_32(&self.rk)?,
            dh_self_priv: self.dhs.as_deref().map(b64_decode_32).transpose()?,
            dh_remote_pub: self.dhr.as_deref().map(b64_decode_32).transpose()?,
            send_chain: self
                .sc
                .as_deref()
                .map(b64_decode_32)
                .transpose()?
                .map(core_crypto::SymmetricChain::new),
            recv_chain: self
                .rc
                .as_deref()
                .map(b64_decode_32)
                .transpose()?
                .map(core_crypto::SymmetricChain::new),
        })
    }
}

/// One entry in a contact's append-only message log, exactly the shape
/// written inside each `wrap()`-encrypted frame: `{"ts","out","plain","hdr",
/// "non","ct"}`. `hdr`/`non`/`ct` are kept alongside the plaintext so the
/// ratchet frame that produced a message survives restarts even though the
/// live ratchet state is persisted separately under `sessions/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub ts: DateTime<Utc>,
    /// `true` if this peer sent the message, `false` if it was received.
    pub out: bool,
    pub plain: Option<String>,
    #[serde(with = "b64_array32")]
    pub hdr: [u8; 32],
    #[serde(with = "b64_bytes")]
    pub non: Vec<u8>,
    #[serde(with = "b64_bytes")]
    pub ct: Vec<u8>,
}

mod b64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::b64_encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::b64_decode(&s).map_err(serde::de::Error::custom)
    }
}
