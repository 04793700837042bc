use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AeadDecrypt,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("session has no established ratchet state for this remote")]
    SessionNotInitialised,

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
