use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] core_crypto::CryptoError),

    #[error("on-disk frame is malformed: {0}")]
    InvalidStore(String),

    #[error("identity not found")]
    NoIdentity,

    #[error("contact not found")]
    NoContact,

    #[error("session not found")]
    NoSession,

    #[error("unsupported session state version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid contact id: {0}")]
    InvalidContactId(String),
}
