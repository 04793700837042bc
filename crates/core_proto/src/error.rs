use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Crypto(#[from] core_crypto::CryptoError),

    #[error(transparent)]
    Store(#[from] core_store::StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no handshake has been completed with this peer yet")]
    NotHandshaken,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer (init)")]
    UnknownPeerInit,

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] core_store::StoreError),

    #[error("unknown contact id: {0}")]
    UnknownContact(String),
}
