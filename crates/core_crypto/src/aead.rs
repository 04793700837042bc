//! Authenticated encryption.
//!
//! Uses AES-256-GCM. Key size: 32 bytes. Nonce: 12 bytes (random, generated
//! per call). Tag: 16 bytes, appended to the ciphertext by the AEAD crate.
//!
//! Unlike the on-disk framing used by the store (`wrap`/`unwrap`), the
//! functions here return the nonce and ciphertext as separate values — the
//! wire format keeps them as separate fields too.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` under `key`, authenticating `aad`. Returns
/// `(nonce, ciphertext_with_tag)`.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, aes_gcm::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    Ok((nonce.to_vec(), ciphertext))
}

/// Decrypt `ciphertext` (with trailing tag) under `key`, checking `aad`.
pub fn decrypt(
    key: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;
    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(nonce, aes_gcm::aead::Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AeadDecrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; 32];
        let (nonce, ct) = encrypt(&key, b"hello ratchet", b"header").unwrap();
        let pt = decrypt(&key, &nonce, &ct, b"header").unwrap();
        assert_eq!(pt, b"hello ratchet");
    }

    #[test]
    fn rejects_tampered_aad() {
        let key = [7u8; 32];
        let (nonce, ct) = encrypt(&key, b"hello ratchet", b"header").unwrap();
        assert!(decrypt(&key, &nonce, &ct, b"wrong-header").is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = [7u8; 32];
        let (nonce, mut ct) = encrypt(&key, b"hello ratchet", b"header").unwrap();
        ct[0] ^= 0xFF;
        assert!(decrypt(&key, &nonce, &ct, b"header").is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let key = [7u8; 32];
        let (nonce, ct) = encrypt(&key, b"hello ratchet", b"header").unwrap();
        assert!(decrypt(&[9u8; 32], &nonce, &ct, b"header").is_err());
    }
}
