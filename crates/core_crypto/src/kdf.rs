//! Key derivation.
//!
//! Everything here is a single primitive used two ways:
//!
//! - `hkdf32` — HKDF-SHA256 with no salt and no info, expanded to exactly
//!   32 bytes. This is the ratchet's only KDF call shape; it also doubles
//!   as the symmetric chain's step function (see `ratchet::SymmetricChain`).
//! - `kdf_root` — folds a fresh DH output into the current root key,
//!   producing the next root key and a fresh chain key. The two `hkdf32`
//!   calls are concatenated in a fixed, non-negotiable order: root-key
//!   material first, then DH-secret-keyed material second.

use hkdf::Hkdf;
use sha2::Sha256;

/// Expand `ikm` (no salt, no info) to 32 bytes.
pub fn hkdf32(ikm: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut out = [0u8; 32];
    hk.expand(&[], &mut out)
        .expect("32-byte output is always within HKDF-SHA256's expand limit");
    out
}

/// `KDF_RK(root_key, dh_secret) -> (new_root_key, chain_key)`.
pub fn kdf_root(root_key: &[u8; 32], dh_secret: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut root_then_dh = Vec::with_capacity(root_key.len() + dh_secret.len());
    root_then_dh.extend_from_slice(root_key);
    root_then_dh.extend_from_slice(dh_secret);
    let new_root = hkdf32(&root_then_dh);

    let mut dh_then_root = Vec::with_capacity(dh_secret.len() + new_root.len());
    dh_then_root.extend_from_slice(dh_secret);
    dh_then_root.extend_from_slice(&new_root);
    let chain_key = hkdf32(&dh_then_root);

    (new_root, chain_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hkdf32_is_deterministic() {
        assert_eq!(hkdf32(b"same input"), hkdf32(b"same input"));
        assert_ne!(hkdf32(b"input a"), hkdf32(b"input b"));
    }

    #[test]
    fn kdf_root_produces_distinct_root_and_chain_keys() {
        let root = [1u8; 32];
        let (new_root, chain_key) = kdf_root(&root, b"dh-secret");
        assert_ne!(new_root, chain_key);
        assert_ne!(new_root, root);
    }

    #[test]
    fn kdf_root_is_sensitive_to_dh_secret() {
        let root = [1u8; 32];
        let (r1, c1) = kdf_root(&root, b"secret-a");
        let (r2, c2) = kdf_root(&root, b"secret-b");
        assert_ne!(r1, r2);
        assert_ne!(c1, c2);
    }
}
