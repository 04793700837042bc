//! Encrypted-at-rest filesystem store.
//!
//! All operations are synchronous `std::fs` calls — there is no database
//! engine underneath. See the crate-level doc comment for the on-disk
//! layout and the wrap/unwrap framing.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};

use core_crypto::identity::IdentityKeyPair;
use core_crypto::SessionState;

use crate::{
    error::StoreError,
    models::{Contact, MessageRecord, SessionStateRecord},
};

const MASTER_KEY_FILE: &str = "master.key";
const IDENTITY_FILE: &str = "identity.id";
const CONTACTS_DIR: &str = "contacts";
const SESSIONS_DIR: &str = "sessions";
const MSGS_DIR: &str = "msgs";

fn dir_id(remote_identity_pub: &[u8; 32]) -> String {
    URL_SAFE_NO_PAD.encode(remote_identity_pub)
}

/// Decode the external base64url id format used for contact/session/message
/// filenames and Manager-facing contact ids.
pub fn id_from_b64(s: &str) -> Result<[u8; 32], StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| StoreError::InvalidContactId(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidContactId("id must decode to 32 bytes".into()))
}

fn set_dir_mode(path: &Path) -> Result<(), StoreError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

fn set_file_mode(path: &Path) -> Result<(), StoreError> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

/// Handle onto one peer's encrypted local storage directory.
pub struct Store {
    base_path: PathBuf,
    master_key: [u8; 32],
}

impl Store {
    /// Open (or create) the store rooted at `path`. Creates the directory
    /// tree and a fresh random master key on first use.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = path.into();
        fs::create_dir_all(&base_path)?;
        set_dir_mode(&base_path)?;

        for sub in [CONTACTS_DIR, SESSIONS_DIR, MSGS_DIR] {
            let dir = base_path.join(sub);
            fs::create_dir_all(&dir)?;
            set_dir_mode(&dir)?;
        }

        let key_path = base_path.join(MASTER_KEY_FILE);
        let master_key = match fs::read(&key_path) {
            Ok(bytes) => bytes
                .try_into()
                .map_err(|_| StoreError::InvalidStore("master.key is not 32 bytes".into()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut key = [0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
                fs::write(&key_path, key)?;
                set_file_mode(&key_path)?;
                key
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { base_path, master_key })
    }

    /// The raw master key — exposed for tests only; never logged.
    #[cfg(test)]
    pub(crate) fn master_key(&self) -> [u8; 32] {
        self.master_key
    }

    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let (nonce, ciphertext) = core_crypto::aead::encrypt(&self.master_key, plaintext, b"")?;
        let mut framed = Vec::with_capacity(2 + nonce.len() + ciphertext.len());
        framed.extend_from_slice(&(nonce.len() as u16).to_be_bytes());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    fn unwrap(&self, framed: &[u8]) -> Result<Vec<u8>, StoreError> {
        if framed.len() < 2 {
            return Err(StoreError::InvalidStore("frame shorter than length prefix".into()));
        }
        let nonce_len = u16::from_be_bytes([framed[0], framed[1]]) as usize;
        if framed.len() < 2 + nonce_len {
            return Err(StoreError::InvalidStore("frame shorter than declared nonce".into()));
        }
        let nonce = &framed[2..2 + nonce_len];
        let ciphertext = &framed[2 + nonce_len..];
        Ok(core_crypto::aead::decrypt(&self.master_key, nonce, ciphertext, b"")?)
    }

    // ── Identity ─────────────────────────────────────────────────────────

    /// Load the persisted identity key, or generate and persist a fresh one
    /// if this is the first time the store has been opened.
    pub fn ensure_identity(&self) -> Result<IdentityKeyPair, StoreError> {
        match self.load_identity() {
            Ok(identity) => Ok(identity),
            Err(StoreError::NoIdentity) => {
                let identity = IdentityKeyPair::generate();
                self.save_identity(&identity)?;
                Ok(identity)
            }
            Err(e) => Err(e),
        }
    }

    fn save_identity(&self, identity: &IdentityKeyPair) -> Result<(), StoreError> {
        let framed = self.wrap(&identity.secret_bytes())?;
        let path = self.base_path.join(IDENTITY_FILE);
        fs::write(&path, framed)?;
        set_file_mode(&path)?;
        Ok(())
    }

    fn load_identity(&self) -> Result<IdentityKeyPair, StoreError> {
        let path = self.base_path.join(IDENTITY_FILE);
        let framed = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NoIdentity),
            Err(e) => return Err(e.into()),
        };
        let secret = self.unwrap(&framed)?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| StoreError::InvalidStore("identity secret is not 32 bytes".into()))?;
        Ok(IdentityKeyPair::from_secret_bytes(secret))
    }

    // ── Contacts ─────────────────────────────────────────────────────────

    fn contact_path(&self, remote_identity_pub: &[u8; 32]) -> PathBuf {
        self.base_path
            .join(CONTACTS_DIR)
            .join(format!("{}.json", dir_id(remote_identity_pub)))
    }

    pub fn save_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let json = serde_json::to_vec(contact)?;
        let framed = self.wrap(&json)?;
        let path = self.contact_path(&contact.id_pub);
        fs::write(&path, framed)?;
        set_file_mode(&path)?;
        Ok(())
    }

    pub fn load_contact(&self, remote_identity_pub: &[u8; 32]) -> Result<Contact, StoreError> {
        let path = self.contact_path(remote_identity_pub);
        let framed = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NoContact),
            Err(e) => return Err(e.into()),
        };
        let json = self.unwrap(&framed)?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Add a contact unless one with this identity key already exists.
    pub fn add_contact_if_missing(&self, name: &str, remote_identity_pub: [u8; 32]) -> Result<(), StoreError> {
        if self.contact_path(&remote_identity_pub).exists() {
            return Ok(());
        }
        self.save_contact(&Contact {
            id_pub: remote_identity_pub,
            name: name.to_string(),
            created: Utc::now(),
        })
    }

    /// All known contacts, sorted by display name.
    pub fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let dir = self.base_path.join(CONTACTS_DIR);
        let mut contacts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let framed = fs::read(entry.path())?;
            let json = self.unwrap(&framed)?;
            contacts.push(serde_json::from_slice::<Contact>(&json)?);
        }
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(contacts)
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    fn session_path(&self, remote_identity_pub: &[u8; 32]) -> PathBuf {
        self.base_path
            .join(SESSIONS_DIR)
            .join(dir_id(remote_identity_pub))
            .join("state.bin")
    }

    pub fn save_session(&self, remote_identity_pub: &[u8; 32], state: &SessionState) -> Result<(), StoreError> {
        let path = self.session_path(remote_identity_pub);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            set_dir_mode(parent)?;
        }
        let record = SessionStateRecord::from_session_state(state);
        let json = serde_json::to_vec(&record)?;
        let framed = self.wrap(&json)?;
        fs::write(&path, framed)?;
        set_file_mode(&path)?;
        Ok(())
    }

    pub fn load_session(&self, remote_identity_pub: &[u8; 32]) -> Result<SessionState, StoreError> {
        let path = self.session_path(remote_identity_pub);
        let framed = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NoSession),
            Err(e) => return Err(e.into()),
        };
        let json = self.unwrap(&framed)?;
        let record: SessionStateRecord = serde_json::from_slice(&json)?;
        record.into_session_state()
    }

    // ── Message log ──────────────────────────────────────────────────────

    fn log_path(&self, remote_identity_pub: &[u8; 32]) -> PathBuf {
        self.base_path
            .join(MSGS_DIR)
            .join(format!("{}.log", dir_id(remote_identity_pub)))
    }

    /// Append one message frame: `u32 BE length || wrap(json)`.
    pub fn append_message(&self, remote_identity_pub: &[u8; 32], message: &MessageRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec(message)?;
        let framed = self.wrap(&json)?;
        let path = self.log_path(remote_identity_pub);

        use std::io::Write;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&(framed.len() as u32).to_be_bytes())?;
        file.write_all(&framed)?;
        set_file_mode(&path)?;
        Ok(())
    }

    /// All messages for `remote_identity_pub` with `at >= since`, in log
    /// order. A truncated trailing frame (e.g. from a crash mid-append) is
    /// tolerated — parsing stops there and every prior, complete frame is
    /// still returned.
    pub fn load_messages(&self, remote_identity_pub: &[u8; 32], since: DateTime<Utc>) -> Result<Vec<MessageRecord>, StoreError> {
        let path = self.log_path(remote_identity_pub);
        let raw = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        let mut offset = 0usize;
        while offset + 4 <= raw.len() {
            let len = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap()) as usize;
            let frame_start = offset + 4;
            if frame_start + len > raw.len() {
                break; // truncated trailing frame — stop, keep what we have
            }
            let framed = &raw[frame_start..frame_start + len];
            offset = frame_start + len;

            // An interior frame that fails to unwrap/parse (e.g. a flipped
            // GCM tag) is skipped, not fatal — only a truncated trailing
            // frame aborts the scan (handled by the `break` above).
            let Ok(json) = self.unwrap(framed) else { continue };
            let Ok(message) = serde_json::from_slice::<MessageRecord>(&json) else { continue };
            if message.ts >= since {
                messages.push(message);
            }
        }
        messages.sort_by_key(|m| m.ts);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_identity_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let store1 = Store::open(dir.path()).unwrap();
        let id1 = store1.ensure_identity().unwrap();

        let store2 = Store::open(dir.path()).unwrap();
        let id2 = store2.ensure_identity().unwrap();

        assert_eq!(id1.secret_bytes(), id2.secret_bytes());
        assert_eq!(store1.master_key(), store2.master_key());
    }

    #[test]
    fn identity_file_is_not_plaintext_on_disk() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let id = store.ensure_identity().unwrap();

        let raw = fs::read(dir.path().join(IDENTITY_FILE)).unwrap();
        assert!(!raw.windows(32).any(|w| w == id.secret_bytes()));
    }

    #[test]
    fn add_contact_if_missing_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let key = [5u8; 32];

        store.add_contact_if_missing("Peer-1", key).unwrap();
        store.add_contact_if_missing("Peer-1", key).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join(CONTACTS_DIR)).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn list_contacts_sorted_by_name() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.add_contact_if_missing("Charlie", [3u8; 32]).unwrap();
        store.add_contact_if_missing("Alice", [1u8; 32]).unwrap();
        store.add_contact_if_missing("Bob", [2u8; 32]).unwrap();

        let contacts = store.list_contacts().unwrap();
        let names: Vec<_> = contacts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Charlie"]);
    }

    #[test]
    fn session_round_trips_through_store() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [9u8; 32];

        let peer = core_crypto::Peer::new();
        peer.initiate_session(remote);
        let state = peer.session_state(&remote).unwrap();

        store.save_session(&remote, &state).unwrap();
        let loaded = store.load_session(&remote).unwrap();
        assert_eq!(loaded.root_key, state.root_key);
        assert_eq!(loaded.dh_self_priv, state.dh_self_priv);
    }

    #[test]
    fn unknown_session_version_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [9u8; 32];

        let bad = crate::models::SessionStateRecord {
            v: 2,
            rk: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [0u8; 32]),
            dhs: None,
            dhr: None,
            sc: None,
            rc: None,
        };
        let json = serde_json::to_vec(&bad).unwrap();
        let framed = store.wrap(&json).unwrap();
        let path = store.session_path(&remote);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, framed).unwrap();

        assert!(matches!(store.load_session(&remote), Err(StoreError::UnsupportedVersion(2))));
    }

    fn record(out: bool, ts: DateTime<Utc>, text: &str) -> MessageRecord {
        MessageRecord {
            ts,
            out,
            plain: Some(text.to_string()),
            hdr: [0u8; 32],
            non: vec![0u8; 12],
            ct: b"ciphertext".to_vec(),
        }
    }

    #[test]
    fn append_and_load_messages_ordering() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [1u8; 32];

        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        store.append_message(&remote, &record(true, Utc::now(), "Hi Alice")).unwrap();
        store.append_message(&remote, &record(false, Utc::now(), "Hi Bob")).unwrap();

        let messages = store.load_messages(&remote, epoch).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].plain.as_deref(), Some("Hi Alice"));
        assert_eq!(messages[1].plain.as_deref(), Some("Hi Bob"));
    }

    #[test]
    fn corrupt_interior_frame_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [4u8; 32];

        store.append_message(&remote, &record(true, Utc::now(), "before")).unwrap();
        store.append_message(&remote, &record(true, Utc::now(), "corrupted")).unwrap();
        store.append_message(&remote, &record(true, Utc::now(), "after")).unwrap();

        // Flip a byte inside the middle frame's ciphertext, breaking its GCM
        // tag without touching the length prefixes around it.
        let path = store.log_path(&remote);
        let mut raw = fs::read(&path).unwrap();
        let first_len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
        let second_frame_start = 4 + first_len + 4;
        raw[second_frame_start + 10] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let messages = store.load_messages(&remote, epoch).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].plain.as_deref(), Some("before"));
        assert_eq!(messages[1].plain.as_deref(), Some("after"));
    }

    #[test]
    fn truncated_trailing_frame_preserves_prior_frames() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [2u8; 32];

        store.append_message(&remote, &record(true, Utc::now(), "Alles angekommen.")).unwrap();

        let path = store.log_path(&remote);
        let mut raw = fs::read(&path).unwrap();
        raw.extend_from_slice(&(100u32).to_be_bytes()); // declares 100 bytes, provides none
        fs::write(&path, raw).unwrap();

        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let messages = store.load_messages(&remote, epoch).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].plain.as_deref(), Some("Alles angekommen."));
    }

    #[test]
    fn since_filter_excludes_older_messages() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let remote = [3u8; 32];

        store.append_message(&remote, &record(true, Utc::now(), "old")).unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        store.append_message(&remote, &record(true, cutoff + chrono::Duration::seconds(1), "new")).unwrap();

        let messages = store.load_messages(&remote, cutoff).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].plain.as_deref(), Some("new"));
    }
}
