//! Encrypted key/value namespace.
//!
//! Values are encrypted under the master key before they reach a
//! [`StoreBackend`]; the entry key is bound into the AEAD tag, so a blob
//! copied under a different key fails to decrypt instead of leaking into
//! the wrong slot.
//!
//! On-disk layout of [`FileBackend`]:
//!
//! ```text
//! {"version":1,"entries":{"sessionId":{"iv":"<b64>","ciphertext":"<b64>"}}}
//! ```
//!
//! The document is rewritten atomically (temp file + rename) on every
//! mutation. Concurrent writers to the same key: last writer wins.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cipher::{decrypt_bound, encrypt_bound, EncryptedBlob};
use crate::error::{KeystoreError, Result};
use crate::master_key::{restrict_permissions, MasterKeyProvider};

pub const STORE_FORMAT_VERSION: u32 = 1;

// ── Backends ─────────────────────────────────────────────────────────────────

/// Durable home of encrypted blobs. Backends never see plaintext.
pub trait StoreBackend: Send + Sync {
    /// A stored entry that cannot be parsed back into a blob is reported as
    /// [`KeystoreError::DecryptionFailure`].
    fn read(&self, key: &str) -> Result<Option<EncryptedBlob>>;

    fn write(&self, key: &str, blob: EncryptedBlob) -> Result<()>;

    /// Returns whether an entry was present.
    fn remove(&self, key: &str) -> Result<bool>;

    fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, EncryptedBlob>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<EncryptedBlob>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, blob: EncryptedBlob) -> Result<()> {
        self.entries.write().insert(key.to_string(), blob);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    /// Entries stay untyped so one damaged entry does not make the whole
    /// document unreadable; each is parsed into an [`EncryptedBlob`] on read.
    #[serde(default)]
    entries: BTreeMap<String, Value>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON document on disk, cached in memory.
pub struct FileBackend {
    path: PathBuf,
    doc: RwLock<StoreDocument>,
}

impl FileBackend {
    /// Open the document at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(bytes) => {
                let doc: StoreDocument = serde_json::from_slice(&bytes)?;
                if doc.version != STORE_FORMAT_VERSION {
                    return Err(KeystoreError::Config(format!(
                        "unsupported store version {} in {}",
                        doc.version,
                        path.display()
                    )));
                }
                debug!(path = %path.display(), entries = doc.entries.len(), "store opened");
                doc
            }
            Err(e) if e.kind() == ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &StoreDocument) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(doc)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        restrict_permissions(tmp.path());
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        fsync_dir(dir);
        Ok(())
    }
}

impl StoreBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<EncryptedBlob>> {
        self.doc
            .read()
            .entries
            .get(key)
            .map(|entry| {
                EncryptedBlob::deserialize(entry).map_err(|_| KeystoreError::DecryptionFailure)
            })
            .transpose()
    }

    fn write(&self, key: &str, blob: EncryptedBlob) -> Result<()> {
        let entry = serde_json::to_value(&blob)?;
        let mut doc = self.doc.write();
        let previous = doc.entries.insert(key.to_string(), entry);
        if let Err(e) = self.persist(&doc) {
            match previous {
                Some(entry) => doc.entries.insert(key.to_string(), entry),
                None => doc.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut doc = self.doc.write();
        let Some(previous) = doc.entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&doc) {
            doc.entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.doc.read().entries.keys().cloned().collect())
    }
}

fn fsync_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(path).and_then(|dir| dir.sync_all()) {
            warn!("cannot fsync {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

// ── Store ────────────────────────────────────────────────────────────────────

pub struct EncryptedStore {
    keys: Arc<MasterKeyProvider>,
    backend: Box<dyn StoreBackend>,
}

impl EncryptedStore {
    pub fn new(keys: Arc<MasterKeyProvider>, backend: Box<dyn StoreBackend>) -> Self {
        Self { keys, backend }
    }

    /// Encrypt `value` and write it under `key`, replacing any prior entry.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let handle = self.keys.get_or_create_key()?;
        let blob = encrypt_bound(&handle, value, key.as_bytes())?;
        self.backend.write(key, blob)?;
        debug!(key, "store entry written");
        Ok(())
    }

    /// `Ok(None)` when nothing was ever written under `key`; a damaged entry
    /// is an error, never `None`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(blob) = self.backend.read(key)? else {
            return Ok(None);
        };
        let handle = self.keys.get_or_create_key()?;
        decrypt_bound(&handle, &blob, key.as_bytes()).map(Some)
    }

    pub fn put_str(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value.as_bytes())
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get(key)?
            .map(|bytes| String::from_utf8(bytes).map_err(|_| KeystoreError::InvalidUtf8))
            .transpose()
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self.backend.remove(key)?;
        if removed {
            debug!(key, "store entry removed");
        }
        Ok(removed)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.backend.read(key)?.is_some())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_key::MemoryFacility;
    use tempfile::tempdir;

    fn provider() -> Arc<MasterKeyProvider> {
        Arc::new(MasterKeyProvider::new(Arc::new(MemoryFacility::new()), "Web3Auth"))
    }

    #[test]
    fn put_then_get_and_overwrite() {
        let store = EncryptedStore::new(provider(), Box::new(MemoryBackend::new()));
        store.put("ivKey", b"first").unwrap();
        assert_eq!(store.get("ivKey").unwrap().unwrap(), b"first");
        store.put("ivKey", b"second").unwrap();
        assert_eq!(store.get("ivKey").unwrap().unwrap(), b"second");
    }

    #[test]
    fn missing_key_is_none() {
        let store = EncryptedStore::new(provider(), Box::new(MemoryBackend::new()));
        assert_eq!(store.get("sessionId").unwrap(), None);
        assert!(!store.contains("sessionId").unwrap());
        assert!(!store.remove("sessionId").unwrap());
    }

    #[test]
    fn backend_never_sees_plaintext() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        let store = EncryptedStore::new(provider(), Box::new(FileBackend::open(&path).unwrap()));
        store.put_str("sessionId", "deadbeefcafe").unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sessionId\""));
        assert!(!raw.contains("deadbeefcafe"));
    }

    #[test]
    fn damaged_entry_on_disk_is_decryption_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        fs::write(
            &path,
            r#"{"version":1,"entries":{"ivKey":{"iv":"not base64!","ciphertext":"AAAA"}}}"#,
        )
        .unwrap();
        let store = EncryptedStore::new(provider(), Box::new(FileBackend::open(&path).unwrap()));
        assert!(matches!(store.get("ivKey"), Err(KeystoreError::DecryptionFailure)));
    }

    #[test]
    fn misshapen_entries_do_not_poison_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        let keys = provider();
        {
            let store =
                EncryptedStore::new(keys.clone(), Box::new(FileBackend::open(&path).unwrap()));
            store.put_str("sessionId", "abc").unwrap();
        }
        let mut doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        doc["entries"]["ivKey"] = serde_json::json!({ "iv": "AAAA" });
        doc["entries"]["ephemPublicKey"] = serde_json::json!(42);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = EncryptedStore::new(keys, Box::new(FileBackend::open(&path).unwrap()));
        assert_eq!(store.get_string("sessionId").unwrap().as_deref(), Some("abc"));
        assert!(matches!(store.get("ivKey"), Err(KeystoreError::DecryptionFailure)));
        assert!(matches!(store.get("ephemPublicKey"), Err(KeystoreError::DecryptionFailure)));
    }

    #[test]
    fn failed_persist_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        let store = EncryptedStore::new(provider(), Box::new(FileBackend::open(&path).unwrap()));
        store.put_str("ivKey", "first").unwrap();

        // A directory at the store path makes the final rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(store.put_str("ivKey", "second").is_err());
        assert_eq!(store.get_string("ivKey").unwrap().as_deref(), Some("first"));

        assert!(store.put_str("sessionId", "new").is_err());
        assert_eq!(store.get("sessionId").unwrap(), None);

        assert!(store.remove("ivKey").is_err());
        assert!(store.contains("ivKey").unwrap());
        assert_eq!(store.get_string("ivKey").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn unknown_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        fs::write(&path, r#"{"version":9,"entries":{}}"#).unwrap();
        assert!(matches!(FileBackend::open(&path), Err(KeystoreError::Config(_))));
    }

    #[test]
    fn non_utf8_value_reported() {
        let store = EncryptedStore::new(provider(), Box::new(MemoryBackend::new()));
        store.put("ephemPublicKey", &[0xff, 0xfe]).unwrap();
        assert!(matches!(
            store.get_string("ephemPublicKey"),
            Err(KeystoreError::InvalidUtf8)
        ));
    }

    #[test]
    fn remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Web3Auth.json");
        let keys = provider();
        let store = EncryptedStore::new(keys.clone(), Box::new(FileBackend::open(&path).unwrap()));
        store.put("sessionId", b"abc").unwrap();
        assert!(store.remove("sessionId").unwrap());

        let reopened = EncryptedStore::new(keys, Box::new(FileBackend::open(&path).unwrap()));
        assert_eq!(reopened.get("sessionId").unwrap(), None);
        assert!(reopened.keys().unwrap().is_empty());
    }
}
