//! Master key custody.
//!
//! The master key is a random 256-bit key held by a [`KeyFacility`]: the OS
//! credential store, an owner-only key file, or process memory. The
//! [`MasterKeyProvider`] creates it at most once and hands out
//! [`MasterKeyHandle`]s, which carry an initialised cipher instead of bytes.
//!
//! Lifecycle: initialised exactly once per provider on first use under a
//! mutex, torn down only by [`MasterKeyProvider::erase`].

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::{Key, XChaCha20Poly1305};
use keyring::Entry;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::{KeyFacilityKind, KeystoreConfig};
use crate::error::{KeystoreError, Result};

pub const MASTER_KEY_LEN: usize = 32;

// ── Facilities ───────────────────────────────────────────────────────────────

/// Platform place where the master key lives.
///
/// Implementations move raw key bytes only between themselves and the
/// provider. Any failure to reach the underlying facility must surface as
/// [`KeystoreError::KeyStoreUnavailable`].
pub trait KeyFacility: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when no key has been created under `alias` yet.
    fn load(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    fn save(&self, alias: &str, key: &[u8]) -> Result<()>;

    fn erase(&self, alias: &str) -> Result<()>;
}

/// OS credential store (Keychain, Credential Manager, Secret Service).
pub struct KeyringFacility {
    service: String,
}

impl KeyringFacility {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<Entry> {
        Entry::new(&self.service, alias).map_err(|e| unavailable(format!("keyring init: {e}")))
    }
}

impl KeyFacility for KeyringFacility {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn load(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self.entry(alias)?.get_password() {
            Ok(encoded) => decode_key(&Zeroizing::new(encoded)).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(unavailable(format!("load master key: {e}"))),
        }
    }

    fn save(&self, alias: &str, key: &[u8]) -> Result<()> {
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key));
        self.entry(alias)?
            .set_password(&encoded)
            .map_err(|e| unavailable(format!("store master key: {e}")))
    }

    fn erase(&self, alias: &str) -> Result<()> {
        match self.entry(alias)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(unavailable(format!("delete master key: {e}"))),
        }
    }
}

/// Key file with owner-only permissions, for hosts without a secret service.
pub struct FileFacility {
    dir: PathBuf,
}

impl FileFacility {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn key_path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{alias}.key"))
    }
}

impl KeyFacility for FileFacility {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match fs::read_to_string(self.key_path(alias)) {
            Ok(encoded) => decode_key(&Zeroizing::new(encoded)).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(format!("read key file: {e}"))),
        }
    }

    fn save(&self, alias: &str, key: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| unavailable(format!("create key dir: {e}")))?;
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key));
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| unavailable(format!("stage key file: {e}")))?;
        restrict_permissions(tmp.path());
        tmp.write_all(encoded.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| unavailable(format!("write key file: {e}")))?;
        tmp.persist(self.key_path(alias))
            .map_err(|e| unavailable(format!("persist key file: {e}")))?;
        Ok(())
    }

    fn erase(&self, alias: &str) -> Result<()> {
        match fs::remove_file(self.key_path(alias)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(format!("remove key file: {e}"))),
        }
    }
}

/// Process-local facility. Keys vanish with the process.
#[derive(Default)]
pub struct MemoryFacility {
    inner: Mutex<MemoryFacilityInner>,
}

#[derive(Default)]
struct MemoryFacilityInner {
    keys: HashMap<String, Zeroizing<Vec<u8>>>,
    offline: bool,
}

impl MemoryFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a locked or absent security module.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.inner.lock().keys.contains_key(alias)
    }
}

impl KeyFacility for MemoryFacility {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let inner = self.inner.lock();
        if inner.offline {
            return Err(unavailable("memory facility offline"));
        }
        Ok(inner.keys.get(alias).cloned())
    }

    fn save(&self, alias: &str, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(unavailable("memory facility offline"));
        }
        inner
            .keys
            .insert(alias.to_string(), Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn erase(&self, alias: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(unavailable("memory facility offline"));
        }
        inner.keys.remove(alias);
        Ok(())
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Opaque reference to the master key. Cheap to clone.
#[derive(Clone)]
pub struct MasterKeyHandle {
    alias: Arc<str>,
    cipher: Arc<XChaCha20Poly1305>,
}

impl MasterKeyHandle {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// True when both handles were issued for the same initialised key.
    pub fn is_same_key(&self, other: &MasterKeyHandle) -> bool {
        Arc::ptr_eq(&self.cipher, &other.cipher)
    }

    pub(crate) fn cipher(&self) -> &XChaCha20Poly1305 {
        &self.cipher
    }

    /// Handle over a throwaway random key that no facility knows about.
    pub fn ephemeral() -> Self {
        let key = generate_key();
        Self::with_key("ephemeral", Key::from_slice(&key))
    }

    fn from_key_bytes(alias: &str, key: &[u8]) -> Result<Self> {
        if key.len() != MASTER_KEY_LEN {
            return Err(unavailable(format!(
                "master key has length {}, expected {MASTER_KEY_LEN}",
                key.len()
            )));
        }
        Ok(Self::with_key(alias, Key::from_slice(key)))
    }

    fn with_key(alias: &str, key: &Key) -> Self {
        Self {
            alias: Arc::from(alias),
            cipher: Arc::new(XChaCha20Poly1305::new(key)),
        }
    }
}

impl fmt::Debug for MasterKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

// ── Provider ─────────────────────────────────────────────────────────────────

pub struct MasterKeyProvider {
    alias: String,
    facility: Arc<dyn KeyFacility>,
    handle: Mutex<Option<MasterKeyHandle>>,
}

impl MasterKeyProvider {
    pub fn new(facility: Arc<dyn KeyFacility>, alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            facility,
            handle: Mutex::new(None),
        }
    }

    /// Build the provider selected by `config.key_facility`.
    pub fn from_config(config: &KeystoreConfig) -> Result<Self> {
        let facility: Arc<dyn KeyFacility> = match config.key_facility {
            KeyFacilityKind::Keyring => Arc::new(KeyringFacility::new(&config.namespace)),
            KeyFacilityKind::File => Arc::new(FileFacility::new(config.resolved_data_dir()?)),
            KeyFacilityKind::Memory => Arc::new(MemoryFacility::new()),
        };
        Ok(Self::new(facility, &config.master_key_alias))
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Return the master key handle, loading or generating the key on the
    /// first call. Concurrent first callers block on the same mutex, so a
    /// provider never generates a second key.
    pub fn get_or_create_key(&self) -> Result<MasterKeyHandle> {
        let mut slot = self.handle.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let key = match self.facility.load(&self.alias)? {
            Some(key) => {
                debug!(alias = %self.alias, facility = self.facility.name(), "master key loaded");
                key
            }
            None => {
                let key = generate_key();
                self.facility.save(&self.alias, &key)?;
                debug!(alias = %self.alias, facility = self.facility.name(), "master key created");
                key
            }
        };

        let handle = MasterKeyHandle::from_key_bytes(&self.alias, &key)?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Destroy the master key. Blobs encrypted under it become unreadable.
    pub fn erase(&self) -> Result<()> {
        let mut slot = self.handle.lock();
        self.facility.erase(&self.alias)?;
        *slot = None;
        warn!(alias = %self.alias, "master key erased");
        Ok(())
    }
}

impl fmt::Debug for MasterKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyProvider")
            .field("alias", &self.alias)
            .field("facility", &self.facility.name())
            .field("initialised", &self.handle.lock().is_some())
            .finish()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn generate_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; MASTER_KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

fn decode_key(encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map(Zeroizing::new)
        .map_err(|e| unavailable(format!("stored master key is malformed: {e}")))
}

fn unavailable(msg: impl Into<String>) -> KeystoreError {
    KeystoreError::KeyStoreUnavailable(msg.into())
}

pub(crate) fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
