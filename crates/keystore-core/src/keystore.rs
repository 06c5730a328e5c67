//! Session facade.
//!
//! Wires the master key provider, encrypted store, deriver and signer
//! together for the login / sign / logout flow. Entry keys below are a
//! contract with other SDK components and must not change.

use std::sync::Arc;

use tracing::info;

use crate::config::KeystoreConfig;
use crate::error::{KeystoreError, Result};
use crate::keypair::SessionKeyPair;
use crate::master_key::MasterKeyProvider;
use crate::signer::SessionSigner;
use crate::store::{EncryptedStore, FileBackend, StoreBackend};

pub const SESSION_ID: &str = "sessionId";
pub const IV_KEY: &str = "ivKey";
pub const EPHEM_PUBLIC_KEY: &str = "ephemPublicKey";

/// Entries removed on logout.
pub const SESSION_ENTRIES: [&str; 3] = [SESSION_ID, IV_KEY, EPHEM_PUBLIC_KEY];

pub struct SessionKeystore {
    keys: Arc<MasterKeyProvider>,
    store: EncryptedStore,
}

impl SessionKeystore {
    pub fn new(keys: Arc<MasterKeyProvider>, backend: Box<dyn StoreBackend>) -> Self {
        let store = EncryptedStore::new(keys.clone(), backend);
        Self { keys, store }
    }

    /// Build the provider and file-backed store described by `config`.
    pub fn open(config: &KeystoreConfig) -> Result<Self> {
        config.validate()?;
        let keys = Arc::new(MasterKeyProvider::from_config(config)?);
        let backend = FileBackend::open(config.store_path()?)?;
        info!(
            namespace = %config.namespace,
            path = %backend.path().display(),
            "session keystore opened"
        );
        Ok(Self::new(keys, Box::new(backend)))
    }

    pub fn master_keys(&self) -> &MasterKeyProvider {
        &self.keys
    }

    pub fn store(&self) -> &EncryptedStore {
        &self.store
    }

    pub fn save(&self, key: &str, data: &str) -> Result<()> {
        self.store.put_str(key, data)
    }

    pub fn load(&self, key: &str) -> Result<Option<String>> {
        self.store.get_string(key)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove(key)
    }

    /// Validate `session_id` by deriving its keypair, then persist it.
    pub fn save_session(&self, session_id: &str) -> Result<SessionKeyPair> {
        let pair = SessionKeyPair::derive(session_id)?;
        self.store.put_str(SESSION_ID, session_id)?;
        info!(public_key = %pair.public_hex(), "session stored");
        Ok(pair)
    }

    pub fn session_id(&self) -> Result<Option<String>> {
        self.store.get_string(SESSION_ID)
    }

    pub fn session_key_pair(&self) -> Result<SessionKeyPair> {
        let session_id = self.session_id()?.ok_or(KeystoreError::NoActiveSession)?;
        SessionKeyPair::derive(&session_id)
    }

    pub fn public_key_hex(&self) -> Result<String> {
        Ok(self.session_key_pair()?.public_hex())
    }

    pub fn private_key_hex(&self) -> Result<String> {
        Ok(self.session_key_pair()?.private_hex())
    }

    pub fn signer(&self) -> Result<SessionSigner> {
        Ok(SessionSigner::new(&self.session_key_pair()?))
    }

    /// Base64 signature over `message` with the stored session key.
    pub fn sign_request(&self, message: &str) -> Result<String> {
        self.signer()?.sign_payload(message)
    }

    /// `0x` hex signature over the prefixed empty message.
    pub fn proof_of_possession(&self) -> Result<String> {
        self.signer()?.sign_empty_prefixed_message()
    }

    /// Drop every session entry. Returns how many were present.
    pub fn clear_session(&self) -> Result<usize> {
        let mut removed = 0;
        for key in SESSION_ENTRIES {
            if self.store.remove(key)? {
                removed += 1;
            }
        }
        info!(removed, "session cleared");
        Ok(removed)
    }
}
