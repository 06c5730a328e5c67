use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{KeystoreError, Result};
use crate::paths::default_data_dir;

pub const DEFAULT_NAMESPACE: &str = "Web3Auth";
pub const DEFAULT_MASTER_KEY_ALIAS: &str = "Web3Auth";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyFacilityKind {
    #[default]
    Keyring,
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Name of the encrypted store namespace and of the keyring service.
    pub namespace: String,
    pub master_key_alias: String,
    pub key_facility: KeyFacilityKind,
    pub data_dir: Option<PathBuf>,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            master_key_alias: DEFAULT_MASTER_KEY_ALIAS.to_string(),
            key_facility: KeyFacilityKind::Keyring,
            data_dir: None,
        }
    }
}

impl KeystoreConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("master_key_alias", &self.master_key_alias),
        ] {
            if value.is_empty() {
                return Err(KeystoreError::Config(format!("{field} must not be empty")));
            }
            if value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(KeystoreError::Config(format!(
                    "{field} must not contain path separators"
                )));
            }
        }
        Ok(())
    }

    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        self.data_dir
            .clone()
            .or_else(default_data_dir)
            .ok_or_else(|| KeystoreError::Config("cannot determine data directory".into()))
    }

    /// File backing the encrypted store namespace.
    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.resolved_data_dir()?.join(format!("{}.json", self.namespace)))
    }
}
