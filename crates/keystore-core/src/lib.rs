//! keystore_core: session credential protection for the mobile auth SDK
//!
//! # Design principles
//! - The session identifier is the root secret; keypairs are derived from it
//!   on demand and never persisted.
//! - Master key material stays behind a `KeyFacility`; everything above it
//!   works with an opaque `MasterKeyHandle`.
//! - Every service is constructed and injected explicitly. No globals.
//!
//! # Module layout
//! - `master_key`: lazily created master key + platform key facilities
//! - `cipher`:     XChaCha20-Poly1305 encrypt/decrypt into `EncryptedBlob`
//! - `store`:      encrypted key/value namespace over pluggable backends
//! - `keypair`:    session id → secp256k1 keypair
//! - `signer`:     Keccak-256 + ECDSA, fixed-width `r‖s‖marker` encoding
//! - `keystore`:   `SessionKeystore`, the composed session facade
//! - `encoding`:   hex / base64url helpers shared with other SDK components
//! - `config`, `paths`: configuration and data directory resolution
//! - `error`:      unified error type

pub mod cipher;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keypair;
pub mod keystore;
pub mod master_key;
pub mod paths;
pub mod signer;
pub mod store;

pub use cipher::EncryptedBlob;
pub use config::{KeyFacilityKind, KeystoreConfig};
pub use error::{KeystoreError, Result};
pub use keypair::{derive_key_pair, derive_private_hex, derive_public_hex, SessionKeyPair};
pub use keystore::{SessionKeystore, EPHEM_PUBLIC_KEY, IV_KEY, SESSION_ID};
pub use master_key::{MasterKeyHandle, MasterKeyProvider};
pub use signer::{SessionSigner, SignatureRecord};
pub use store::EncryptedStore;
