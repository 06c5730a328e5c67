//! Cipher engine.
//!
//! XChaCha20-Poly1305 under the master key. Every call draws a fresh random
//! 24-byte IV, so IVs never repeat in practice even across millions of
//! encryptions with one key. The Poly1305 tag travels at the end of
//! `ciphertext`; any bit flip in the IV, ciphertext or tag fails decryption.
//!
//! All decryption failures collapse into [`KeystoreError::DecryptionFailure`]
//! with no further detail.

use chacha20poly1305::aead::{Aead, AeadCore, OsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

use crate::error::{KeystoreError, Result};
use crate::master_key::MasterKeyHandle;

pub const IV_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// IV + ciphertext produced by one encryption call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

pub fn encrypt(handle: &MasterKeyHandle, plaintext: &[u8]) -> Result<EncryptedBlob> {
    encrypt_bound(handle, plaintext, b"")
}

pub fn decrypt(handle: &MasterKeyHandle, blob: &EncryptedBlob) -> Result<Vec<u8>> {
    decrypt_bound(handle, blob, b"")
}

/// Encrypt with `aad` authenticated alongside the ciphertext. The same `aad`
/// must be presented to [`decrypt_bound`].
pub fn encrypt_bound(
    handle: &MasterKeyHandle,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<EncryptedBlob> {
    let iv = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = handle
        .cipher()
        .encrypt(&iv, Payload { msg: plaintext, aad })
        .map_err(|_| KeystoreError::EncryptionFailure)?;
    Ok(EncryptedBlob {
        iv: iv.to_vec(),
        ciphertext,
    })
}

pub fn decrypt_bound(
    handle: &MasterKeyHandle,
    blob: &EncryptedBlob,
    aad: &[u8],
) -> Result<Vec<u8>> {
    if blob.iv.len() != IV_LEN || blob.ciphertext.len() < TAG_LEN {
        return Err(KeystoreError::DecryptionFailure);
    }
    let iv = XNonce::from_slice(&blob.iv);
    handle
        .cipher()
        .decrypt(
            iv,
            Payload {
                msg: &blob.ciphertext,
                aad,
            },
        )
        .map_err(|_| KeystoreError::DecryptionFailure)
}

/// Standard base64 for byte fields; this is the on-disk entry form.
pub(crate) mod b64 {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
