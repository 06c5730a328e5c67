//! Session keypair derivation.
//!
//! The session identifier *is* the secp256k1 private scalar, hex-encoded.
//! Derivation is a pure function, so the keypair is recomputed whenever it is
//! needed and the scalar is never stored on its own.

use std::fmt;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::encoding::to_hex_string;
use crate::error::{KeystoreError, Result};

/// Hex digits in a 256-bit scalar.
const SCALAR_HEX_LEN: usize = 64;

/// secp256k1 keypair derived from a session identifier. The secret scalar is
/// zeroized on drop and never printed.
#[derive(Clone)]
pub struct SessionKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl SessionKeyPair {
    /// Parse `session_id` as a base-16 scalar and compute `scalar · G`.
    ///
    /// Rejects empty input, non-hex characters, zero and values ≥ the curve
    /// order with [`KeystoreError::InvalidSessionIdentifier`].
    pub fn derive(session_id: &str) -> Result<Self> {
        let bytes =
            parse_scalar_hex(session_id).map_err(KeystoreError::InvalidSessionIdentifier)?;
        let secret = SecretKey::from_slice(bytes.as_slice()).map_err(|_| {
            KeystoreError::InvalidSessionIdentifier(
                "scalar is zero or not below the curve order".into(),
            )
        })?;
        Ok(Self::from_secret(secret))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// 32-byte big-endian scalar.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// 64-byte `x‖y` of the uncompressed point, without the SEC1 `04` tag.
    pub fn public_bytes(&self) -> [u8; 64] {
        let point = self.public.to_encoded_point(false);
        let mut out = [0u8; 64];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// Scalar as unpadded lowercase hex (the big-integer rendering other SDK
    /// components read back).
    pub fn private_hex(&self) -> String {
        trim_hex(&to_hex_string(self.private_bytes().as_slice()))
    }

    /// `x‖y` as unpadded lowercase hex.
    pub fn public_hex(&self) -> String {
        trim_hex(&to_hex_string(&self.public_bytes()))
    }
}

impl PartialEq for SessionKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public && self.secret.to_bytes() == other.secret.to_bytes()
    }
}

impl Eq for SessionKeyPair {}

impl fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

pub fn derive_key_pair(session_id: &str) -> Result<SessionKeyPair> {
    SessionKeyPair::derive(session_id)
}

pub fn derive_public_hex(session_id: &str) -> Result<String> {
    Ok(SessionKeyPair::derive(session_id)?.public_hex())
}

pub fn derive_private_hex(session_id: &str) -> Result<String> {
    Ok(SessionKeyPair::derive(session_id)?.private_hex())
}

/// Left-pad a hex scalar to 32 big-endian bytes. Leading zeros are accepted;
/// range checks against the curve order happen in the caller.
pub(crate) fn parse_scalar_hex(input: &str) -> std::result::Result<Zeroizing<[u8; 32]>, String> {
    if input.is_empty() {
        return Err("empty".into());
    }
    if !input.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("not a base-16 string".into());
    }
    let digits = input.trim_start_matches('0');
    if digits.len() > SCALAR_HEX_LEN {
        return Err("longer than 256 bits".into());
    }
    let padded = Zeroizing::new(format!("{:0>width$}", digits, width = SCALAR_HEX_LEN));
    let mut out = Zeroizing::new([0u8; 32]);
    hex::decode_to_slice(padded.as_str(), out.as_mut_slice()).map_err(|e| e.to_string())?;
    Ok(out)
}

fn trim_hex(hex: &str) -> String {
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
