//! Request signing.
//!
//! Hash with Keccak-256, sign with deterministic (RFC 6979) low-S ECDSA over
//! secp256k1, then emit the fixed-width encoding
//!
//! ```text
//! r (32 bytes, big-endian, left-padded) | s (32 bytes) | recovery marker (1 byte)
//! ```
//!
//! Verifiers read `r` and `s` by position, so both are always padded to 32
//! bytes. The marker is a constant `0x00`, not a computed recovery id.

use base64::{engine::general_purpose, Engine as _};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use crate::encoding::{from_hex_string, to_hex_string};
use crate::error::{KeystoreError, Result};
use crate::keypair::{parse_scalar_hex, SessionKeyPair};

pub const SIGNATURE_LEN: usize = 65;
pub const RECOVERY_MARKER: u8 = 0x00;
pub const ETH_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureRecord {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_marker: u8,
}

impl SignatureRecord {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_marker;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(KeystoreError::Signing(format!(
                "signature must be {SIGNATURE_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self {
            r,
            s,
            recovery_marker: bytes[64],
        })
    }

    /// Standard (padded, non URL-safe) base64.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::from_bytes(&general_purpose::STANDARD.decode(encoded)?)
    }

    /// `0x` followed by 130 lowercase hex characters.
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", to_hex_string(&self.to_bytes()))
    }

    /// Accepts the output of [`Self::to_prefixed_hex`], with or without `0x`.
    pub fn from_prefixed_hex(encoded: &str) -> Result<Self> {
        Self::from_bytes(&from_hex_string(encoded)?)
    }
}

/// ECDSA signer over a session's private scalar.
pub struct SessionSigner {
    key: SigningKey,
}

impl SessionSigner {
    pub fn new(pair: &SessionKeyPair) -> Self {
        Self {
            key: SigningKey::from(pair.secret_key().clone()),
        }
    }

    /// Accept a raw 32-byte big-endian scalar from outside the deriver.
    pub fn from_scalar_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(KeystoreError::InvalidPrivateScalar(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = SigningKey::from_slice(bytes).map_err(|_| {
            KeystoreError::InvalidPrivateScalar("zero or not below the curve order".into())
        })?;
        Ok(Self { key })
    }

    pub fn from_scalar_hex(scalar: &str) -> Result<Self> {
        let bytes = parse_scalar_hex(scalar).map_err(KeystoreError::InvalidPrivateScalar)?;
        Self::from_scalar_bytes(bytes.as_slice())
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign a 32-byte digest.
    pub fn sign_prehash(&self, hash: &[u8; 32]) -> Result<SignatureRecord> {
        let signature: Signature = self
            .key
            .sign_prehash(hash)
            .map_err(|e| KeystoreError::Signing(e.to_string()))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let (r, s) = signature.split_bytes();
        let mut record = SignatureRecord {
            r: [0u8; 32],
            s: [0u8; 32],
            recovery_marker: RECOVERY_MARKER,
        };
        record.r.copy_from_slice(&r);
        record.s.copy_from_slice(&s);
        Ok(record)
    }

    /// Sign the canonical JSON form of `message`; returns base64.
    pub fn sign_payload(&self, message: &str) -> Result<String> {
        let canonical = canonical_json_string(message);
        let hash = keccak256(canonical.as_bytes());
        debug!(hash = %to_hex_string(&hash), "signing payload");
        Ok(self.sign_prehash(&hash)?.to_base64())
    }

    /// Proof of key possession: signature over the Ethereum-prefixed empty
    /// message; returns `0x` hex.
    pub fn sign_empty_prefixed_message(&self) -> Result<String> {
        Ok(self.sign_prefixed_message(b"")?.to_prefixed_hex())
    }

    pub fn sign_prefixed_message(&self, message: &[u8]) -> Result<SignatureRecord> {
        self.sign_prehash(&prefixed_message_hash(message))
    }
}

/// Sign `message` with a raw scalar. See [`SessionSigner::sign_payload`].
pub fn sign_payload(private_scalar: &[u8], message: &str) -> Result<String> {
    SessionSigner::from_scalar_bytes(private_scalar)?.sign_payload(message)
}

/// See [`SessionSigner::sign_empty_prefixed_message`].
pub fn sign_empty_prefixed_message(private_scalar: &[u8]) -> Result<String> {
    SessionSigner::from_scalar_bytes(private_scalar)?.sign_empty_prefixed_message()
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// `keccak256("\x19Ethereum Signed Message:\n" + len + message)`.
pub fn prefixed_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(ETH_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize(&mut out);
    out
}

/// Serialize `message` as a JSON string literal the way the SDK's JSON
/// layer does: quoted, control characters escaped, and HTML-sensitive
/// characters (`< > & = '`) plus U+2028/U+2029 written as `\uXXXX`.
pub fn canonical_json_string(message: &str) -> String {
    let mut out = String::with_capacity(message.len() + 2);
    out.push('"');
    for c in message.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '<' | '>' | '&' | '=' | '\'' | '\u{2028}' | '\u{2029}' => {
                out.push_str(&format!("\\u{:04x}", c as u32))
            }
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
