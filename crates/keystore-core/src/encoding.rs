//! Byte encodings shared with the rest of the SDK.
//!
//! The hex helpers back the signer and keypair renderings. The URL-safe
//! base64 pair is exported for SDK components that pass key material
//! through URLs and is not used inside this crate.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::Result;

/// Lowercase hex, no `0x` prefix, leading zeros kept.
pub fn to_hex_string(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Accepts an optional `0x` prefix.
pub fn from_hex_string(s: &str) -> Result<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(digits)?)
}

/// URL-safe base64 without padding or line wrapping.
pub fn to_base64_url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn from_base64_url(s: &str) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(s)?)
}
