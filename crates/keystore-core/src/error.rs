use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("Platform key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    #[error("Decryption failed (tampered ciphertext, wrong key or corrupted IV)")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Invalid session identifier: {0}")]
    InvalidSessionIdentifier(String),

    #[error("Invalid private scalar: {0}")]
    InvalidPrivateScalar(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("No active session, log in first")]
    NoActiveSession,

    #[error("Stored value is not valid UTF-8")]
    InvalidUtf8,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, KeystoreError>;
