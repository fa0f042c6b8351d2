use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Packet truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("Invalid destination address")]
    InvalidAddress,
    #[error("Padding length {padding} exceeds body of {available} bytes")]
    InvalidPadding { padding: usize, available: usize },
    #[error("Invalid key")]
    InvalidKey,
    #[error("Encryption failed")]
    SealFailed,
    #[error("Decryption failed")]
    OpenFailed,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
