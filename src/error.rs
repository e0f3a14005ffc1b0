//! Error types for Sonority

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SonorityError {
    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failures reported by an [`AudioDecoder`](crate::decoder::AudioDecoder).
///
/// `Unsupported` is permanent for the asset: the engine remembers it and
/// rejects every later play of the same asset. `Io` is transient and only
/// fails the attempt that hit it.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported audio data: {0}")]
    Unsupported(String),

    #[error("IO error while decoding: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, SonorityError>;
