use thiserror::Error;

/// Errors raised by homomorphic backends.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CryptoError {
    #[error("multiplicative depth exhausted: {operation} needs one level, ciphertext has {remaining}")]
    DepthExhausted { operation: &'static str, remaining: i32 },

    #[error("no rotation key for rotation {0}")]
    MissingRotationKey(i32),

    #[error("scale mismatch: {left} vs {right}")]
    ScaleMismatch { left: f64, right: f64 },

    #[error("too many values: {len} > {slots} slots")]
    SlotOverflow { len: usize, slots: usize },

    #[error("value {value} cannot be encoded at scale {scale}")]
    EncodingOverflow { value: f64, scale: f64 },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
