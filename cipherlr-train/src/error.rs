use cipherlr_ckks::CryptoError;
use thiserror::Error;

use crate::linalg::Axis;

/// Errors raised while preparing or running encrypted training.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("packing overflow: a {rows}x{cols} block needs {needed} slots, backend has {slots}")]
    PackingOverflow {
        rows: usize,
        cols: usize,
        needed: usize,
        slots: usize,
    },

    #[error("insufficient depth for {stage}: requires {required}, ciphertext has {available}")]
    InsufficientDepth {
        stage: &'static str,
        required: i32,
        available: i32,
    },

    #[error("rotation keys for the {actual:?} axis supplied where {expected:?} keys are required")]
    KeySetMismatch { expected: Axis, actual: Axis },

    #[error("value {value} at ({row}, {col}) exceeds bound {bound}")]
    BoundExceeded {
        row: usize,
        col: usize,
        value: f64,
        bound: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrainError>;
