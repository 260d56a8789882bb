//! Logistic-regression training over homomorphically encrypted data.
//!
//! The feature matrix, labels and weights stay encrypted for the whole
//! gradient computation; only the data owner ([`KeyHolder`]) can decrypt.
//!
//! ```text
//!   KeyHolder ──encrypt──▶ EncryptedDataset, θ
//!                              │
//!   EncryptedTrainer::step ────┤  GradientEngine
//!                              │    row_dot ─▶ Chebyshev σ̃ ─▶ y − p ─▶ column_dot
//!                              ▼
//!   KeyHolder ──decrypt──▶ θ ─▶ compute_all_metrics
//! ```
//!
//! All homomorphic work goes through [`cipherlr_ckks::HeBackend`], so the
//! same code runs on the mock backend and on RNS-CKKS.

pub mod config;
pub mod error;
pub mod gradient;
pub mod instrument;
pub mod linalg;
pub mod matrix;
pub mod metrics;
pub mod owner;
pub mod sigmoid;
pub mod train;

pub use config::{GradientConfig, TrainingConfig};
pub use error::{Result, TrainError};
pub use gradient::{GradientEngine, Stage};
pub use linalg::{Axis, MatKeys};
pub use matrix::{add_bias_column, initialize_log_reg, Mat, PackingLayout};
pub use metrics::{compute_all_metrics, PerformanceMetrics};
pub use owner::{EncryptedDataset, KeyHolder};
pub use sigmoid::ChebyshevSeries;
pub use train::{train_plaintext, EncryptedTrainer, Refresher};

#[cfg(any(test, feature = "debug-instrumentation"))]
pub use instrument::{DebugReport, InstrumentedGradientEngine};
