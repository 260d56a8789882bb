//! Debug and validation instrumentation.
//!
//! Depth exhaustion and approximation-range violations do not raise errors
//! in the scheme; they turn into wrong numbers. The helpers here make them
//! visible:
//!
//! - [`return_depth`] reports the remaining multiplicative depth so callers
//!   can check before composing more multiplications
//! - [`bound_check_mat`] flags decrypted values outside an expected range
//! - [`re_encrypt`] decrypts and re-encodes a ciphertext for inspection
//!
//! `InstrumentedGradientEngine` decrypts every intermediate of a gradient
//! run. It holds the secret key, so it is only compiled for tests and under
//! the `debug-instrumentation` feature.

use cipherlr_ckks::{HeBackend, Plaintext};

use crate::error::{Result, TrainError};
use crate::matrix::Mat;

/// Decrypt `ct` and encode the result again as a plaintext.
pub fn re_encrypt<B: HeBackend>(
    backend: &B,
    ct: &B::Ciphertext,
    secret: &B::SecretKey,
) -> Result<Plaintext> {
    let decrypted = backend.decrypt(ct, secret)?;
    Ok(backend.encode(decrypted.slots())?)
}

/// Remaining multiplicative depth of `ct`. Negative on the mock backend once
/// overdrawn.
pub fn return_depth<B: HeBackend>(backend: &B, ct: &B::Ciphertext) -> i32 {
    backend.depth(ct)
}

/// Fail on the first entry that is not finite or exceeds `bound` in
/// absolute value.
pub fn bound_check_mat(mat: &Mat, bound: f64) -> Result<()> {
    for ((row, col), &value) in mat.indexed_iter() {
        if !value.is_finite() || value.abs() > bound {
            return Err(TrainError::BoundExceeded {
                row,
                col,
                value,
                bound,
            });
        }
    }
    Ok(())
}

#[cfg(any(test, feature = "debug-instrumentation"))]
pub use instrumented::{
    DebugReport, InstrumentedGradientEngine, StageSnapshot, DEFAULT_TOLERANCE,
};

#[cfg(any(test, feature = "debug-instrumentation"))]
mod instrumented {
    use cipherlr_ckks::HeBackend;
    use log::{debug, warn};

    use super::bound_check_mat;
    use crate::error::Result;
    use crate::gradient::{GradientEngine, Probe, Stage};
    use crate::matrix::{Mat, PackingLayout};

    /// Slack allowed on every bound, absorbing CKKS noise.
    pub const DEFAULT_TOLERANCE: f64 = 1e-3;

    /// One decrypted intermediate.
    #[derive(Clone, Debug)]
    pub struct StageSnapshot {
        pub stage: Stage,
        pub depth: i32,
        /// The first `debug_plaintext_length` slots.
        pub head: Vec<f64>,
        /// Per-sample values for the row stages, per-feature for the gradient.
        pub values: Mat,
        pub violation: Option<String>,
    }

    #[derive(Clone, Debug, Default)]
    pub struct DebugReport {
        pub snapshots: Vec<StageSnapshot>,
    }

    impl DebugReport {
        pub fn is_clean(&self) -> bool {
            self.snapshots.iter().all(|s| s.violation.is_none())
        }

        pub fn violations(&self) -> impl Iterator<Item = (Stage, &str)> {
            self.snapshots
                .iter()
                .filter_map(|s| s.violation.as_deref().map(|v| (s.stage, v)))
        }

        pub fn snapshot(&self, stage: Stage) -> Option<&StageSnapshot> {
            self.snapshots.iter().find(|s| s.stage == stage)
        }
    }

    struct Recorder<'r, B: HeBackend> {
        backend: &'r B,
        secret: &'r B::SecretKey,
        layout: PackingLayout,
        head_len: usize,
        tolerance: f64,
        gradient_bound: f64,
        report: DebugReport,
    }

    impl<B: HeBackend> Recorder<'_, B> {
        fn check(&self, stage: Stage, values: &Mat) -> Option<String> {
            let tol = self.tolerance;
            let outcome = match stage {
                Stage::NormalizedLogits => bound_check_mat(values, 1.0 + tol),
                // [−tol, 1 + tol] as a symmetric bound around 1/2
                Stage::Activations => bound_check_mat(&values.mapv(|p| p - 0.5), 0.5 + tol),
                Stage::Residuals => bound_check_mat(values, 1.0 + tol),
                Stage::Gradient => bound_check_mat(values, self.gradient_bound + tol),
            };
            outcome.err().map(|e| e.to_string())
        }
    }

    impl<B: HeBackend> Probe<B> for Recorder<'_, B> {
        fn observe(&mut self, stage: Stage, ct: &B::Ciphertext) -> Result<()> {
            let depth = self.backend.depth(ct);
            let pt = self.backend.decrypt(ct, self.secret)?;
            let values = match stage {
                Stage::Gradient => self.layout.unpack_column_replicated(pt.slots())?,
                _ => self.layout.unpack_row_replicated(pt.slots())?,
            };
            let violation = self.check(stage, &values);
            debug!(
                "[{}] depth {}: {:?}",
                stage,
                depth,
                pt.head(self.head_len)
            );
            if let Some(v) = &violation {
                warn!("[{}] bound violation: {}", stage, v);
            }
            self.report.snapshots.push(StageSnapshot {
                stage,
                depth,
                head: pt.head(self.head_len).to_vec(),
                values,
                violation,
            });
            Ok(())
        }
    }

    /// Gradient engine that decrypts and bound-checks every stage.
    pub struct InstrumentedGradientEngine<'a, B: HeBackend> {
        engine: GradientEngine<'a, B>,
        secret: &'a B::SecretKey,
        tolerance: f64,
    }

    impl<'a, B: HeBackend> InstrumentedGradientEngine<'a, B> {
        pub fn new(engine: GradientEngine<'a, B>, secret: &'a B::SecretKey) -> Self {
            Self {
                engine,
                secret,
                tolerance: DEFAULT_TOLERANCE,
            }
        }

        pub fn with_tolerance(mut self, tolerance: f64) -> Self {
            self.tolerance = tolerance;
            self
        }

        pub fn engine(&self) -> &GradientEngine<'a, B> {
            &self.engine
        }

        /// Same result as [`GradientEngine::calculate_gradient`], plus a
        /// report of every decrypted intermediate.
        pub fn calculate_gradient(
            &self,
            ct_x: &B::Ciphertext,
            ct_neg_xt: &B::Ciphertext,
            ct_labels: &B::Ciphertext,
            ct_thetas: &B::Ciphertext,
        ) -> Result<(B::Ciphertext, DebugReport)> {
            let backend = self.engine.backend();
            let layout = *self.engine.layout();

            // |g_j| = |Σ_i x_ij (p_i − y_i)| ≤ n · max|x|
            let features = backend.decrypt(ct_x, self.secret)?;
            let max_abs = features.slots().iter().fold(0.0f64, |m, v| m.max(v.abs()));
            let mut recorder = Recorder {
                backend,
                secret: self.secret,
                layout,
                head_len: self.engine.config().debug_plaintext_length,
                tolerance: self.tolerance,
                gradient_bound: layout.rows() as f64 * max_abs,
                report: DebugReport::default(),
            };
            let gradient = self
                .engine
                .run(ct_x, ct_neg_xt, ct_labels, ct_thetas, &mut recorder)?;
            Ok((gradient, recorder.report))
        }
    }
}
