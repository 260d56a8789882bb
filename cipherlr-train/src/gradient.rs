//! Encrypted logistic-regression gradient.
//!
//! ```text
//!   u = α·Xθ + β            row_dot with mask scale α, then add_scalar β
//!   p = σ̃(u)                Chebyshev series on [−1, 1]
//!   r = y − p
//!   g = column_dot(−X, r)   = Xᵗ(σ(Xθ) − y)
//! ```
//!
//! The gradient comes back un-normalized and replicated in every row, the
//! same layout as θ, so the caller can apply `θ − (η/n)·g` directly.
//!
//! [`GradientEngine`] never holds secret key material. Decrypting
//! intermediates is the job of the instrumented engine in
//! [`crate::instrument`], which only exists in test and
//! `debug-instrumentation` builds.

use std::fmt;

use cipherlr_ckks::HeBackend;
use log::debug;

use crate::config::GradientConfig;
use crate::error::{Result, TrainError};
use crate::linalg::{column_dot, ensure_depth, row_dot, Axis, MatKeys};
use crate::matrix::PackingLayout;
use crate::sigmoid::ChebyshevSeries;

/// Depth of the logit row product (multiply + mask).
const ROW_DOT_DEPTH: i32 = 2;
/// Depth of the final column product.
const COLUMN_DOT_DEPTH: i32 = 1;

/// Pipeline stage at which an intermediate is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// u = αXθ + β, expected inside [−1, 1].
    NormalizedLogits,
    /// σ̃(u)
    Activations,
    /// y − σ̃(u)
    Residuals,
    Gradient,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::NormalizedLogits => "normalized logits",
            Stage::Activations => "activations",
            Stage::Residuals => "residuals",
            Stage::Gradient => "gradient",
        };
        f.write_str(name)
    }
}

/// Observer of intermediate ciphertexts. Production runs use a no-op.
pub(crate) trait Probe<B: HeBackend> {
    fn observe(&mut self, stage: Stage, ct: &B::Ciphertext) -> Result<()>;
}

struct Silent;

impl<B: HeBackend> Probe<B> for Silent {
    fn observe(&mut self, _stage: Stage, _ct: &B::Ciphertext) -> Result<()> {
        Ok(())
    }
}

pub struct GradientEngine<'a, B: HeBackend> {
    backend: &'a B,
    public: &'a B::PublicKey,
    layout: PackingLayout,
    row_keys: &'a MatKeys<B>,
    col_keys: &'a MatKeys<B>,
    config: GradientConfig,
    series: ChebyshevSeries,
}

impl<'a, B: HeBackend> GradientEngine<'a, B> {
    pub fn new(
        backend: &'a B,
        public: &'a B::PublicKey,
        layout: PackingLayout,
        row_keys: &'a MatKeys<B>,
        col_keys: &'a MatKeys<B>,
        config: GradientConfig,
    ) -> Result<Self> {
        config.validate()?;
        if row_keys.axis() != Axis::Row {
            return Err(TrainError::KeySetMismatch {
                expected: Axis::Row,
                actual: row_keys.axis(),
            });
        }
        if col_keys.axis() != Axis::Column {
            return Err(TrainError::KeySetMismatch {
                expected: Axis::Column,
                actual: col_keys.axis(),
            });
        }
        if layout.slots() != backend.slot_count() {
            return Err(TrainError::DimensionMismatch {
                context: "gradient engine: layout slots",
                expected: backend.slot_count(),
                actual: layout.slots(),
            });
        }
        let series = ChebyshevSeries::sigmoid(
            config.cheb_range_start,
            config.cheb_range_end,
            config.cheb_poly_degree,
        )?;
        Ok(Self {
            backend,
            public,
            layout,
            row_keys,
            col_keys,
            config,
            series,
        })
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn public_key(&self) -> &'a B::PublicKey {
        self.public
    }

    pub fn layout(&self) -> &PackingLayout {
        &self.layout
    }

    pub fn config(&self) -> &GradientConfig {
        &self.config
    }

    pub fn series(&self) -> &ChebyshevSeries {
        &self.series
    }

    /// Depth `ct_x` and `ct_thetas` must have for one gradient.
    pub fn required_depth(&self) -> i32 {
        ROW_DOT_DEPTH + self.series.depth() + COLUMN_DOT_DEPTH
    }

    /// Xᵗ(σ(Xθ) − y), replicated across rows like θ.
    ///
    /// `ct_neg_xt` is −X in the feature layout. Fails with
    /// `InsufficientDepth` before any homomorphic work when an operand
    /// cannot absorb the pipeline.
    pub fn calculate_gradient(
        &self,
        ct_x: &B::Ciphertext,
        ct_neg_xt: &B::Ciphertext,
        ct_labels: &B::Ciphertext,
        ct_thetas: &B::Ciphertext,
    ) -> Result<B::Ciphertext> {
        self.run(ct_x, ct_neg_xt, ct_labels, ct_thetas, &mut Silent)
    }

    pub(crate) fn run<P: Probe<B>>(
        &self,
        ct_x: &B::Ciphertext,
        ct_neg_xt: &B::Ciphertext,
        ct_labels: &B::Ciphertext,
        ct_thetas: &B::Ciphertext,
        probe: &mut P,
    ) -> Result<B::Ciphertext> {
        let backend = self.backend;
        let required = self.required_depth();
        ensure_depth(backend, ct_x, required, "gradient: features")?;
        ensure_depth(backend, ct_thetas, required, "gradient: weights")?;
        ensure_depth(backend, ct_neg_xt, COLUMN_DOT_DEPTH, "gradient: negated transpose")?;
        ensure_depth(backend, ct_labels, 0, "gradient: labels")?;
        debug!(
            "gradient: {}x{} samples, depth x={} θ={}, pipeline needs {}",
            self.layout.rows(),
            self.layout.cols(),
            backend.depth(ct_x),
            backend.depth(ct_thetas),
            required
        );

        let (alpha, beta) = self.series.normalization();
        let scaled = row_dot(
            backend,
            self.public,
            &self.layout,
            ct_x,
            ct_thetas,
            self.row_keys,
            alpha,
        )?;
        let logits = backend.add_scalar(&scaled, beta)?;
        probe.observe(Stage::NormalizedLogits, &logits)?;

        let activations = self
            .series
            .evaluate_normalized(backend, self.public, &logits)?;
        probe.observe(Stage::Activations, &activations)?;

        let residuals = backend.sub(ct_labels, &activations)?;
        probe.observe(Stage::Residuals, &residuals)?;

        let gradient = column_dot(
            backend,
            self.public,
            &self.layout,
            ct_neg_xt,
            &residuals,
            self.col_keys,
        )?;
        probe.observe(Stage::Gradient, &gradient)?;

        debug!("gradient: done, remaining depth {}", backend.depth(&gradient));
        Ok(gradient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{initialize_log_reg, Mat};
    use crate::metrics::{approximate_gradient, plaintext_gradient};
    use cipherlr_ckks::{KeyPair, MockBackend, MockCiphertext};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_rng() -> StdRng {
        StdRng::seed_from_u64(3)
    }

    struct Session {
        backend: MockBackend,
        keys: KeyPair<MockBackend>,
        layout: PackingLayout,
        row: MatKeys<MockBackend>,
        col: MatKeys<MockBackend>,
    }

    fn session(x: &Mat, depth: usize) -> Session {
        let mut rng = test_rng();
        let backend = MockBackend::new(256, depth).unwrap();
        let keys = backend.keygen(&mut rng);
        let layout = PackingLayout::for_matrix(x, backend.slot_count()).unwrap();
        let row = MatKeys::generate(&backend, &keys.secret, &layout, Axis::Row, &mut rng);
        let col = MatKeys::generate(&backend, &keys.secret, &layout, Axis::Column, &mut rng);
        Session {
            backend,
            keys,
            layout,
            row,
            col,
        }
    }

    fn encrypt(s: &Session, slots: Vec<f64>) -> MockCiphertext {
        s.backend
            .encrypt(&s.backend.encode(&slots).unwrap(), &s.keys.public, &mut test_rng())
            .unwrap()
    }

    fn scenario() -> (Mat, Mat) {
        (
            array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0], [0.0, 0.0]],
            array![[1.0], [1.0], [1.0], [0.0]],
        )
    }

    #[test]
    fn matches_plaintext_gradient_on_scenario() {
        let (x, y) = scenario();
        let theta = initialize_log_reg(&x, &y, 0.1).unwrap();
        let s = session(&x, 16);
        let engine = GradientEngine::new(
            &s.backend,
            &s.keys.public,
            s.layout,
            &s.row,
            &s.col,
            GradientConfig::default(),
        )
        .unwrap();
        assert_eq!(engine.required_depth(), 9);

        let g = engine
            .calculate_gradient(
                &encrypt(&s, s.layout.pack_matrix(&x).unwrap()),
                &encrypt(&s, s.layout.pack_negated_transpose(&x).unwrap()),
                &encrypt(&s, s.layout.pack_row_replicated(&y).unwrap()),
                &encrypt(&s, s.layout.pack_column_replicated(&theta).unwrap()),
            )
            .unwrap();
        assert_eq!(s.backend.depth(&g), 16 - 9);

        let got = s.layout.unpack_column_replicated(&g.slots).unwrap();
        let exact = plaintext_gradient(&theta, &x, &y).unwrap();
        let approx = approximate_gradient(&theta, &x, &y, engine.series()).unwrap();
        for j in 0..2 {
            assert!((got[[j, 0]] - exact[[j, 0]]).abs() < 1e-2);
            assert!((got[[j, 0]] - approx[[j, 0]]).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_shallow_weights_before_computing() {
        let (x, y) = scenario();
        let theta = initialize_log_reg(&x, &y, 0.1).unwrap();
        let s = session(&x, 8);
        let engine = GradientEngine::new(
            &s.backend,
            &s.keys.public,
            s.layout,
            &s.row,
            &s.col,
            GradientConfig::default(),
        )
        .unwrap();
        let ct_x = encrypt(&s, s.layout.pack_matrix(&x).unwrap());
        let ct_t = encrypt(&s, s.layout.pack_column_replicated(&theta).unwrap());
        let err = engine
            .calculate_gradient(&ct_x, &ct_x, &ct_x, &ct_t)
            .unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientDepth {
                required: 9,
                available: 8,
                ..
            }
        ));
    }

    #[test]
    fn rejects_swapped_key_sets() {
        let (x, _) = scenario();
        let s = session(&x, 16);
        let swapped = GradientEngine::new(
            &s.backend,
            &s.keys.public,
            s.layout,
            &s.col,
            &s.row,
            GradientConfig::default(),
        );
        assert!(matches!(
            swapped,
            Err(TrainError::KeySetMismatch {
                expected: Axis::Row,
                actual: Axis::Column
            })
        ));
    }

    #[test]
    fn lower_degree_needs_less_depth() {
        let (x, _) = scenario();
        let s = session(&x, 16);
        let config = GradientConfig {
            cheb_poly_degree: 15,
            cheb_range_start: -8.0,
            cheb_range_end: 8.0,
            ..GradientConfig::default()
        };
        let engine =
            GradientEngine::new(&s.backend, &s.keys.public, s.layout, &s.row, &s.col, config)
                .unwrap();
        assert_eq!(engine.required_depth(), 8);
    }
}
