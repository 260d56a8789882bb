//! Gradient descent over encrypted weights.
//!
//! Each step needs `required_depth() + 1` levels on θ: the gradient
//! pipeline plus the learning-rate product. When θ runs short the trainer
//! asks a [`Refresher`] for a fresh ciphertext before continuing.

use cipherlr_ckks::HeBackend;
use log::info;

use crate::error::{Result, TrainError};
use crate::gradient::GradientEngine;
use crate::linalg::ensure_depth;
use crate::matrix::Mat;
use crate::metrics::{approximate_gradient, plaintext_gradient};
use crate::owner::EncryptedDataset;
use crate::sigmoid::ChebyshevSeries;

/// Restores the depth of a ciphertext: bootstrapping in a full scheme,
/// re-encryption by the data owner here.
pub trait Refresher<B: HeBackend> {
    fn refresh(&self, ct: &B::Ciphertext) -> Result<B::Ciphertext>;
}

pub struct EncryptedTrainer<'a, B: HeBackend> {
    engine: GradientEngine<'a, B>,
    learning_rate: f64,
}

impl<'a, B: HeBackend> EncryptedTrainer<'a, B> {
    pub fn new(engine: GradientEngine<'a, B>, learning_rate: f64) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(TrainError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        Ok(Self {
            engine,
            learning_rate,
        })
    }

    pub fn engine(&self) -> &GradientEngine<'a, B> {
        &self.engine
    }

    /// Levels one step consumes from θ.
    pub fn step_depth(&self) -> i32 {
        self.engine.required_depth() + 1
    }

    /// θ ← θ − (η/n)·Xᵗ(σ(Xθ) − y)
    pub fn step(
        &self,
        data: &EncryptedDataset<B>,
        theta: &B::Ciphertext,
        refresher: &impl Refresher<B>,
    ) -> Result<B::Ciphertext> {
        let backend = self.engine.backend();
        let needed = self.step_depth();
        let theta = if backend.depth(theta) < needed {
            refresher.refresh(theta)?
        } else {
            theta.clone()
        };
        ensure_depth(backend, &theta, needed, "training step")?;

        let gradient =
            self.engine
                .calculate_gradient(&data.x, &data.neg_xt, &data.labels, &theta)?;
        let rate = self.learning_rate / data.layout.rows() as f64;
        let update = backend.mul_scalar(&gradient, rate)?;
        Ok(backend.sub(&theta, &update)?)
    }

    pub fn fit(
        &self,
        data: &EncryptedDataset<B>,
        theta: &B::Ciphertext,
        epochs: usize,
        refresher: &impl Refresher<B>,
    ) -> Result<B::Ciphertext> {
        let backend = self.engine.backend();
        let mut theta = theta.clone();
        for epoch in 1..=epochs {
            theta = self.step(data, &theta, refresher)?;
            info!(
                "epoch {}/{}: remaining depth {}",
                epoch,
                epochs,
                backend.depth(&theta)
            );
        }
        Ok(theta)
    }
}

/// Reference trajectory in the clear. With `approx` set, the sigmoid is
/// replaced by the same Chebyshev series the encrypted engine uses.
pub fn train_plaintext(
    x: &Mat,
    y: &Mat,
    theta0: &Mat,
    learning_rate: f64,
    epochs: usize,
    approx: Option<&ChebyshevSeries>,
) -> Result<Mat> {
    let rate = learning_rate / x.nrows().max(1) as f64;
    let mut theta = theta0.clone();
    for _ in 0..epochs {
        let gradient = match approx {
            Some(series) => approximate_gradient(&theta, x, y, series)?,
            None => plaintext_gradient(&theta, x, y)?,
        };
        theta = theta - gradient * rate;
    }
    Ok(theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compute_loss;
    use ndarray::array;

    #[test]
    fn plaintext_descent_reduces_loss() {
        let x = array![[1.0, 2.0], [1.0, -1.0], [1.0, 3.0], [1.0, -2.0]];
        let y = array![[1.0], [0.0], [1.0], [0.0]];
        let theta0 = Mat::zeros((2, 1));
        let start = compute_loss(&theta0, &x, &y).unwrap();
        let trained = train_plaintext(&x, &y, &theta0, 1.0, 20, None).unwrap();
        assert!(compute_loss(&trained, &x, &y).unwrap() < start);
        assert!(trained[[1, 0]] > 0.0);
    }

    #[test]
    fn approximate_trajectory_tracks_exact() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0], [0.0, 0.0]];
        let y = array![[1.0], [1.0], [1.0], [0.0]];
        let theta0 = array![[0.1], [0.1]];
        let series = ChebyshevSeries::sigmoid(-16.0, 16.0, 59).unwrap();
        let exact = train_plaintext(&x, &y, &theta0, 0.5, 5, None).unwrap();
        let approx = train_plaintext(&x, &y, &theta0, 0.5, 5, Some(&series)).unwrap();
        for (a, b) in exact.iter().zip(approx.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
