//! Chebyshev approximation of the logistic function.
//!
//! The sigmoid has no ciphertext operation, so it is replaced by its
//! Chebyshev interpolant on a configured interval [a, b]:
//!
//! ```text
//!   σ(z) ≈ Σ cᵢ·Tᵢ(u),   u = αz + β,   α = 2/(b−a),   β = −(a+b)/(b−a)
//! ```
//!
//! Homomorphic evaluation uses a baby-step/giant-step split over the
//! Chebyshev basis. Baby steps T₁…T_k (k ≈ √(degree+1), a power of two) and
//! giant steps T_{k·2^t} come from the product rules
//!
//! ```text
//!   T₂ₙ   = 2Tₙ² − 1
//!   T₂ₙ₊₁ = 2Tₙ₊₁Tₙ − T₁
//! ```
//!
//! so Tᵢ costs ⌈log₂ i⌉ levels. The series is split recursively as
//! p = q·T_M + r by Chebyshev long division. Degree 59 on 60 coefficients
//! costs 6 levels, the minimum for that degree.
//!
//! Inputs outside [a, b] evaluate without error but the polynomial diverges
//! quickly there. The instrumented gradient engine checks for this.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use cipherlr_ckks::HeBackend;
use log::trace;

use crate::error::{Result, TrainError};

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// A truncated Chebyshev series on [start, end].
#[derive(Clone, Debug, PartialEq)]
pub struct ChebyshevSeries {
    coeffs: Vec<f64>,
    start: f64,
    end: f64,
}

impl ChebyshevSeries {
    /// Interpolate the logistic function at `degree + 1` Chebyshev nodes.
    pub fn sigmoid(start: f64, end: f64, degree: usize) -> Result<Self> {
        Self::fit(sigmoid, start, end, degree)
    }

    /// Interpolate `f` at the `degree + 1` Chebyshev nodes of the first kind.
    pub fn fit(f: impl Fn(f64) -> f64, start: f64, end: f64, degree: usize) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) || start >= end {
            return Err(TrainError::InvalidConfig(format!(
                "invalid Chebyshev interval [{}, {}]",
                start, end
            )));
        }
        if degree == 0 {
            return Err(TrainError::InvalidConfig(
                "Chebyshev degree must be at least 1".into(),
            ));
        }

        let n = degree + 1;
        let half_width = 0.5 * (end - start);
        let mid = 0.5 * (end + start);
        let samples: Vec<f64> = (0..n)
            .map(|k| {
                let node = (PI * (k as f64 + 0.5) / n as f64).cos();
                f(half_width * node + mid)
            })
            .collect();

        let coeffs = (0..n)
            .map(|j| {
                let sum: f64 = samples
                    .iter()
                    .enumerate()
                    .map(|(k, fk)| fk * (PI * j as f64 * (k as f64 + 0.5) / n as f64).cos())
                    .sum();
                let c = 2.0 * sum / n as f64;
                if j == 0 {
                    0.5 * c
                } else {
                    c
                }
            })
            .collect();

        Ok(Self { coeffs, start, end })
    }

    /// Coefficients c₀…c_d of Σ cᵢ·Tᵢ(u).
    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    pub fn range(&self) -> (f64, f64) {
        (self.start, self.end)
    }

    /// (α, β) with u = αz + β mapping [start, end] onto [−1, 1].
    pub fn normalization(&self) -> (f64, f64) {
        let width = self.end - self.start;
        (2.0 / width, -(self.start + self.end) / width)
    }

    pub fn normalize(&self, z: f64) -> f64 {
        let (alpha, beta) = self.normalization();
        alpha * z + beta
    }

    /// Evaluate at `z` in the original domain.
    pub fn eval(&self, z: f64) -> f64 {
        self.eval_normalized(self.normalize(z))
    }

    /// Clenshaw's recurrence at a normalized point.
    pub fn eval_normalized(&self, u: f64) -> f64 {
        let mut b1 = 0.0;
        let mut b2 = 0.0;
        for &c in self.coeffs[1..].iter().rev() {
            let b0 = c + 2.0 * u * b1 - b2;
            b2 = b1;
            b1 = b0;
        }
        self.coeffs[0] + u * b1 - b2
    }

    /// Largest |series − f| over `samples` evenly spaced points of the
    /// interval.
    pub fn max_error(&self, f: impl Fn(f64) -> f64, samples: usize) -> f64 {
        let steps = samples.max(2) - 1;
        (0..=steps)
            .map(|i| {
                let z = self.start + (self.end - self.start) * i as f64 / steps as f64;
                (self.eval(z) - f(z)).abs()
            })
            .fold(0.0, f64::max)
    }

    /// Baby-step count: the power of two at or above √(degree + 1).
    fn baby_steps(&self) -> usize {
        let len = self.coeffs.len();
        ((len as f64).sqrt().ceil() as usize).next_power_of_two()
    }

    /// Levels consumed by [`evaluate_normalized`](Self::evaluate_normalized).
    pub fn depth(&self) -> i32 {
        series_depth(self.coeffs.len(), self.baby_steps())
    }

    /// Evaluate on a ciphertext in the original domain. Consumes
    /// `depth() + 1` levels.
    pub fn evaluate<B: HeBackend>(
        &self,
        backend: &B,
        public: &B::PublicKey,
        ct_z: &B::Ciphertext,
    ) -> Result<B::Ciphertext> {
        let (alpha, beta) = self.normalization();
        let scaled = backend.mul_scalar(ct_z, alpha)?;
        let ct_u = backend.add_scalar(&scaled, beta)?;
        self.evaluate_normalized(backend, public, &ct_u)
    }

    /// Evaluate on a ciphertext already mapped into [−1, 1]. Consumes
    /// exactly `depth()` levels.
    pub fn evaluate_normalized<B: HeBackend>(
        &self,
        backend: &B,
        public: &B::PublicKey,
        ct_u: &B::Ciphertext,
    ) -> Result<B::Ciphertext> {
        let needed = self.depth();
        let available = backend.depth(ct_u);
        if available < needed {
            return Err(TrainError::InsufficientDepth {
                stage: "chebyshev evaluation",
                required: needed,
                available,
            });
        }
        let mut basis = ChebyshevBasis::new(backend, public, ct_u);
        let k = self.baby_steps();
        trace!(
            "chebyshev: degree {}, {} baby steps, depth {}",
            self.degree(),
            k,
            needed
        );
        evaluate_split(&mut basis, &self.coeffs, k)
    }
}

/// Tᵢ(u) ciphertexts computed on demand and memoized.
struct ChebyshevBasis<'a, B: HeBackend> {
    backend: &'a B,
    public: &'a B::PublicKey,
    terms: BTreeMap<usize, B::Ciphertext>,
}

impl<'a, B: HeBackend> ChebyshevBasis<'a, B> {
    fn new(backend: &'a B, public: &'a B::PublicKey, ct_u: &B::Ciphertext) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(1, ct_u.clone());
        Self {
            backend,
            public,
            terms,
        }
    }

    fn term(&mut self, i: usize) -> Result<B::Ciphertext> {
        if let Some(ct) = self.terms.get(&i) {
            return Ok(ct.clone());
        }
        let ct = if i % 2 == 0 {
            let half = self.term(i / 2)?;
            let square = self.backend.mul(&half, &half, self.public)?;
            let doubled = self.backend.add(&square, &square)?;
            self.backend.add_scalar(&doubled, -1.0)?
        } else {
            let n = i / 2;
            let hi = self.term(n + 1)?;
            let lo = self.term(n)?;
            let prod = self.backend.mul(&hi, &lo, self.public)?;
            let doubled = self.backend.add(&prod, &prod)?;
            let t1 = self.term(1)?;
            self.backend.sub(&doubled, &t1)?
        };
        self.terms.insert(i, ct.clone());
        Ok(ct)
    }
}

fn ceil_log2(x: usize) -> i32 {
    x.max(1).next_power_of_two().trailing_zeros() as i32
}

/// Largest k·2^t strictly below `len`.
fn giant_step(len: usize, k: usize) -> usize {
    let mut m = k;
    while 2 * m < len {
        m *= 2;
    }
    m
}

fn series_depth(len: usize, k: usize) -> i32 {
    if len <= k {
        return ceil_log2(len.saturating_sub(1)) + 1;
    }
    let m = giant_step(len, k);
    let quotient = series_depth(len - m, k).max(ceil_log2(m)) + 1;
    quotient.max(series_depth(m, k))
}

/// Chebyshev long division by T_M: returns (q, r) with p = q·T_M + r.
fn divide(coeffs: &[f64], m: usize) -> (Vec<f64>, Vec<f64>) {
    let len = coeffs.len();
    let mut quotient = Vec::with_capacity(len - m);
    quotient.push(coeffs[m]);
    quotient.extend(coeffs[m + 1..].iter().map(|c| 2.0 * c));

    let remainder = (0..m)
        .map(|i| match coeffs.get(2 * m - i) {
            Some(folded) if i > 0 => coeffs[i] - folded,
            _ => coeffs[i],
        })
        .collect();
    (quotient, remainder)
}

fn evaluate_split<B: HeBackend>(
    basis: &mut ChebyshevBasis<'_, B>,
    coeffs: &[f64],
    k: usize,
) -> Result<B::Ciphertext> {
    if coeffs.len() <= k {
        return evaluate_base(basis, coeffs);
    }
    let m = giant_step(coeffs.len(), k);
    let (quotient, remainder) = divide(coeffs, m);

    let q = evaluate_split(basis, &quotient, k)?;
    let giant = basis.term(m)?;
    let high = basis.backend.mul(&q, &giant, basis.public)?;
    let low = evaluate_split(basis, &remainder, k)?;
    Ok(basis.backend.add(&high, &low)?)
}

/// c₀ + Σ cᵢ·Tᵢ for a series short enough to use baby steps only.
fn evaluate_base<B: HeBackend>(
    basis: &mut ChebyshevBasis<'_, B>,
    coeffs: &[f64],
) -> Result<B::Ciphertext> {
    let backend = basis.backend;
    // A constant still goes through one scalar product so every branch
    // lands on the level the depth plan expects.
    let first = coeffs.get(1).copied().unwrap_or(0.0);
    let mut acc = backend.mul_scalar(&basis.term(1)?, first)?;
    for (i, &c) in coeffs.iter().enumerate().skip(2) {
        let term = backend.mul_scalar(&basis.term(i)?, c)?;
        acc = backend.add(&acc, &term)?;
    }
    Ok(backend.add_scalar(&acc, coeffs[0])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use cipherlr_ckks::{MockBackend, MockCiphertext, MockPublicKey};

    fn encrypt_mock(values: Vec<f64>, depth: i32) -> MockCiphertext {
        MockCiphertext {
            slots: values,
            depth,
        }
    }

    fn grid(n: usize, lo: f64, hi: f64) -> Vec<f64> {
        (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect()
    }

    #[test]
    fn logistic_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-800.0) >= 0.0);
        assert_eq!(sigmoid(800.0), 1.0);
        assert_abs_diff_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn interpolant_is_exact_on_polynomials() {
        // x³ − x on [−2, 3] is reproduced exactly by a cubic fit.
        let series = ChebyshevSeries::fit(|x| x * x * x - x, -2.0, 3.0, 3).unwrap();
        for z in grid(11, -2.0, 3.0) {
            assert_abs_diff_eq!(series.eval(z), z * z * z - z, epsilon = 1e-10);
        }
    }

    #[test]
    fn default_sigmoid_fit_is_accurate() {
        let series = ChebyshevSeries::sigmoid(-16.0, 16.0, 59).unwrap();
        assert_eq!(series.degree(), 59);
        assert!(series.max_error(sigmoid, 2001) < 1e-4);

        let coarse = ChebyshevSeries::sigmoid(-16.0, 16.0, 7).unwrap();
        assert!(coarse.max_error(sigmoid, 2001) > series.max_error(sigmoid, 2001));
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(ChebyshevSeries::sigmoid(1.0, 1.0, 5).is_err());
        assert!(ChebyshevSeries::sigmoid(2.0, -2.0, 5).is_err());
        assert!(ChebyshevSeries::sigmoid(f64::NEG_INFINITY, 2.0, 5).is_err());
        assert!(ChebyshevSeries::sigmoid(-2.0, 2.0, 0).is_err());
    }

    #[test]
    fn normalization_maps_interval_to_unit() {
        let series = ChebyshevSeries::sigmoid(-4.0, 12.0, 5).unwrap();
        assert_abs_diff_eq!(series.normalize(-4.0), -1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(series.normalize(12.0), 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(series.normalize(4.0), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn division_reconstructs_series() {
        let coeffs: Vec<f64> = (0..13).map(|i| 1.0 / (i as f64 + 1.0)).collect();
        let (q, r) = divide(&coeffs, 8);
        let series = |c: &[f64], u: f64| {
            ChebyshevSeries {
                coeffs: c.to_vec(),
                start: -1.0,
                end: 1.0,
            }
            .eval_normalized(u)
        };
        for u in grid(9, -1.0, 1.0) {
            let t8 = (8.0 * u.acos()).cos();
            assert_abs_diff_eq!(
                series(&q, u) * t8 + series(&r, u),
                series(&coeffs, u),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn depth_plan() {
        let cases = [(1, 1), (2, 2), (3, 2), (7, 4), (15, 5), (31, 6), (59, 6), (63, 7)];
        for (degree, depth) in cases {
            let series = ChebyshevSeries::sigmoid(-8.0, 8.0, degree).unwrap();
            assert_eq!(series.depth(), depth, "degree {}", degree);
        }
    }

    #[test]
    fn homomorphic_evaluation_matches_clenshaw() {
        let backend = MockBackend::new(64, 16).unwrap();
        let us = grid(64, -1.0, 1.0);
        for degree in [1, 2, 5, 8, 15, 27, 59] {
            let series = ChebyshevSeries::sigmoid(-16.0, 16.0, degree).unwrap();
            let ct = encrypt_mock(us.clone(), 16);
            let out = series
                .evaluate_normalized(&backend, &MockPublicKey, &ct)
                .unwrap();
            assert_eq!(16 - out.depth, series.depth(), "degree {}", degree);
            for (u, got) in us.iter().zip(&out.slots) {
                assert_abs_diff_eq!(*got, series.eval_normalized(*u), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn evaluate_applies_the_affine_map() {
        let backend = MockBackend::new(16, 10).unwrap();
        let series = ChebyshevSeries::sigmoid(-6.0, 10.0, 15).unwrap();
        let zs = grid(16, -6.0, 10.0);
        let out = series
            .evaluate(&backend, &MockPublicKey, &encrypt_mock(zs.clone(), 10))
            .unwrap();
        assert_eq!(10 - out.depth, series.depth() + 1);
        for (z, got) in zs.iter().zip(&out.slots) {
            assert_abs_diff_eq!(*got, series.eval(*z), epsilon = 1e-9);
            assert_abs_diff_eq!(*got, sigmoid(*z), epsilon = 5e-3);
        }
    }

    #[test]
    fn refuses_shallow_input() {
        let backend = MockBackend::new(16, 16).unwrap();
        let series = ChebyshevSeries::sigmoid(-16.0, 16.0, 59).unwrap();
        let err = series
            .evaluate_normalized(&backend, &MockPublicKey, &encrypt_mock(vec![0.0; 16], 5))
            .unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientDepth {
                required: 6,
                available: 5,
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_inputs_diverge_silently() {
        let series = ChebyshevSeries::sigmoid(-4.0, 4.0, 31).unwrap();
        assert!((series.eval(40.0) - 1.0).abs() > 1.0);
    }
}
