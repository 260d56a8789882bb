//! Slot packing via the canonical embedding.
//!
//! N/2 real values are encoded into one polynomial through the isomorphism
//! R[X]/(X^N+1) ≅ C^{N/2}. Slots are Galois-aligned: slot i sits at the
//! root ψ^{5^i}, so the automorphism X → X^5 shifts every slot left by one.
//!
//! Encode: place values and their conjugates, inverse FFT, untwist by ψ^-j,
//! scale and round. Decode runs the same steps backwards.

use std::f64::consts::PI;

use super::params::{GALOIS_GEN, N, NUM_SLOTS};
use crate::error::{CryptoError, Result};

#[derive(Clone, Copy, Debug)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    fn from_angle(theta: f64) -> Self {
        Self {
            re: theta.cos(),
            im: theta.sin(),
        }
    }

    fn add(self, o: Self) -> Self {
        Self {
            re: self.re + o.re,
            im: self.im + o.im,
        }
    }

    fn sub(self, o: Self) -> Self {
        Self {
            re: self.re - o.re,
            im: self.im - o.im,
        }
    }

    fn mul(self, o: Self) -> Self {
        Self {
            re: self.re * o.re - self.im * o.im,
            im: self.re * o.im + self.im * o.re,
        }
    }

    fn conj(self) -> Self {
        Self {
            re: self.re,
            im: -self.im,
        }
    }
}

/// Precomputed slot permutation and twist factors.
#[derive(Clone, Debug)]
pub struct SlotEncoder {
    /// FFT position of each slot.
    slot_to_fft: Vec<usize>,
    /// ψ^j with ψ = e^{iπ/N}.
    twist: Vec<Complex>,
}

impl Default for SlotEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotEncoder {
    pub fn new() -> Self {
        let two_n = 2 * N as u64;
        let mut slot_to_fft = Vec::with_capacity(NUM_SLOTS);
        let mut root = 1u64;
        for _ in 0..NUM_SLOTS {
            slot_to_fft.push(((root - 1) / 2) as usize);
            root = root * GALOIS_GEN % two_n;
        }
        let twist = (0..N)
            .map(|j| Complex::from_angle(j as f64 * PI / N as f64))
            .collect();
        Self { slot_to_fft, twist }
    }

    /// Encode up to NUM_SLOTS values as integer coefficients at `scale`.
    pub fn encode(&self, values: &[f64], scale: f64) -> Result<Vec<i64>> {
        if values.len() > NUM_SLOTS {
            return Err(CryptoError::SlotOverflow {
                len: values.len(),
                slots: NUM_SLOTS,
            });
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(CryptoError::InvalidParameters(format!(
                "encoding scale must be finite and positive, got {}",
                scale
            )));
        }

        let mut z = vec![Complex::ZERO; N];
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(CryptoError::EncodingOverflow { value: v, scale });
            }
            let pos = self.slot_to_fft[i];
            z[pos] = Complex { re: v, im: 0.0 };
            z[N - 1 - pos] = Complex { re: v, im: 0.0 };
        }

        ifft(&mut z);

        let limit = i64::MAX as f64 / 2.0;
        z.iter()
            .zip(&self.twist)
            .map(|(c, psi)| {
                let coeff = c.mul(psi.conj()).re * scale;
                if coeff.abs() >= limit {
                    Err(CryptoError::EncodingOverflow {
                        value: coeff / scale,
                        scale,
                    })
                } else {
                    Ok(coeff.round() as i64)
                }
            })
            .collect()
    }

    /// Decode all NUM_SLOTS slot values from coefficients at `scale`.
    pub fn decode(&self, coeffs: &[i64], scale: f64) -> Vec<f64> {
        let mut b: Vec<Complex> = self
            .twist
            .iter()
            .enumerate()
            .map(|(j, psi)| {
                let v = coeffs.get(j).map_or(0.0, |&c| c as f64 / scale);
                Complex { re: v * psi.re, im: v * psi.im }
            })
            .collect();
        fft(&mut b);
        self.slot_to_fft.iter().map(|&pos| b[pos].re).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Radix-2 FFT
// ═══════════════════════════════════════════════════════════════════════

/// In place: Z_k = Σ_j X_j · e^{2πijk/n}.
fn fft(a: &mut [Complex]) {
    let n = a.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            a.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let step = Complex::from_angle(2.0 * PI / len as f64);
        for start in (0..n).step_by(len) {
            let mut w = Complex { re: 1.0, im: 0.0 };
            for k in 0..half {
                let u = a[start + k];
                let t = a[start + k + half].mul(w);
                a[start + k] = u.add(t);
                a[start + k + half] = u.sub(t);
                w = w.mul(step);
            }
        }
        len <<= 1;
    }
}

fn ifft(a: &mut [Complex]) {
    for x in a.iter_mut() {
        *x = x.conj();
    }
    fft(a);
    let inv_n = 1.0 / a.len() as f64;
    for x in a.iter_mut() {
        let c = x.conj();
        *x = Complex {
            re: c.re * inv_n,
            im: c.im * inv_n,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: f64 = (1u64 << 36) as f64;

    #[test]
    fn roundtrip_all_slots() {
        let enc = SlotEncoder::new();
        let values: Vec<f64> = (0..NUM_SLOTS).map(|i| (i as f64 * 0.1).sin() * 5.0).collect();
        let decoded = enc.decode(&enc.encode(&values, SCALE).unwrap(), SCALE);
        let max_err = values
            .iter()
            .zip(&decoded)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);
        assert!(max_err < 1e-6, "max error {}", max_err);
    }

    #[test]
    fn coefficient_addition_is_slot_addition() {
        let enc = SlotEncoder::new();
        let a = enc.encode(&[1.0, 2.0, 3.0], SCALE).unwrap();
        let b = enc.encode(&[10.0, 20.0, 30.0], SCALE).unwrap();
        let sum: Vec<i64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        let decoded = enc.decode(&sum, SCALE);
        for (got, want) in decoded.iter().zip([11.0, 22.0, 33.0, 0.0]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn constant_coefficient_fills_every_slot() {
        let enc = SlotEncoder::new();
        let mut coeffs = vec![0i64; N];
        coeffs[0] = (2.5 * SCALE) as i64;
        assert!(enc.decode(&coeffs, SCALE).iter().all(|v| (v - 2.5).abs() < 1e-9));
    }

    #[test]
    fn rejects_bad_input() {
        let enc = SlotEncoder::new();
        assert!(enc.encode(&vec![0.0; NUM_SLOTS + 1], SCALE).is_err());
        assert!(enc.encode(&[1.0], 0.0).is_err());
        assert!(enc.encode(&[f64::NAN], SCALE).is_err());
        assert!(enc.encode(&[1.0e12], SCALE).is_err());
    }
}
