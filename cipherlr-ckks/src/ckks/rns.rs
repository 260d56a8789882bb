//! Residue Number System polynomials.
//!
//! An `RnsPoly` with `k` active primes represents an element of
//! Z_Q[X]/(X^N+1) with Q = q_0 · q_1 · … · q_{k-1}, stored as one residue
//! vector per prime. Ring operations run channel by channel; only
//! decryption and key-switch digit extraction reconstruct full integers
//! (Garner's algorithm over little-endian u64 limbs).

use serde::{Deserialize, Serialize};

use super::ntt::{mod_inv, mul_mod, reduce, NttContext, NTT_PRIMES};
use super::params::N;

// ═══════════════════════════════════════════════════════════════════════
// RNS Polynomial
// ═══════════════════════════════════════════════════════════════════════

/// `residues[i][j]` is coefficient j modulo `NTT_PRIMES[i]`, in [0, q_i).
///
/// Whether the residues are coefficients or NTT evaluations is up to the
/// owner; key-switching keys are stored in the evaluation domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnsPoly {
    pub residues: Vec<Vec<i64>>,
}

impl RnsPoly {
    pub fn zero(num_primes: usize) -> Self {
        Self {
            residues: vec![vec![0i64; N]; num_primes],
        }
    }

    /// Reduce signed coefficients (at most N of them) into every channel.
    pub fn from_coeffs(coeffs: &[i64], num_primes: usize) -> Self {
        debug_assert!(coeffs.len() <= N);
        let residues = NTT_PRIMES[..num_primes]
            .iter()
            .map(|&q| {
                let mut res = vec![0i64; N];
                for (r, &c) in res.iter_mut().zip(coeffs) {
                    *r = reduce(c, q);
                }
                res
            })
            .collect();
        Self { residues }
    }

    pub fn num_primes(&self) -> usize {
        self.residues.len()
    }

    /// Centered coefficients via CRT. Values must lie within ±2^63.
    pub fn to_coeffs(&self) -> Vec<i64> {
        let crt = Crt::new(self.num_primes());
        let mut column = vec![0i64; self.num_primes()];
        (0..N)
            .map(|j| {
                for (c, res) in column.iter_mut().zip(&self.residues) {
                    *c = res[j];
                }
                crt.centered(&column)
            })
            .collect()
    }

    fn zip_map(&self, other: &RnsPoly, f: impl Fn(i64, i64, i64) -> i64) -> RnsPoly {
        debug_assert_eq!(self.num_primes(), other.num_primes());
        let residues = self
            .residues
            .iter()
            .zip(&other.residues)
            .zip(NTT_PRIMES.iter())
            .map(|((a, b), &q)| a.iter().zip(b).map(|(&x, &y)| f(x, y, q)).collect())
            .collect();
        RnsPoly { residues }
    }

    pub fn add(&self, other: &RnsPoly) -> RnsPoly {
        self.zip_map(other, |a, b, q| {
            let s = a + b;
            if s >= q {
                s - q
            } else {
                s
            }
        })
    }

    pub fn sub(&self, other: &RnsPoly) -> RnsPoly {
        self.zip_map(other, |a, b, q| {
            let d = a - b;
            if d < 0 {
                d + q
            } else {
                d
            }
        })
    }

    pub fn neg(&self) -> RnsPoly {
        let residues = self
            .residues
            .iter()
            .zip(NTT_PRIMES.iter())
            .map(|(res, &q)| res.iter().map(|&a| if a == 0 { 0 } else { q - a }).collect())
            .collect();
        RnsPoly { residues }
    }

    /// Multiply by a signed integer scalar.
    pub fn scalar_mul(&self, scalar: i64) -> RnsPoly {
        let scalars: Vec<i64> = NTT_PRIMES[..self.num_primes()]
            .iter()
            .map(|&q| reduce(scalar, q))
            .collect();
        self.channel_scalar_mul(&scalars)
    }

    /// Multiply channel i by `scalars[i]` (already reduced mod q_i).
    pub fn channel_scalar_mul(&self, scalars: &[i64]) -> RnsPoly {
        let residues = self
            .residues
            .iter()
            .zip(scalars)
            .zip(NTT_PRIMES.iter())
            .map(|((res, &s), &q)| res.iter().map(|&a| mul_mod(a, s, q)).collect())
            .collect();
        RnsPoly { residues }
    }

    /// Add a signed integer to the constant coefficient.
    pub fn add_constant(&self, value: i64) -> RnsPoly {
        let mut out = self.clone();
        for (res, &q) in out.residues.iter_mut().zip(NTT_PRIMES.iter()) {
            res[0] = reduce(res[0] + reduce(value, q), q);
        }
        out
    }

    /// Negacyclic product, coefficient domain in and out.
    pub fn mul(&self, other: &RnsPoly, ntt: &[NttContext]) -> RnsPoly {
        debug_assert_eq!(self.num_primes(), other.num_primes());
        let residues = self
            .residues
            .iter()
            .zip(&other.residues)
            .zip(ntt)
            .map(|((a, b), ctx)| ctx.mul(a, b))
            .collect();
        RnsPoly { residues }
    }

    /// Forward NTT on every channel.
    pub fn to_ntt(&self, ntt: &[NttContext]) -> RnsPoly {
        let residues = self
            .residues
            .iter()
            .zip(ntt)
            .map(|(res, ctx)| ctx.forward(res))
            .collect();
        RnsPoly { residues }
    }

    /// Inverse NTT on every channel.
    pub fn from_ntt(&self, ntt: &[NttContext]) -> RnsPoly {
        let residues = self
            .residues
            .iter()
            .zip(ntt)
            .map(|(res, ctx)| ctx.inverse(res))
            .collect();
        RnsPoly { residues }
    }

    /// Keep only the first `num_primes` channels. Valid for coefficient and
    /// evaluation representations alike, as channels are independent.
    pub fn truncate(&self, num_primes: usize) -> RnsPoly {
        RnsPoly {
            residues: self.residues[..num_primes.min(self.num_primes())].to_vec(),
        }
    }

    /// Galois automorphism σ_m: X → X^m, with X^N = -1. `m` must be odd.
    pub fn apply_automorphism(&self, m: usize) -> RnsPoly {
        let two_n = 2 * N;
        debug_assert!(m % 2 == 1 && m < two_n);
        let residues = self
            .residues
            .iter()
            .zip(NTT_PRIMES.iter())
            .map(|(res, &q)| {
                let mut out = vec![0i64; N];
                for (j, &a) in res.iter().enumerate() {
                    let idx = (m * j) % two_n;
                    if idx < N {
                        out[idx] = a;
                    } else {
                        out[idx - N] = if a == 0 { 0 } else { q - a };
                    }
                }
                out
            })
            .collect();
        RnsPoly { residues }
    }

    /// Divide by the last prime and drop its channel (the CKKS rescale).
    ///
    /// Computes (x - r_L) · q_L^(-1) mod q_i with r_L the centered residue
    /// modulo q_L, so the division rounds to nearest.
    pub fn drop_last_prime(&self) -> RnsPoly {
        let last = self.num_primes() - 1;
        let q_last = NTT_PRIMES[last];
        let half = q_last / 2;
        let residues = (0..last)
            .map(|i| {
                let q_i = NTT_PRIMES[i];
                let inv = mod_inv(reduce(q_last, q_i), q_i);
                self.residues[i]
                    .iter()
                    .zip(&self.residues[last])
                    .map(|(&x, &r)| {
                        let r_centered = if r > half { r - q_last } else { r };
                        let diff = reduce(x - reduce(r_centered, q_i), q_i);
                        mul_mod(diff, inv, q_i)
                    })
                    .collect()
            })
            .collect();
        RnsPoly { residues }
    }

    /// Base-2^bits digit decomposition of the coefficients, viewed as
    /// integers in [0, Q). Digit polynomials come back in RNS form over
    /// the same primes, with coefficients in [0, 2^bits).
    pub fn decompose(&self, bits: u32) -> Vec<RnsPoly> {
        let np = self.num_primes();
        let crt = Crt::new(np);
        let nd = num_digits(np, bits);
        let mask = (1u64 << bits) - 1;

        let mut digits = vec![vec![0i64; N]; nd];
        let mut column = vec![0i64; np];
        for j in 0..N {
            for (c, res) in column.iter_mut().zip(&self.residues) {
                *c = res[j];
            }
            let mut value = crt.unsigned(&column);
            for digit in digits.iter_mut() {
                digit[j] = (value[0] & mask) as i64;
                shr_assign(&mut value, bits);
            }
        }
        digits
            .iter()
            .map(|coeffs| RnsPoly::from_coeffs(coeffs, np))
            .collect()
    }
}

/// Number of base-2^bits digits covering the product of the first
/// `num_primes` primes.
pub fn num_digits(num_primes: usize, bits: u32) -> usize {
    let total_bits: u32 = NTT_PRIMES[..num_primes]
        .iter()
        .map(|&q| 64 - (q as u64).leading_zeros())
        .sum();
    total_bits.div_ceil(bits) as usize
}

// ═══════════════════════════════════════════════════════════════════════
// CRT Reconstruction (Garner's Algorithm)
// ═══════════════════════════════════════════════════════════════════════

/// Garner tables for a prime prefix.
struct Crt {
    primes: Vec<i64>,
    /// `inverses[i][j]` = q_j^(-1) mod q_i for j < i.
    inverses: Vec<Vec<i64>>,
    modulus: Vec<u64>,
    half_modulus: Vec<u64>,
}

impl Crt {
    fn new(num_primes: usize) -> Self {
        let primes = NTT_PRIMES[..num_primes].to_vec();
        let inverses = (0..num_primes)
            .map(|i| (0..i).map(|j| mod_inv(primes[j], primes[i])).collect())
            .collect();
        let limbs = num_primes * 36 / 64 + 2;
        let mut modulus = vec![0u64; limbs];
        modulus[0] = 1;
        for &q in &primes {
            mul_small_assign(&mut modulus, q as u64);
        }
        let mut half_modulus = modulus.clone();
        shr_assign(&mut half_modulus, 1);
        Self {
            primes,
            inverses,
            modulus,
            half_modulus,
        }
    }

    /// The representative in [0, Q) as little-endian limbs.
    fn unsigned(&self, residues: &[i64]) -> Vec<u64> {
        let k = self.primes.len();
        let mut v = vec![0i64; k];
        for i in 0..k {
            let q_i = self.primes[i];
            let mut u = residues[i];
            for j in 0..i {
                u = mul_mod(reduce(u - v[j], q_i), self.inverses[i][j], q_i);
            }
            v[i] = u;
        }

        // Horner over the mixed radix: v0 + q0(v1 + q1(v2 + …)).
        let mut result = vec![0u64; self.modulus.len()];
        for i in (0..k).rev() {
            if i + 1 < k {
                mul_small_assign(&mut result, self.primes[i] as u64);
            }
            add_small_assign(&mut result, v[i] as u64);
        }
        result
    }

    /// The representative in (-Q/2, Q/2], saturated to i64.
    fn centered(&self, residues: &[i64]) -> i64 {
        let value = self.unsigned(residues);
        if greater(&value, &self.half_modulus) {
            let magnitude = sub(&self.modulus, &value);
            -low_i64(&magnitude)
        } else {
            low_i64(&value)
        }
    }
}

// ── little-endian limb helpers ──────────────────────────────────────────

fn mul_small_assign(a: &mut [u64], b: u64) {
    let mut carry = 0u128;
    for limb in a.iter_mut() {
        let prod = *limb as u128 * b as u128 + carry;
        *limb = prod as u64;
        carry = prod >> 64;
    }
}

fn add_small_assign(a: &mut [u64], b: u64) {
    let mut carry = b as u128;
    for limb in a.iter_mut() {
        if carry == 0 {
            break;
        }
        let sum = *limb as u128 + carry;
        *limb = sum as u64;
        carry = sum >> 64;
    }
}

fn sub(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = vec![0u64; a.len()];
    let mut borrow = false;
    for i in 0..a.len() {
        let (d1, o1) = a[i].overflowing_sub(b[i]);
        let (d2, o2) = d1.overflowing_sub(borrow as u64);
        out[i] = d2;
        borrow = o1 || o2;
    }
    out
}

fn shr_assign(a: &mut [u64], bits: u32) {
    let n = a.len();
    for i in 0..n {
        let high = if i + 1 < n { a[i + 1] << (64 - bits) } else { 0 };
        a[i] = (a[i] >> bits) | high;
    }
}

fn greater(a: &[u64], b: &[u64]) -> bool {
    for i in (0..a.len()).rev() {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    false
}

fn low_i64(a: &[u64]) -> i64 {
    if a[1..].iter().any(|&l| l != 0) || a[0] > i64::MAX as u64 {
        i64::MAX
    } else {
        a[0] as i64
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════
