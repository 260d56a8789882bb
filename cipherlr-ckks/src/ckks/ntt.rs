//! Negacyclic Number Theoretic Transform over the RNS primes.
//!
//! Each prime q satisfies q ≡ 1 (mod 2N), so a primitive 2N-th root of unity
//! ψ exists in Z_q. Pre-multiplying coefficients by ψ^i turns the cyclic NTT
//! into evaluation on the roots of X^N + 1, which makes polynomial products
//! in Z_q[X]/(X^N + 1) pointwise.
//!
//! Key-switching keys are kept in the evaluation domain, so besides the full
//! `mul` this module exposes the forward/inverse transforms and the pointwise
//! kernels separately.

use super::params::N;

// ═══════════════════════════════════════════════════════════════════════
// NTT-friendly primes: q ≡ 1 (mod 2N) where 2N = 8192
// ═══════════════════════════════════════════════════════════════════════

/// NTT-friendly primes for the modulus chain, each just below 2^36.
///
/// A session with `k` primes uses the prefix `NTT_PRIMES[..k]`; rescaling
/// always drops the last active prime.
pub const NTT_PRIMES: [i64; 20] = [
    68719403009,
    68719230977,
    68719206401,
    68719190017,
    68719157249,
    68718764033,
    68718428161,
    68718346241,
    68718305281,
    68717928449,
    68717740033,
    68717682689,
    68717592577,
    68717363201,
    68717223937,
    68717142017,
    68717076481,
    68717068289,
    68716781569,
    68716707841,
];

/// Primitive 2N-th roots of unity ψ for each prime in `NTT_PRIMES`:
/// ψ^N ≡ -1 and ψ^(2N) ≡ 1 (mod q).
const NTT_ROOTS: [i64; 20] = [
    5546991020,
    41019061109,
    41978190371,
    60726334289,
    36981953102,
    1937762328,
    22370218154,
    6173043660,
    67995098886,
    59422617459,
    54640452894,
    52499569528,
    36661170687,
    63942896849,
    12605105312,
    27475774088,
    37399532359,
    45270410758,
    20421207940,
    18573596375,
];

// ═══════════════════════════════════════════════════════════════════════
// Modular arithmetic helpers
// ═══════════════════════════════════════════════════════════════════════

/// base^exp mod modulus, with i128 intermediates.
pub fn mod_pow(base: i64, mut exp: u64, modulus: i64) -> i64 {
    let m = modulus as i128;
    let mut result: i128 = 1;
    let mut b = (base as i128).rem_euclid(m);
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        exp >>= 1;
        b = b * b % m;
    }
    result as i64
}

/// Modular inverse by Fermat's little theorem. `p` must be prime and
/// `a` nonzero mod p.
pub fn mod_inv(a: i64, p: i64) -> i64 {
    mod_pow(a, (p - 2) as u64, p)
}

/// Reduce any i64 into [0, q).
#[inline]
pub fn reduce(v: i64, q: i64) -> i64 {
    v.rem_euclid(q)
}

/// (a · b) mod q for a, b in [0, q).
#[inline]
pub fn mul_mod(a: i64, b: i64, q: i64) -> i64 {
    (a as i128 * b as i128 % q as i128) as i64
}

// ═══════════════════════════════════════════════════════════════════════
// NTT context
// ═══════════════════════════════════════════════════════════════════════

/// Precomputed tables for one prime.
#[derive(Clone, Debug)]
pub struct NttContext {
    pub q: i64,
    /// Powers ψ^i, i in [0, N), for the negacyclic twist.
    psi_powers: Vec<i64>,
    /// Powers ψ^(-i) combined with N^(-1) for the inverse untwist.
    psi_inv_scaled: Vec<i64>,
    /// Stage roots ω_len = ψ^(2N/len) for len = 2, 4, …, N.
    stage_roots: Vec<i64>,
    /// Inverse stage roots.
    stage_roots_inv: Vec<i64>,
}

impl NttContext {
    /// Tables for `NTT_PRIMES[index]`.
    pub fn for_prime_index(index: usize) -> Self {
        let q = NTT_PRIMES[index];
        let psi = NTT_ROOTS[index];
        let psi_inv = mod_inv(psi, q);
        let n_inv = mod_inv(N as i64, q);

        let psi_powers = powers(psi, q);
        let psi_inv_scaled = powers(psi_inv, q)
            .into_iter()
            .map(|p| mul_mod(p, n_inv, q))
            .collect();

        let mut stage_roots = Vec::new();
        let mut stage_roots_inv = Vec::new();
        let mut len = 2;
        while len <= N {
            let exp = (2 * N / len) as u64;
            stage_roots.push(mod_pow(psi, exp, q));
            stage_roots_inv.push(mod_pow(psi_inv, exp, q));
            len <<= 1;
        }

        Self {
            q,
            psi_powers,
            psi_inv_scaled,
            stage_roots,
            stage_roots_inv,
        }
    }

    /// Coefficient → evaluation domain. Input values may be any residue
    /// representative; output is in [0, q).
    pub fn forward(&self, a: &[i64]) -> Vec<i64> {
        debug_assert_eq!(a.len(), N);
        let q = self.q;
        let mut data: Vec<i64> = a
            .iter()
            .zip(&self.psi_powers)
            .map(|(&c, &pw)| mul_mod(reduce(c, q), pw, q))
            .collect();
        butterflies(&mut data, &self.stage_roots, q);
        data
    }

    /// Evaluation → coefficient domain, output in [0, q).
    pub fn inverse(&self, a: &[i64]) -> Vec<i64> {
        debug_assert_eq!(a.len(), N);
        let q = self.q;
        let mut data = a.to_vec();
        butterflies(&mut data, &self.stage_roots_inv, q);
        for (v, &s) in data.iter_mut().zip(&self.psi_inv_scaled) {
            *v = mul_mod(*v, s, q);
        }
        data
    }

    /// Product in Z_q[X]/(X^N + 1).
    pub fn mul(&self, a: &[i64], b: &[i64]) -> Vec<i64> {
        let a_ntt = self.forward(a);
        let b_ntt = self.forward(b);
        self.inverse(&self.pointwise(&a_ntt, &b_ntt))
    }

    /// Pointwise product of two evaluation-domain vectors.
    pub fn pointwise(&self, a: &[i64], b: &[i64]) -> Vec<i64> {
        a.iter().zip(b).map(|(&x, &y)| mul_mod(x, y, self.q)).collect()
    }

    /// acc += a ⊙ b in the evaluation domain.
    pub fn pointwise_acc(&self, acc: &mut [i64], a: &[i64], b: &[i64]) {
        let q = self.q;
        for ((r, &x), &y) in acc.iter_mut().zip(a).zip(b) {
            let v = *r + mul_mod(x, y, q);
            *r = if v >= q { v - q } else { v };
        }
    }

    /// Representative of `v` in (-q/2, q/2].
    pub fn center(&self, v: i64) -> i64 {
        let v = reduce(v, self.q);
        if v > self.q / 2 {
            v - self.q
        } else {
            v
        }
    }
}

/// NTT tables for the first `count` primes.
pub fn ntt_contexts(count: usize) -> Vec<NttContext> {
    (0..count).map(NttContext::for_prime_index).collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Internal helpers
// ═══════════════════════════════════════════════════════════════════════

fn powers(root: i64, q: i64) -> Vec<i64> {
    let mut out = Vec::with_capacity(N);
    let mut acc = 1i64;
    for _ in 0..N {
        out.push(acc);
        acc = mul_mod(acc, root, q);
    }
    out
}

/// Iterative radix-2 Cooley-Tukey pass after bit reversal.
fn butterflies(data: &mut [i64], stage_roots: &[i64], q: i64) {
    bit_reverse_permutation(data);
    let n = data.len();
    let mut len = 2;
    for &w in stage_roots {
        let half = len / 2;
        for start in (0..n).step_by(len) {
            let mut wk = 1i64;
            for k in 0..half {
                let u = data[start + k];
                let v = mul_mod(data[start + k + half], wk, q);
                let sum = u + v;
                data[start + k] = if sum >= q { sum - q } else { sum };
                let diff = u - v;
                data[start + k + half] = if diff < 0 { diff + q } else { diff };
                wk = mul_mod(wk, w, q);
            }
        }
        len <<= 1;
    }
}

fn bit_reverse_permutation(data: &mut [i64]) {
    let n = data.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i.reverse_bits() >> (usize::BITS - bits)) as usize;
        if i < j {
            data.swap(i, j);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime(n: i64) -> bool {
        if n < 2 {
            return false;
        }
        let mut i = 2i64;
        while i * i <= n {
            if n % i == 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[test]
    fn primes_are_ntt_friendly() {
        for &q in &NTT_PRIMES[..3] {
            assert!(is_prime(q), "{} is not prime", q);
        }
        for &q in &NTT_PRIMES {
            assert_eq!(q % (2 * N as i64), 1, "{} is not 1 mod 2N", q);
            assert!(q < (1i64 << 36));
        }
    }

    #[test]
    fn roots_have_order_2n() {
        for (i, &q) in NTT_PRIMES.iter().enumerate() {
            let psi = NTT_ROOTS[i];
            assert_eq!(mod_pow(psi, N as u64, q), q - 1, "ψ^N != -1 for {}", q);
            assert_eq!(mod_pow(psi, 2 * N as u64, q), 1);
        }
    }

    #[test]
    fn mod_inv_inverts() {
        let q = NTT_PRIMES[0];
        for a in [2, 3, 42, 12345, q - 1] {
            assert_eq!(mul_mod(a, mod_inv(a, q), q), 1);
        }
    }

    #[test]
    fn roundtrip_with_negative_coefficients() {
        let ctx = NttContext::for_prime_index(0);
        let mut a = vec![0i64; N];
        a[0] = -5;
        a[1] = 10;
        a[N - 1] = -1;
        let back = ctx.inverse(&ctx.forward(&a));
        for i in 0..N {
            assert_eq!(ctx.center(back[i]), a[i], "mismatch at {}", i);
        }
    }

    #[test]
    fn mul_matches_schoolbook() {
        let ctx = NttContext::for_prime_index(1);
        // (3 + X)(2 + 4X) = 6 + 14X + 4X^2
        let mut a = vec![0i64; N];
        a[0] = 3;
        a[1] = 1;
        let mut b = vec![0i64; N];
        b[0] = 2;
        b[1] = 4;
        let c = ctx.mul(&a, &b);
        assert_eq!(&c[..4], &[6, 14, 4, 0]);
        assert!(c[4..].iter().all(|&v| v == 0));
    }

    #[test]
    fn mul_wraps_negacyclically() {
        let ctx = NttContext::for_prime_index(2);
        let mut a = vec![0i64; N];
        a[N - 1] = 1;
        let mut b = vec![0i64; N];
        b[1] = 1;
        let c = ctx.mul(&a, &b);
        assert_eq!(ctx.center(c[0]), -1, "X^N should be -1");
        assert!(c[1..].iter().all(|&v| v == 0));
    }

    #[test]
    fn pointwise_acc_accumulates() {
        let ctx = NttContext::for_prime_index(0);
        let mut a = vec![0i64; N];
        a[0] = 2;
        let mut b = vec![0i64; N];
        b[1] = 3;
        let (fa, fb) = (ctx.forward(&a), ctx.forward(&b));
        let mut acc = vec![0i64; N];
        ctx.pointwise_acc(&mut acc, &fa, &fb);
        ctx.pointwise_acc(&mut acc, &fa, &fb);
        let c = ctx.inverse(&acc);
        assert_eq!(c[1], 12);
    }
}
