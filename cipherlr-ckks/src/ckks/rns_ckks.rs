//! Leveled RNS-CKKS over the ~36-bit prime chain.
//!
//! Architecture:
//! - Fresh ciphertexts use all K primes at the top-level scale
//! - Every multiplication is followed by a rescale that drops one prime
//! - Two primes must remain for decryption, so the depth budget is K - 2
//!
//! Scales are canonical per level: the bottom level sits at 2^36 and each
//! level above is sqrt(scale_below · q_dropped), so the square of a level's
//! scale divided by its last prime is exactly the next level's scale.
//! Plaintext and scalar multiplications pick their encoding scale so that
//! they land on the canonical scale too. Two ciphertexts at the same level
//! therefore always agree on scale and can be added directly; operands at
//! different levels are aligned by truncating the higher one and spending
//! one of its spare primes on a scale-adjusting constant multiply.

use std::collections::HashMap;

use log::trace;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ntt::{mod_pow, ntt_contexts, NttContext, NTT_PRIMES};
use super::params::{
    DECOMP_BITS_RELIN, DECOMP_BITS_ROT, DECRYPTION_PRIMES, DELTA, GALOIS_GEN, N, NUM_SLOTS,
    SIGMA,
};
use super::rns::{num_digits, RnsPoly};
use super::simd::SlotEncoder;
use crate::backend::{HeBackend, KeyPair, Plaintext};
use crate::error::{CryptoError, Result};

// ═══════════════════════════════════════════════════════════════════════
// Ciphertexts and keys
// ═══════════════════════════════════════════════════════════════════════

/// A CKKS ciphertext (c0, c1) decrypting to c0 + c1·s.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CkksCiphertext {
    pub c0: RnsPoly,
    pub c1: RnsPoly,
    pub scale: f64,
}

impl CkksCiphertext {
    pub fn num_primes(&self) -> usize {
        self.c0.num_primes()
    }
}

/// Key-switching key: digit i encrypts target · 2^(bits·i) under s.
/// Both halves are stored in the NTT domain.
#[derive(Clone, Debug)]
pub struct KeySwitchKey {
    digits: Vec<(RnsPoly, RnsPoly)>,
    bits: u32,
}

/// Encryption key (b, a) with b = -(a·s + e), plus the relinearization key.
#[derive(Clone, Debug)]
pub struct CkksPublicKey {
    b: RnsPoly,
    a: RnsPoly,
    relin: KeySwitchKey,
}

/// Ternary secret key.
#[derive(Clone, Debug)]
pub struct CkksSecretKey {
    s: RnsPoly,
}

#[derive(Clone, Debug)]
pub struct RotationKey {
    galois_element: usize,
    key: KeySwitchKey,
}

/// Rotation keys indexed by the signed rotation they were generated for.
#[derive(Clone, Debug, Default)]
pub struct CkksRotationKeys {
    keys: HashMap<i32, RotationKey>,
}

impl CkksRotationKeys {
    pub fn contains(&self, rotation: i32) -> bool {
        self.keys.contains_key(&rotation)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Backend context
// ═══════════════════════════════════════════════════════════════════════

/// Parameters and precomputed tables of one RNS-CKKS session.
pub struct CkksBackend {
    num_primes: usize,
    ntt: Vec<NttContext>,
    encoder: SlotEncoder,
    /// `scales[k]` is the canonical scale of a ciphertext with k primes.
    scales: Vec<f64>,
}

impl CkksBackend {
    /// A context over the first `num_primes` primes.
    pub fn new(num_primes: usize) -> Result<Self> {
        if !(DECRYPTION_PRIMES..=NTT_PRIMES.len()).contains(&num_primes) {
            return Err(CryptoError::InvalidParameters(format!(
                "prime count must be in {}..={}, got {}",
                DECRYPTION_PRIMES,
                NTT_PRIMES.len(),
                num_primes
            )));
        }
        let mut scales = vec![DELTA; num_primes + 1];
        for k in DECRYPTION_PRIMES + 1..=num_primes {
            scales[k] = (scales[k - 1] * NTT_PRIMES[k - 1] as f64).sqrt();
        }
        Ok(Self {
            num_primes,
            ntt: ntt_contexts(num_primes),
            encoder: SlotEncoder::new(),
            scales,
        })
    }

    /// A context whose fresh ciphertexts support `depth` multiplications.
    pub fn with_depth(depth: usize) -> Result<Self> {
        Self::new(depth + DECRYPTION_PRIMES)
    }

    pub fn num_primes(&self) -> usize {
        self.num_primes
    }

    fn ntt(&self, num_primes: usize) -> &[NttContext] {
        &self.ntt[..num_primes]
    }

    fn ensure_level(&self, ct: &CkksCiphertext, operation: &'static str) -> Result<()> {
        if ct.num_primes() <= DECRYPTION_PRIMES {
            return Err(CryptoError::DepthExhausted {
                operation,
                remaining: self.depth(ct),
            });
        }
        Ok(())
    }

    /// Drop the last prime, dividing the scale by it.
    fn rescale(&self, c0: RnsPoly, c1: RnsPoly, scale: f64) -> CkksCiphertext {
        let q_last = NTT_PRIMES[c0.num_primes() - 1] as f64;
        let np = c0.num_primes() - 1;
        let exact = scale / q_last;
        // Land exactly on the canonical value when within float noise.
        let canonical = self.scales[np];
        let scale = if ((exact - canonical) / canonical).abs() < 1e-9 {
            canonical
        } else {
            exact
        };
        CkksCiphertext {
            c0: c0.drop_last_prime(),
            c1: c1.drop_last_prime(),
            scale,
        }
    }

    /// Bring `ct` down to `num_primes` primes at that level's canonical scale.
    fn mod_down(&self, ct: &CkksCiphertext, num_primes: usize) -> Result<CkksCiphertext> {
        let np = ct.num_primes();
        if np == num_primes {
            return Ok(ct.clone());
        }
        let top = num_primes + 1;
        let c0 = ct.c0.truncate(top);
        let c1 = ct.c1.truncate(top);
        let q_last = NTT_PRIMES[top - 1] as f64;
        let factor = (self.scales[num_primes] * q_last / ct.scale).round() as i64;
        let adjusted = self.rescale(
            c0.scalar_mul(factor),
            c1.scalar_mul(factor),
            ct.scale * factor as f64,
        );
        Ok(CkksCiphertext {
            scale: self.scales[num_primes],
            ..adjusted
        })
    }

    /// Align two operands to the lower level.
    fn align(
        &self,
        a: &CkksCiphertext,
        b: &CkksCiphertext,
    ) -> Result<(CkksCiphertext, CkksCiphertext)> {
        let np = a.num_primes().min(b.num_primes());
        let a = self.mod_down(a, np)?;
        let b = self.mod_down(b, np)?;
        let rel = ((a.scale - b.scale) / a.scale).abs();
        if rel > 1e-6 {
            return Err(CryptoError::ScaleMismatch {
                left: a.scale,
                right: b.scale,
            });
        }
        Ok((a, b))
    }

    /// Σ digit_i · key_i for the digit decomposition of `poly`.
    fn key_switch(&self, poly: &RnsPoly, key: &KeySwitchKey) -> (RnsPoly, RnsPoly) {
        let np = poly.num_primes();
        let ntt = self.ntt(np);
        let mut acc0 = RnsPoly::zero(np);
        let mut acc1 = RnsPoly::zero(np);
        for (digit, (kb, ka)) in poly.decompose(key.bits).iter().zip(&key.digits) {
            let d = digit.to_ntt(ntt);
            for ch in 0..np {
                ntt[ch].pointwise_acc(&mut acc0.residues[ch], &d.residues[ch], &kb.residues[ch]);
                ntt[ch].pointwise_acc(&mut acc1.residues[ch], &d.residues[ch], &ka.residues[ch]);
            }
        }
        (acc0.from_ntt(ntt), acc1.from_ntt(ntt))
    }

    fn gen_key_switch<R: Rng + ?Sized>(
        &self,
        s: &RnsPoly,
        target: &RnsPoly,
        bits: u32,
        rng: &mut R,
    ) -> KeySwitchKey {
        let np = self.num_primes;
        let ntt = self.ntt(np);
        let digits = (0..num_digits(np, bits))
            .map(|i| {
                let powers: Vec<i64> = NTT_PRIMES[..np]
                    .iter()
                    .map(|&q| mod_pow(1i64 << bits, i as u64, q))
                    .collect();
                let a = sample_uniform(rng, np);
                let e = sample_gaussian(rng, np);
                let b = a
                    .mul(s, ntt)
                    .add(&e)
                    .neg()
                    .add(&target.channel_scalar_mul(&powers));
                (b.to_ntt(ntt), a.to_ntt(ntt))
            })
            .collect();
        KeySwitchKey { digits, bits }
    }

    /// Encoding scale for a plaintext factor so that `ct · factor`,
    /// rescaled, lands on the canonical scale one level down.
    fn factor_scale(&self, ct: &CkksCiphertext) -> f64 {
        let np = ct.num_primes();
        self.scales[np - 1] * NTT_PRIMES[np - 1] as f64 / ct.scale
    }
}

/// Galois element 5^r mod 2N rotating slots left by r.
pub fn rotation_to_galois(rotation: i32) -> usize {
    let r = (rotation as i64).rem_euclid(NUM_SLOTS as i64) as u64;
    mod_pow(GALOIS_GEN as i64, r, 2 * N as i64) as usize
}

impl HeBackend for CkksBackend {
    type Ciphertext = CkksCiphertext;
    type PublicKey = CkksPublicKey;
    type SecretKey = CkksSecretKey;
    type RotationKeys = CkksRotationKeys;

    fn slot_count(&self) -> usize {
        NUM_SLOTS
    }

    fn max_depth(&self) -> usize {
        self.num_primes - DECRYPTION_PRIMES
    }

    fn keygen<R: Rng + ?Sized>(&self, rng: &mut R) -> KeyPair<Self> {
        let np = self.num_primes;
        let ntt = self.ntt(np);
        let s = sample_ternary(rng, np);
        let a = sample_uniform(rng, np);
        let e = sample_gaussian(rng, np);
        let b = a.mul(&s, ntt).add(&e).neg();
        let s_squared = s.mul(&s, ntt);
        let relin = self.gen_key_switch(&s, &s_squared, DECOMP_BITS_RELIN, rng);
        trace!("generated CKKS key pair over {} primes", np);
        KeyPair {
            public: CkksPublicKey { b, a, relin },
            secret: CkksSecretKey { s },
        }
    }

    fn gen_rotation_keys<R: Rng + ?Sized>(
        &self,
        secret: &CkksSecretKey,
        rotations: &[i32],
        rng: &mut R,
    ) -> CkksRotationKeys {
        let mut keys = HashMap::new();
        for &rotation in rotations {
            let galois_element = rotation_to_galois(rotation);
            if galois_element == 1 || keys.contains_key(&rotation) {
                continue;
            }
            let target = secret.s.apply_automorphism(galois_element);
            let key = self.gen_key_switch(&secret.s, &target, DECOMP_BITS_ROT, rng);
            keys.insert(rotation, RotationKey { galois_element, key });
        }
        trace!("generated {} rotation keys", keys.len());
        CkksRotationKeys { keys }
    }

    fn encrypt<R: Rng + ?Sized>(
        &self,
        plaintext: &Plaintext,
        public: &CkksPublicKey,
        rng: &mut R,
    ) -> Result<CkksCiphertext> {
        let np = self.num_primes;
        let ntt = self.ntt(np);
        let scale = self.scales[np];
        let coeffs = self.encoder.encode(plaintext.slots(), scale)?;
        let m = RnsPoly::from_coeffs(&coeffs, np);

        let u = sample_ternary(rng, np);
        let e1 = sample_gaussian(rng, np);
        let e2 = sample_gaussian(rng, np);
        Ok(CkksCiphertext {
            c0: public.b.mul(&u, ntt).add(&e1).add(&m),
            c1: public.a.mul(&u, ntt).add(&e2),
            scale,
        })
    }

    fn decrypt(&self, ct: &CkksCiphertext, secret: &CkksSecretKey) -> Result<Plaintext> {
        let np = ct.num_primes();
        let s = secret.s.truncate(np);
        let m = ct.c0.add(&ct.c1.mul(&s, self.ntt(np)));
        let values = self.encoder.decode(&m.to_coeffs(), ct.scale);
        Plaintext::from_values(&values, NUM_SLOTS)
    }

    fn add(&self, a: &CkksCiphertext, b: &CkksCiphertext) -> Result<CkksCiphertext> {
        let (a, b) = self.align(a, b)?;
        Ok(CkksCiphertext {
            c0: a.c0.add(&b.c0),
            c1: a.c1.add(&b.c1),
            scale: a.scale,
        })
    }

    fn sub(&self, a: &CkksCiphertext, b: &CkksCiphertext) -> Result<CkksCiphertext> {
        let (a, b) = self.align(a, b)?;
        Ok(CkksCiphertext {
            c0: a.c0.sub(&b.c0),
            c1: a.c1.sub(&b.c1),
            scale: a.scale,
        })
    }

    fn add_scalar(&self, ct: &CkksCiphertext, value: f64) -> Result<CkksCiphertext> {
        let encoded = value * ct.scale;
        if !encoded.is_finite() || encoded.abs() >= i64::MAX as f64 / 2.0 {
            return Err(CryptoError::EncodingOverflow {
                value,
                scale: ct.scale,
            });
        }
        Ok(CkksCiphertext {
            c0: ct.c0.add_constant(encoded.round() as i64),
            c1: ct.c1.clone(),
            scale: ct.scale,
        })
    }

    fn mul(
        &self,
        a: &CkksCiphertext,
        b: &CkksCiphertext,
        public: &CkksPublicKey,
    ) -> Result<CkksCiphertext> {
        let (a, b) = self.align(a, b)?;
        self.ensure_level(&a, "mul")?;
        let np = a.num_primes();
        let ntt = self.ntt(np);

        let (a0, a1) = (a.c0.to_ntt(ntt), a.c1.to_ntt(ntt));
        let (b0, b1) = (b.c0.to_ntt(ntt), b.c1.to_ntt(ntt));
        let mut d0 = RnsPoly::zero(np);
        let mut d1 = RnsPoly::zero(np);
        let mut d2 = RnsPoly::zero(np);
        for ch in 0..np {
            let ctx = &ntt[ch];
            ctx.pointwise_acc(&mut d0.residues[ch], &a0.residues[ch], &b0.residues[ch]);
            ctx.pointwise_acc(&mut d1.residues[ch], &a0.residues[ch], &b1.residues[ch]);
            ctx.pointwise_acc(&mut d1.residues[ch], &a1.residues[ch], &b0.residues[ch]);
            ctx.pointwise_acc(&mut d2.residues[ch], &a1.residues[ch], &b1.residues[ch]);
        }
        let d2 = d2.from_ntt(ntt);
        let (k0, k1) = self.key_switch(&d2, &public.relin);
        let c0 = d0.from_ntt(ntt).add(&k0);
        let c1 = d1.from_ntt(ntt).add(&k1);
        Ok(self.rescale(c0, c1, a.scale * b.scale))
    }

    fn mul_plain(&self, ct: &CkksCiphertext, plaintext: &Plaintext) -> Result<CkksCiphertext> {
        self.ensure_level(ct, "mul_plain")?;
        let np = ct.num_primes();
        let ntt = self.ntt(np);
        let factor_scale = self.factor_scale(ct);
        let coeffs = self.encoder.encode(plaintext.slots(), factor_scale)?;
        let p = RnsPoly::from_coeffs(&coeffs, np);
        Ok(self.rescale(
            ct.c0.mul(&p, ntt),
            ct.c1.mul(&p, ntt),
            ct.scale * factor_scale,
        ))
    }

    fn mul_scalar(&self, ct: &CkksCiphertext, value: f64) -> Result<CkksCiphertext> {
        self.ensure_level(ct, "mul_scalar")?;
        let factor_scale = self.factor_scale(ct);
        let encoded = value * factor_scale;
        if !encoded.is_finite() || encoded.abs() >= i64::MAX as f64 / 2.0 {
            return Err(CryptoError::EncodingOverflow {
                value,
                scale: factor_scale,
            });
        }
        let k = encoded.round() as i64;
        Ok(self.rescale(
            ct.c0.scalar_mul(k),
            ct.c1.scalar_mul(k),
            ct.scale * factor_scale,
        ))
    }

    fn rotate(
        &self,
        ct: &CkksCiphertext,
        rotation: i32,
        keys: &CkksRotationKeys,
    ) -> Result<CkksCiphertext> {
        if rotation_to_galois(rotation) == 1 {
            return Ok(ct.clone());
        }
        let rot = keys
            .keys
            .get(&rotation)
            .ok_or(CryptoError::MissingRotationKey(rotation))?;
        let c0 = ct.c0.apply_automorphism(rot.galois_element);
        let c1 = ct.c1.apply_automorphism(rot.galois_element);
        let (k0, k1) = self.key_switch(&c1, &rot.key);
        Ok(CkksCiphertext {
            c0: c0.add(&k0),
            c1: k1,
            scale: ct.scale,
        })
    }

    fn depth(&self, ct: &CkksCiphertext) -> i32 {
        ct.num_primes() as i32 - DECRYPTION_PRIMES as i32
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sampling helpers
// ═══════════════════════════════════════════════════════════════════════

fn sample_uniform<R: Rng + ?Sized>(rng: &mut R, num_primes: usize) -> RnsPoly {
    let residues = NTT_PRIMES[..num_primes]
        .iter()
        .map(|&q| (0..N).map(|_| rng.gen_range(0..q)).collect())
        .collect();
    RnsPoly { residues }
}

fn sample_ternary<R: Rng + ?Sized>(rng: &mut R, num_primes: usize) -> RnsPoly {
    let coeffs: Vec<i64> = (0..N).map(|_| rng.gen_range(-1..=1)).collect();
    RnsPoly::from_coeffs(&coeffs, num_primes)
}

/// Rounded Gaussian via Box-Muller.
fn sample_gaussian<R: Rng + ?Sized>(rng: &mut R, num_primes: usize) -> RnsPoly {
    let coeffs: Vec<i64> = (0..N)
        .map(|_| {
            let u1: f64 = rng.gen::<f64>().max(1e-12);
            let u2: f64 = rng.gen::<f64>();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            (z * SIGMA).round() as i64
        })
        .collect();
    RnsPoly::from_coeffs(&coeffs, num_primes)
}

// ═══════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════
