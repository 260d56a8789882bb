//! RNS-CKKS scheme parameters.
//!
//! Ring dimension N = 4096 gives N/2 = 2048 packed slots. The modulus chain
//! is a prefix of the ~36-bit NTT primes in [`super::ntt::NTT_PRIMES`]; the
//! fresh scale sits at 2^36 so that rescaling by one prime keeps the scale
//! essentially constant from level to level.

/// Ring dimension, the degree of the cyclotomic polynomial X^N + 1.
pub const N: usize = 4096;

/// Number of packed real slots per ciphertext.
pub const NUM_SLOTS: usize = N / 2;

/// Scale of freshly encrypted ciphertexts.
pub const DELTA: f64 = (1u64 << 36) as f64;

/// Standard deviation for discrete Gaussian error sampling.
pub const SIGMA: f64 = 3.2;

/// Primes that must survive to decryption. With Δ ≈ q one prime only holds
/// values below 1/2, so the last level keeps two.
pub const DECRYPTION_PRIMES: usize = 2;

/// Digit width for relinearization key switching. Relinearization runs on
/// products at scale Δ², where 2^18-sized digit noise vanishes.
pub const DECOMP_BITS_RELIN: u32 = 18;

/// Digit width for rotation key switching. Rotations run at scale Δ, not
/// Δ², so digits are much narrower: nine per prime, which keeps the
/// key-switch error of one rotation below 1e-3 in slot units.
pub const DECOMP_BITS_ROT: u32 = 4;

/// Galois group generator: 5 has order N/2 in (Z/2N)*, and σ_5 rotates the
/// Galois-aligned slots left by one.
pub const GALOIS_GEN: u64 = 5;
