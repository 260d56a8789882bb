//! # RNS-CKKS backend
//!
//! From-scratch leveled CKKS over an RNS modulus chain of ~36-bit NTT
//! primes, ring dimension N = 4096 (2048 real slots). Provides everything
//! encrypted gradient descent needs: slot-wise add/multiply, scalar and
//! plaintext products, relinearization, rescaling and Galois rotations.
//!
//! Bootstrapping is not provided; callers refresh ciphertexts through the
//! data owner when the depth budget runs out.

pub mod ntt;
pub mod params;
pub mod rns;
pub mod rns_ckks;
pub mod simd;

pub use rns_ckks::{
    rotation_to_galois, CkksBackend, CkksCiphertext, CkksPublicKey, CkksRotationKeys,
    CkksSecretKey,
};
