//! Homomorphic backend abstraction.
//!
//! Training code is written against [`HeBackend`] and never names a concrete
//! scheme:
//! - [`MockBackend`](crate::MockBackend): passthrough slots with exact depth
//!   accounting, for development and fast tests
//! - [`CkksBackend`](crate::CkksBackend): real RNS-CKKS
//!
//! A backend value is the crypto context of a session. It is immutable after
//! construction and shared by reference, so independent sessions can coexist
//! in one process. Decryption needs the `SecretKey` type, which evaluation
//! code never receives.

use std::fmt;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, Result};

/// Slot values packed for a backend: always exactly `slot_count` long.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plaintext {
    slots: Vec<f64>,
}

impl Plaintext {
    /// Pad `values` with zeros up to `slot_count`.
    pub fn from_values(values: &[f64], slot_count: usize) -> Result<Self> {
        if values.len() > slot_count {
            return Err(CryptoError::SlotOverflow {
                len: values.len(),
                slots: slot_count,
            });
        }
        let mut slots = vec![0.0; slot_count];
        slots[..values.len()].copy_from_slice(values);
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[f64] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<f64> {
        self.slots
    }

    /// The first `count` slots (or all of them when `count` is larger).
    pub fn head(&self, count: usize) -> &[f64] {
        &self.slots[..count.min(self.slots.len())]
    }
}

/// Public/secret key material of one session.
///
/// The public half carries everything evaluation needs (encryption and
/// relinearization). Only the data owner keeps the secret half.
pub struct KeyPair<B: HeBackend + ?Sized> {
    pub public: B::PublicKey,
    pub secret: B::SecretKey,
}

/// Leveled homomorphic encryption over packed real-valued slots.
///
/// Every binary operation aligns its operands to the lower remaining depth.
/// Multiplications (`mul`, `mul_plain`, `mul_scalar`) consume exactly one
/// level and return a rescaled ciphertext at the operand's scale. Additions,
/// subtractions and rotations consume nothing.
pub trait HeBackend {
    type Ciphertext: Clone + fmt::Debug + Serialize + DeserializeOwned;
    type PublicKey;
    type SecretKey;
    type RotationKeys;

    /// Number of packed slots per ciphertext.
    fn slot_count(&self) -> usize;

    /// Remaining depth of a freshly encrypted ciphertext.
    fn max_depth(&self) -> usize;

    fn keygen<R: Rng + ?Sized>(&self, rng: &mut R) -> KeyPair<Self>;

    /// Generate key-switching keys for the given slot rotations.
    fn gen_rotation_keys<R: Rng + ?Sized>(
        &self,
        secret: &Self::SecretKey,
        rotations: &[i32],
        rng: &mut R,
    ) -> Self::RotationKeys;

    fn encode(&self, values: &[f64]) -> Result<Plaintext> {
        Plaintext::from_values(values, self.slot_count())
    }

    fn encrypt<R: Rng + ?Sized>(
        &self,
        plaintext: &Plaintext,
        public: &Self::PublicKey,
        rng: &mut R,
    ) -> Result<Self::Ciphertext>;

    fn decrypt(&self, ct: &Self::Ciphertext, secret: &Self::SecretKey) -> Result<Plaintext>;

    fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    fn sub(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Add `value` to every slot.
    fn add_scalar(&self, ct: &Self::Ciphertext, value: f64) -> Result<Self::Ciphertext>;

    /// Ciphertext × ciphertext, relinearized and rescaled.
    fn mul(
        &self,
        a: &Self::Ciphertext,
        b: &Self::Ciphertext,
        public: &Self::PublicKey,
    ) -> Result<Self::Ciphertext>;

    /// Ciphertext × plaintext, slot-wise.
    fn mul_plain(&self, ct: &Self::Ciphertext, plaintext: &Plaintext) -> Result<Self::Ciphertext>;

    /// Multiply every slot by `value`.
    fn mul_scalar(&self, ct: &Self::Ciphertext, value: f64) -> Result<Self::Ciphertext>;

    /// Cyclic slot rotation; positive `rotation` shifts left
    /// (slot i receives slot i + rotation).
    fn rotate(
        &self,
        ct: &Self::Ciphertext,
        rotation: i32,
        keys: &Self::RotationKeys,
    ) -> Result<Self::Ciphertext>;

    /// Remaining multiplicative depth. Zero means no further multiplication
    /// is possible; the mock backend reports negative values once overdrawn.
    fn depth(&self, ct: &Self::Ciphertext) -> i32;
}
