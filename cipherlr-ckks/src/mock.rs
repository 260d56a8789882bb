//! Mock backend: slots in the clear, depth accounted exactly.
//!
//! Demonstrates the full training flow without FHE overhead. Ciphertexts
//! carry their slot values and remaining depth; every operation follows the
//! same depth rules as [`CkksBackend`](crate::CkksBackend). Rotations still
//! require a key for the exact rotation index.
//!
//! Unlike the real scheme the mock never refuses to multiply. Once a result
//! would drop below depth zero its slots are replaced by large deterministic
//! garbage, which is how noise overflowing the modulus looks after
//! decryption. Tests use this to observe depth exhaustion.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::{HeBackend, KeyPair, Plaintext};
use crate::error::{CryptoError, Result};

/// Slot count used by [`MockBackend::default`], matching the CKKS ring.
pub const DEFAULT_MOCK_SLOTS: usize = 2048;

/// Depth budget used by [`MockBackend::default`].
pub const DEFAULT_MOCK_DEPTH: usize = 16;

/// Magnitude of the garbage produced by an overdrawn ciphertext.
const EXHAUSTED_MAGNITUDE: f64 = 1.0e9;

#[derive(Clone, Debug)]
pub struct MockBackend {
    slots: usize,
    depth: usize,
}

/// Mock ciphertext: the slot values plus remaining depth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MockCiphertext {
    pub slots: Vec<f64>,
    pub depth: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockPublicKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockSecretKey;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockRotationKeys {
    rotations: BTreeSet<i32>,
}

impl MockRotationKeys {
    pub fn contains(&self, rotation: i32) -> bool {
        self.rotations.contains(&rotation)
    }

    pub fn len(&self) -> usize {
        self.rotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }
}

impl MockBackend {
    /// A mock with `slots` slots (a power of two) and a fresh-ciphertext
    /// depth of `depth`.
    pub fn new(slots: usize, depth: usize) -> Result<Self> {
        if slots == 0 || !slots.is_power_of_two() {
            return Err(CryptoError::InvalidParameters(format!(
                "slot count must be a power of two, got {}",
                slots
            )));
        }
        Ok(Self { slots, depth })
    }

    fn result(&self, slots: Vec<f64>, depth: i32) -> MockCiphertext {
        if depth >= 0 {
            return MockCiphertext { slots, depth };
        }
        let garbage = slots
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let phase = (i as f64 * 0.618_033_988_75).fract() - 0.5;
                v * EXHAUSTED_MAGNITUDE + phase * EXHAUSTED_MAGNITUDE
            })
            .collect();
        MockCiphertext {
            slots: garbage,
            depth,
        }
    }

    fn zip_with(
        &self,
        a: &MockCiphertext,
        b: &MockCiphertext,
        depth_cost: i32,
        f: impl Fn(f64, f64) -> f64,
    ) -> MockCiphertext {
        let slots = a.slots.iter().zip(&b.slots).map(|(&x, &y)| f(x, y)).collect();
        self.result(slots, a.depth.min(b.depth) - depth_cost)
    }

    fn map(&self, ct: &MockCiphertext, depth_cost: i32, f: impl Fn(f64) -> f64) -> MockCiphertext {
        let slots = ct.slots.iter().map(|&x| f(x)).collect();
        self.result(slots, ct.depth - depth_cost)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            slots: DEFAULT_MOCK_SLOTS,
            depth: DEFAULT_MOCK_DEPTH,
        }
    }
}

impl HeBackend for MockBackend {
    type Ciphertext = MockCiphertext;
    type PublicKey = MockPublicKey;
    type SecretKey = MockSecretKey;
    type RotationKeys = MockRotationKeys;

    fn slot_count(&self) -> usize {
        self.slots
    }

    fn max_depth(&self) -> usize {
        self.depth
    }

    fn keygen<R: Rng + ?Sized>(&self, _rng: &mut R) -> KeyPair<Self> {
        KeyPair {
            public: MockPublicKey,
            secret: MockSecretKey,
        }
    }

    fn gen_rotation_keys<R: Rng + ?Sized>(
        &self,
        _secret: &MockSecretKey,
        rotations: &[i32],
        _rng: &mut R,
    ) -> MockRotationKeys {
        MockRotationKeys {
            rotations: rotations.iter().copied().collect(),
        }
    }

    fn encrypt<R: Rng + ?Sized>(
        &self,
        plaintext: &Plaintext,
        _public: &MockPublicKey,
        _rng: &mut R,
    ) -> Result<MockCiphertext> {
        let padded = Plaintext::from_values(plaintext.slots(), self.slots)?;
        Ok(MockCiphertext {
            slots: padded.into_slots(),
            depth: self.depth as i32,
        })
    }

    fn decrypt(&self, ct: &MockCiphertext, _secret: &MockSecretKey) -> Result<Plaintext> {
        Plaintext::from_values(&ct.slots, self.slots)
    }

    fn add(&self, a: &MockCiphertext, b: &MockCiphertext) -> Result<MockCiphertext> {
        Ok(self.zip_with(a, b, 0, |x, y| x + y))
    }

    fn sub(&self, a: &MockCiphertext, b: &MockCiphertext) -> Result<MockCiphertext> {
        Ok(self.zip_with(a, b, 0, |x, y| x - y))
    }

    fn add_scalar(&self, ct: &MockCiphertext, value: f64) -> Result<MockCiphertext> {
        Ok(self.map(ct, 0, |x| x + value))
    }

    fn mul(
        &self,
        a: &MockCiphertext,
        b: &MockCiphertext,
        _public: &MockPublicKey,
    ) -> Result<MockCiphertext> {
        Ok(self.zip_with(a, b, 1, |x, y| x * y))
    }

    fn mul_plain(&self, ct: &MockCiphertext, plaintext: &Plaintext) -> Result<MockCiphertext> {
        let pt = Plaintext::from_values(plaintext.slots(), self.slots)?;
        let slots = ct.slots.iter().zip(pt.slots()).map(|(x, y)| x * y).collect();
        Ok(self.result(slots, ct.depth - 1))
    }

    fn mul_scalar(&self, ct: &MockCiphertext, value: f64) -> Result<MockCiphertext> {
        Ok(self.map(ct, 1, |x| x * value))
    }

    fn rotate(
        &self,
        ct: &MockCiphertext,
        rotation: i32,
        keys: &MockRotationKeys,
    ) -> Result<MockCiphertext> {
        let n = self.slots as i64;
        let shift = (rotation as i64).rem_euclid(n) as usize;
        if shift == 0 {
            return Ok(ct.clone());
        }
        if !keys.contains(rotation) {
            return Err(CryptoError::MissingRotationKey(rotation));
        }
        let mut slots = ct.slots.clone();
        slots.rotate_left(shift);
        Ok(MockCiphertext {
            slots,
            depth: ct.depth,
        })
    }

    fn depth(&self, ct: &MockCiphertext) -> i32 {
        ct.depth
    }
}
