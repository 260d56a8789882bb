//! The data owner: the only party holding the secret key.
//!
//! The owner packs and encrypts the dataset and the initial weights, hands
//! out rotation keys, decrypts the trained weights, and refreshes
//! ciphertexts whose depth has run out (standing in for bootstrapping).

use std::cell::RefCell;

use cipherlr_ckks::{HeBackend, KeyPair};
use log::debug;
use rand::Rng;

use crate::error::{Result, TrainError};
use crate::instrument::re_encrypt;
use crate::linalg::{Axis, MatKeys};
use crate::matrix::{Mat, PackingLayout};
use crate::train::Refresher;

/// Encrypted training inputs in one packing layout.
pub struct EncryptedDataset<B: HeBackend> {
    pub x: B::Ciphertext,
    /// −X in the feature layout, reduced along samples for −Xᵗ·v.
    pub neg_xt: B::Ciphertext,
    pub labels: B::Ciphertext,
    pub layout: PackingLayout,
}

pub struct KeyHolder<'a, B: HeBackend, R: Rng> {
    backend: &'a B,
    keys: KeyPair<B>,
    rng: RefCell<R>,
}

impl<'a, B: HeBackend, R: Rng> KeyHolder<'a, B, R> {
    pub fn new(backend: &'a B, mut rng: R) -> Self {
        let keys = backend.keygen(&mut rng);
        Self {
            backend,
            keys,
            rng: RefCell::new(rng),
        }
    }

    pub fn backend(&self) -> &'a B {
        self.backend
    }

    pub fn public_key(&self) -> &B::PublicKey {
        &self.keys.public
    }

    /// Only for the instrumented engine.
    pub fn secret_key(&self) -> &B::SecretKey {
        &self.keys.secret
    }

    pub fn mat_keys(&self, layout: &PackingLayout, axis: Axis) -> MatKeys<B> {
        let mut rng = self.rng.borrow_mut();
        MatKeys::generate(self.backend, &self.keys.secret, layout, axis, &mut *rng)
    }

    pub fn encrypt_slots(&self, slots: &[f64]) -> Result<B::Ciphertext> {
        let pt = self.backend.encode(slots)?;
        let mut rng = self.rng.borrow_mut();
        Ok(self.backend.encrypt(&pt, &self.keys.public, &mut *rng)?)
    }

    pub fn encrypt_dataset(&self, x: &Mat, y: &Mat) -> Result<EncryptedDataset<B>> {
        if x.nrows() != y.nrows() {
            return Err(TrainError::DimensionMismatch {
                context: "encrypt_dataset: rows of y",
                expected: x.nrows(),
                actual: y.nrows(),
            });
        }
        let layout = PackingLayout::for_matrix(x, self.backend.slot_count())?;
        debug!(
            "encrypting {}x{} dataset into {}x{} blocks",
            layout.rows(),
            layout.cols(),
            layout.padded_rows(),
            layout.row_size()
        );
        Ok(EncryptedDataset {
            x: self.encrypt_slots(&layout.pack_matrix(x)?)?,
            neg_xt: self.encrypt_slots(&layout.pack_negated_transpose(x)?)?,
            labels: self.encrypt_slots(&layout.pack_row_replicated(y)?)?,
            layout,
        })
    }

    pub fn encrypt_weights(&self, layout: &PackingLayout, theta: &Mat) -> Result<B::Ciphertext> {
        self.encrypt_slots(&layout.pack_column_replicated(theta)?)
    }

    pub fn decrypt_weights(&self, layout: &PackingLayout, ct: &B::Ciphertext) -> Result<Mat> {
        let pt = self.backend.decrypt(ct, &self.keys.secret)?;
        layout.unpack_column_replicated(pt.slots())
    }
}

impl<B: HeBackend, R: Rng> Refresher<B> for KeyHolder<'_, B, R> {
    /// Decrypt and encrypt again at full depth.
    fn refresh(&self, ct: &B::Ciphertext) -> Result<B::Ciphertext> {
        let before = self.backend.depth(ct);
        let pt = re_encrypt(self.backend, ct, &self.keys.secret)?;
        let mut rng = self.rng.borrow_mut();
        let fresh = self.backend.encrypt(&pt, &self.keys.public, &mut *rng)?;
        debug!("refreshed ciphertext: depth {} -> {}", before, self.backend.depth(&fresh));
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherlr_ckks::MockBackend;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn dataset_and_weights_roundtrip() {
        let backend = MockBackend::new(64, 4).unwrap();
        let owner = KeyHolder::new(&backend, StdRng::seed_from_u64(1));
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let y = array![[1.0], [0.0]];
        let data = owner.encrypt_dataset(&x, &y).unwrap();
        assert_eq!(data.layout.row_size(), 4);
        assert_eq!(data.neg_xt.slots[1], -2.0);
        assert_eq!(data.labels.slots[4..8], [0.0; 4]);

        let theta = array![[0.5], [-0.25], [2.0]];
        let ct = owner.encrypt_weights(&data.layout, &theta).unwrap();
        assert_eq!(owner.decrypt_weights(&data.layout, &ct).unwrap(), theta);
    }

    #[test]
    fn refresh_restores_depth() {
        let backend = MockBackend::new(16, 4).unwrap();
        let owner = KeyHolder::new(&backend, StdRng::seed_from_u64(1));
        let ct = owner.encrypt_slots(&[0.5; 16]).unwrap();
        let used = backend.mul_scalar(&ct, 2.0).unwrap();
        let used = backend.mul_scalar(&used, 2.0).unwrap();
        assert_eq!(backend.depth(&used), 2);

        let fresh = owner.refresh(&used).unwrap();
        assert_eq!(backend.depth(&fresh), 4);
        assert_eq!(fresh.slots, vec![2.0; 16]);
    }

    #[test]
    fn rejects_mismatched_labels() {
        let backend = MockBackend::default();
        let owner = KeyHolder::new(&backend, StdRng::seed_from_u64(1));
        let x = array![[1.0], [2.0], [3.0]];
        assert!(matches!(
            owner.encrypt_dataset(&x, &array![[1.0]]),
            Err(TrainError::DimensionMismatch { .. })
        ));
    }
}
