//! Homomorphic encryption backends for encrypted logistic regression.
//!
//! [`HeBackend`] is the seam between the training code and the scheme.
//! [`MockBackend`] keeps slots in the clear for fast development runs;
//! [`CkksBackend`] is a real RNS-CKKS implementation.

pub mod backend;
pub mod ckks;
pub mod error;
pub mod mock;

pub use backend::{HeBackend, KeyPair, Plaintext};
pub use ckks::{CkksBackend, CkksCiphertext, CkksPublicKey, CkksRotationKeys, CkksSecretKey};
pub use error::{CryptoError, Result};
pub use mock::{MockBackend, MockCiphertext, MockPublicKey, MockRotationKeys, MockSecretKey};
