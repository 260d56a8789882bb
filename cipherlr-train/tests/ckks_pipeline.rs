//! The encrypted pipeline on real RNS-CKKS ciphertexts.
//!
//! The mock suite pins down the algebra; these tests check that the same
//! code survives CKKS noise, rescaling and Galois rotations.

use cipherlr_ckks::{CkksBackend, HeBackend};
use cipherlr_train::linalg::{column_dot, row_dot};
use cipherlr_train::metrics::{approximate_gradient, plaintext_gradient};
use cipherlr_train::{
    initialize_log_reg, Axis, EncryptedTrainer, GradientConfig, GradientEngine, KeyHolder, Mat,
};
use ndarray::array;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn test_rng() -> StdRng {
    StdRng::seed_from_u64(99)
}

fn scenario() -> (Mat, Mat) {
    (
        array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0], [0.0, 0.0]],
        array![[1.0], [1.0], [1.0], [0.0]],
    )
}

fn max_diff(a: &Mat, b: &Mat) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[test]
fn dot_products_on_ckks() {
    let x = array![[0.5, -1.0, 2.0], [1.5, 0.25, -0.75], [-2.0, 1.0, 1.0]];
    let y = array![[1.0], [0.0], [-1.0]];
    let theta = array![[0.2], [-0.4], [0.6]];

    let backend = CkksBackend::with_depth(2).unwrap();
    let owner = KeyHolder::new(&backend, test_rng());
    let data = owner.encrypt_dataset(&x, &y).unwrap();
    let layout = data.layout;
    let row = owner.mat_keys(&layout, Axis::Row);
    let col = owner.mat_keys(&layout, Axis::Column);
    let ct_theta = owner.encrypt_weights(&layout, &theta).unwrap();

    let z = row_dot(&backend, owner.public_key(), &layout, &data.x, &ct_theta, &row, 0.5).unwrap();
    assert_eq!(backend.depth(&z), 0);
    let got = layout
        .unpack_row_replicated(backend.decrypt(&z, owner.secret_key()).unwrap().slots())
        .unwrap();
    let want = x.dot(&theta) * 0.5;
    assert!(max_diff(&got, &want) < 1e-3, "{} vs {}", got, want);

    let g = column_dot(&backend, owner.public_key(), &layout, &data.x, &data.labels, &col).unwrap();
    assert_eq!(backend.depth(&g), 1);
    let got = owner.decrypt_weights(&layout, &g).unwrap();
    let want = x.t().dot(&y);
    assert!(max_diff(&got, &want) < 1e-3, "{} vs {}", got, want);
}

#[test]
fn low_degree_gradient_on_ckks() {
    let (x, y) = scenario();
    let theta = initialize_log_reg(&x, &y, 0.1).unwrap();
    let config = GradientConfig {
        cheb_range_start: -8.0,
        cheb_range_end: 8.0,
        cheb_poly_degree: 3,
        ..GradientConfig::default()
    };

    // degree 3 costs 2 levels, the pipeline 5
    let backend = CkksBackend::with_depth(5).unwrap();
    let owner = KeyHolder::new(&backend, test_rng());
    let data = owner.encrypt_dataset(&x, &y).unwrap();
    let row = owner.mat_keys(&data.layout, Axis::Row);
    let col = owner.mat_keys(&data.layout, Axis::Column);
    let engine =
        GradientEngine::new(&backend, owner.public_key(), data.layout, &row, &col, config)
            .unwrap();
    assert_eq!(engine.required_depth(), 5);

    let ct_theta = owner.encrypt_weights(&data.layout, &theta).unwrap();
    let ct_g = engine
        .calculate_gradient(&data.x, &data.neg_xt, &data.labels, &ct_theta)
        .unwrap();
    assert_eq!(backend.depth(&ct_g), 0);
    let got = owner.decrypt_weights(&data.layout, &ct_g).unwrap();
    let want = approximate_gradient(&theta, &x, &y, engine.series()).unwrap();
    assert!(max_diff(&got, &want) < 1e-2, "{} vs {}", got, want);
}

// Degree 59 over [−16, 16] on 12 primes: tens of seconds with the
// optimised test profile.
#[test]
fn scenario_gradient_on_ckks_at_degree_59() {
    let (x, y) = scenario();
    let theta = initialize_log_reg(&x, &y, 0.1).unwrap();

    let backend = CkksBackend::with_depth(10).unwrap();
    let owner = KeyHolder::new(&backend, test_rng());
    let data = owner.encrypt_dataset(&x, &y).unwrap();
    let row = owner.mat_keys(&data.layout, Axis::Row);
    let col = owner.mat_keys(&data.layout, Axis::Column);
    let engine = GradientEngine::new(
        &backend,
        owner.public_key(),
        data.layout,
        &row,
        &col,
        GradientConfig::default(),
    )
    .unwrap();

    let ct_theta = owner.encrypt_weights(&data.layout, &theta).unwrap();
    let ct_g = engine
        .calculate_gradient(&data.x, &data.neg_xt, &data.labels, &ct_theta)
        .unwrap();
    let got = owner.decrypt_weights(&data.layout, &ct_g).unwrap();
    let want = plaintext_gradient(&theta, &x, &y).unwrap();
    assert!(max_diff(&got, &want) < 1e-2, "{} vs {}", got, want);

    // one full update on top, then a refresh for the next step
    let trainer = EncryptedTrainer::new(engine, 1.0).unwrap();
    let stepped = trainer.step(&data, &ct_theta, &owner).unwrap();
    let stepped = trainer.step(&data, &stepped, &owner).unwrap();
    let theta2 = owner.decrypt_weights(&data.layout, &stepped).unwrap();
    let want2 = cipherlr_train::train_plaintext(&x, &y, &theta, 1.0, 2, None).unwrap();
    assert!(max_diff(&theta2, &want2) < 1e-2, "{} vs {}", theta2, want2);
}
