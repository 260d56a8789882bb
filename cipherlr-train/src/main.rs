use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use cipherlr_ckks::{CkksBackend, HeBackend, MockBackend};
use cipherlr_train::linalg::Axis;
use cipherlr_train::metrics::PerformanceMetrics;
use cipherlr_train::sigmoid::sigmoid;
use cipherlr_train::{
    add_bias_column, compute_all_metrics, initialize_log_reg, train_plaintext, ChebyshevSeries,
    EncryptedTrainer, GradientEngine, KeyHolder, Mat, TrainingConfig,
};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum BackendKind {
    /// Slots in the clear with exact depth accounting
    Mock,
    /// RNS-CKKS, N = 4096
    Ckks,
}

#[derive(Parser)]
#[command(
    name = "cipherlr-train",
    about = "Train logistic regression on encrypted synthetic data"
)]
struct Cli {
    /// JSON training configuration; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Homomorphic backend
    #[arg(long, value_enum, default_value_t = BackendKind::Mock)]
    backend: BackendKind,

    /// Number of synthetic samples (80% train, 20% held out)
    #[arg(long, default_value = "64")]
    samples: usize,

    /// Number of synthetic features, before the bias column
    #[arg(long, default_value = "3")]
    features: usize,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Chebyshev degree of the sigmoid approximation
    #[arg(long)]
    degree: Option<usize>,

    /// Fit the sigmoid on [-range, range]
    #[arg(long)]
    range: Option<f64>,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Decrypt and bound-check the intermediates of the first step
    /// (needs the debug-instrumentation feature)
    #[arg(long)]
    debug: bool,
}

struct Split {
    train_x: Mat,
    train_y: Mat,
    test_x: Mat,
    test_y: Mat,
}

#[derive(Serialize)]
struct Summary {
    backend: BackendKind,
    epochs: usize,
    seconds: f64,
    encrypted: PerformanceMetrics,
    plaintext: PerformanceMetrics,
    weights: Vec<f64>,
    reference_weights: Vec<f64>,
}

/// Labels drawn from a logistic model with random true weights.
fn synthetic_data(samples: usize, features: usize, rng: &mut StdRng) -> anyhow::Result<Split> {
    if samples < 2 {
        bail!("need at least 2 samples for a train/test split, got {}", samples);
    }
    let truth: Vec<f64> = (0..=features).map(|_| rng.gen_range(-2.0..2.0)).collect();
    let raw = Mat::from_shape_fn((samples, features), |_| rng.gen_range(-1.0..1.0));
    let x = add_bias_column(&raw);
    let y = Mat::from_shape_fn((samples, 1), |(i, _)| {
        let z: f64 = x.row(i).iter().zip(&truth).map(|(a, b)| a * b).sum();
        if rng.gen::<f64>() < sigmoid(z) {
            1.0
        } else {
            0.0
        }
    });

    let cut = (samples * 4 / 5).max(1);
    Ok(Split {
        train_x: x.slice(ndarray::s![..cut, ..]).to_owned(),
        train_y: y.slice(ndarray::s![..cut, ..]).to_owned(),
        test_x: x.slice(ndarray::s![cut.., ..]).to_owned(),
        test_y: y.slice(ndarray::s![cut.., ..]).to_owned(),
    })
}

fn run<B: HeBackend>(
    backend: &B,
    kind: BackendKind,
    config: &TrainingConfig,
    data: &Split,
    seed: u64,
    debug: bool,
) -> anyhow::Result<Summary> {
    let started = Instant::now();
    let owner = KeyHolder::new(backend, StdRng::seed_from_u64(seed.wrapping_add(1)));
    let dataset = owner
        .encrypt_dataset(&data.train_x, &data.train_y)
        .context("encrypting training data")?;
    let row_keys = owner.mat_keys(&dataset.layout, Axis::Row);
    let col_keys = owner.mat_keys(&dataset.layout, Axis::Column);

    let theta0 = initialize_log_reg(&data.train_x, &data.train_y, config.scaling_factor)?;
    let ct_theta = owner.encrypt_weights(&dataset.layout, &theta0)?;

    if debug {
        debug_first_step(&owner, &dataset, &row_keys, &col_keys, config, &ct_theta)?;
    }

    let engine = GradientEngine::new(
        backend,
        owner.public_key(),
        dataset.layout,
        &row_keys,
        &col_keys,
        config.gradient.clone(),
    )?;
    info!(
        "sigmoid: degree {} on [{}, {}], {} levels per gradient",
        config.gradient.cheb_poly_degree,
        config.gradient.cheb_range_start,
        config.gradient.cheb_range_end,
        engine.required_depth()
    );
    let trainer = EncryptedTrainer::new(engine, config.learning_rate)?;
    let trained = trainer.fit(&dataset, &ct_theta, config.epochs, &owner)?;
    let weights = owner.decrypt_weights(&dataset.layout, &trained)?;
    let seconds = started.elapsed().as_secs_f64();

    let reference = train_plaintext(
        &data.train_x,
        &data.train_y,
        &theta0,
        config.learning_rate,
        config.epochs,
        None,
    )?;

    Ok(Summary {
        backend: kind,
        epochs: config.epochs,
        seconds,
        encrypted: compute_all_metrics(&weights, &data.test_x, &data.test_y, config.threshold)?,
        plaintext: compute_all_metrics(&reference, &data.test_x, &data.test_y, config.threshold)?,
        weights: weights.iter().copied().collect(),
        reference_weights: reference.iter().copied().collect(),
    })
}

#[cfg(feature = "debug-instrumentation")]
fn debug_first_step<B: HeBackend, R: Rng>(
    owner: &KeyHolder<'_, B, R>,
    dataset: &cipherlr_train::EncryptedDataset<B>,
    row_keys: &cipherlr_train::MatKeys<B>,
    col_keys: &cipherlr_train::MatKeys<B>,
    config: &TrainingConfig,
    ct_theta: &B::Ciphertext,
) -> anyhow::Result<()> {
    use cipherlr_train::InstrumentedGradientEngine;

    let engine = GradientEngine::new(
        owner.backend(),
        owner.public_key(),
        dataset.layout,
        row_keys,
        col_keys,
        config.gradient.clone(),
    )?;
    let instrumented = InstrumentedGradientEngine::new(engine, owner.secret_key());
    let (_, report) =
        instrumented.calculate_gradient(&dataset.x, &dataset.neg_xt, &dataset.labels, ct_theta)?;
    if report.is_clean() {
        info!("debug: {} stages within bounds", report.snapshots.len());
    }
    for (stage, violation) in report.violations() {
        warn!("debug: {}: {}", stage, violation);
    }
    Ok(())
}

#[cfg(not(feature = "debug-instrumentation"))]
fn debug_first_step<B: HeBackend, R: Rng>(
    _owner: &KeyHolder<'_, B, R>,
    _dataset: &cipherlr_train::EncryptedDataset<B>,
    _row_keys: &cipherlr_train::MatKeys<B>,
    _col_keys: &cipherlr_train::MatKeys<B>,
    _config: &TrainingConfig,
    _ct_theta: &B::Ciphertext,
) -> anyhow::Result<()> {
    warn!("built without the debug-instrumentation feature; --debug ignored");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(epochs) = cli.epochs {
        config.epochs = epochs;
    }
    if let Some(rate) = cli.learning_rate {
        config.learning_rate = rate;
    }
    if let Some(degree) = cli.degree {
        config.gradient.cheb_poly_degree = degree;
    }
    if let Some(range) = cli.range {
        config.gradient.cheb_range_start = -range;
        config.gradient.cheb_range_end = range;
    }
    config.validate()?;
    let debug = cli.debug || config.gradient.debug;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let data = synthetic_data(cli.samples, cli.features, &mut rng)?;

    // gradient pipeline + learning-rate product
    let series = ChebyshevSeries::sigmoid(
        config.gradient.cheb_range_start,
        config.gradient.cheb_range_end,
        config.gradient.cheb_poly_degree,
    )?;
    let step_depth = (series.depth() + 4) as usize;

    let summary = match cli.backend {
        BackendKind::Mock => {
            let backend = MockBackend::new(
                MockBackend::default().slot_count(),
                step_depth.max(MockBackend::default().max_depth()),
            )?;
            run(&backend, cli.backend, &config, &data, cli.seed, debug)?
        }
        BackendKind::Ckks => {
            let backend = CkksBackend::with_depth(step_depth)
                .context("no CKKS parameter set supports this sigmoid degree")?;
            run(&backend, cli.backend, &config, &data, cli.seed, debug)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn split_keeps_a_held_out_part() {
        let data = synthetic_data(10, 3, &mut test_rng()).unwrap();
        assert_eq!(data.train_x.dim(), (8, 4));
        assert_eq!(data.test_x.dim(), (2, 4));
        assert_eq!(data.train_y.nrows(), 8);
        assert!(data.test_y.iter().all(|&v| v == 0.0 || v == 1.0));

        let two = synthetic_data(2, 1, &mut test_rng()).unwrap();
        assert_eq!((two.train_x.nrows(), two.test_x.nrows()), (1, 1));
    }

    #[test]
    fn too_few_samples_is_an_error() {
        assert!(synthetic_data(0, 3, &mut test_rng()).is_err());
        assert!(synthetic_data(1, 3, &mut test_rng()).is_err());
    }
}
