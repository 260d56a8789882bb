//! Encrypted linear algebra over packed matrices.
//!
//! Everything here is built from add, multiply and rotate. Reductions are
//! rotate-and-sum: `acc ← acc + rot(acc, s)` for a power-of-two sequence of
//! strides, which leaves the sum of a whole row (or column) of the packed
//! block in the target slots.
//!
//! Two rotation key sets exist, one per reduction axis:
//!
//! | keys           | rotations                         | reduction            |
//! |----------------|-----------------------------------|----------------------|
//! | [`Axis::Row`]  | ±1, ±2, …, ±row_size/2            | across the features of each sample |
//! | [`Axis::Column`] | row_size·2^k, k < log2(n_pad)   | across the samples of each feature |
//!
//! Using the wrong set would compute a different, perfectly valid looking
//! sum, so every reduction checks the axis tag of the keys it is given.

use cipherlr_ckks::HeBackend;
use log::trace;
use rand::Rng;

use crate::error::{Result, TrainError};
use crate::matrix::PackingLayout;

/// Direction a rotation key set reduces along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    /// Row-stride rotations: sum the features of each sample.
    Row,
    /// Column-stride rotations: sum the samples of each feature.
    Column,
}

/// Rotation keys for one reduction axis of a packing layout.
pub struct MatKeys<B: HeBackend> {
    axis: Axis,
    rotations: Vec<i32>,
    keys: B::RotationKeys,
}

impl<B: HeBackend> MatKeys<B> {
    /// Rotation indices required by `axis` for `layout`.
    pub fn rotations_for(layout: &PackingLayout, axis: Axis) -> Vec<i32> {
        match axis {
            Axis::Row => {
                let strides = row_strides(layout);
                strides
                    .iter()
                    .copied()
                    .chain(strides.iter().map(|s| -s))
                    .collect()
            }
            Axis::Column => column_strides(layout),
        }
    }

    pub fn generate<R: Rng + ?Sized>(
        backend: &B,
        secret: &B::SecretKey,
        layout: &PackingLayout,
        axis: Axis,
        rng: &mut R,
    ) -> Self {
        let rotations = Self::rotations_for(layout, axis);
        let keys = backend.gen_rotation_keys(secret, &rotations, rng);
        Self {
            axis,
            rotations,
            keys,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn rotations(&self) -> &[i32] {
        &self.rotations
    }

    pub fn keys(&self) -> &B::RotationKeys {
        &self.keys
    }

    fn expect_axis(&self, expected: Axis) -> Result<()> {
        if self.axis != expected {
            return Err(TrainError::KeySetMismatch {
                expected,
                actual: self.axis,
            });
        }
        Ok(())
    }
}

/// 1, 2, 4, …, row_size/2
fn row_strides(layout: &PackingLayout) -> Vec<i32> {
    powers_of_two_below(layout.row_size())
        .map(|s| s as i32)
        .collect()
}

/// row_size, 2·row_size, …, row_size·n_pad/2
fn column_strides(layout: &PackingLayout) -> Vec<i32> {
    powers_of_two_below(layout.padded_rows())
        .map(|s| (s * layout.row_size()) as i32)
        .collect()
}

fn powers_of_two_below(limit: usize) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(1usize), |s| Some(s * 2)).take_while(move |&s| s < limit)
}

/// Fail with `InsufficientDepth` unless `ct` can absorb `needed` more
/// multiplications.
pub fn ensure_depth<B: HeBackend>(
    backend: &B,
    ct: &B::Ciphertext,
    needed: i32,
    stage: &'static str,
) -> Result<()> {
    let available = backend.depth(ct);
    if available < needed {
        return Err(TrainError::InsufficientDepth {
            stage,
            required: needed,
            available,
        });
    }
    Ok(())
}

/// `acc ← acc + rot(acc, s)` for each stride in order.
pub fn rotate_and_sum<B: HeBackend>(
    backend: &B,
    ct: &B::Ciphertext,
    strides: &[i32],
    keys: &B::RotationKeys,
) -> Result<B::Ciphertext> {
    let mut acc = ct.clone();
    for &stride in strides {
        let rotated = backend.rotate(&acc, stride, keys)?;
        acc = backend.add(&acc, &rotated)?;
    }
    Ok(acc)
}

/// Sum each row of the block and replicate the sum across the row, scaled
/// by `mask_scale`. Needs row keys; consumes one level (the mask).
pub fn sum_across_columns<B: HeBackend>(
    backend: &B,
    layout: &PackingLayout,
    ct: &B::Ciphertext,
    row_keys: &MatKeys<B>,
    mask_scale: f64,
) -> Result<B::Ciphertext> {
    row_keys.expect_axis(Axis::Row)?;
    ensure_depth(backend, ct, 1, "sum_across_columns")?;
    let strides = row_strides(layout);
    trace!("sum_across_columns: strides {:?}", strides);

    let summed = rotate_and_sum(backend, ct, &strides, row_keys.keys())?;
    let mask = backend.encode(&layout.row_mask(mask_scale))?;
    let column0 = backend.mul_plain(&summed, &mask)?;

    let back: Vec<i32> = strides.iter().map(|s| -s).collect();
    rotate_and_sum(backend, &column0, &back, row_keys.keys())
}

/// Sum each column of the block over all (padded) rows. The tiled layout
/// leaves the result replicated in every row. Needs column keys; consumes
/// no level.
pub fn sum_across_rows<B: HeBackend>(
    backend: &B,
    layout: &PackingLayout,
    ct: &B::Ciphertext,
    col_keys: &MatKeys<B>,
) -> Result<B::Ciphertext> {
    col_keys.expect_axis(Axis::Column)?;
    let strides = column_strides(layout);
    trace!("sum_across_rows: strides {:?}", strides);
    rotate_and_sum(backend, ct, &strides, col_keys.keys())
}

/// Per-sample inner product `scale · Σ_j a[i][j]·b[i][j]`, replicated
/// across each row. Depth 2.
pub fn row_dot<B: HeBackend>(
    backend: &B,
    public: &B::PublicKey,
    layout: &PackingLayout,
    a: &B::Ciphertext,
    b: &B::Ciphertext,
    row_keys: &MatKeys<B>,
    scale: f64,
) -> Result<B::Ciphertext> {
    row_keys.expect_axis(Axis::Row)?;
    ensure_depth(backend, a, 2, "row_dot")?;
    ensure_depth(backend, b, 2, "row_dot")?;
    let prod = backend.mul(a, b, public)?;
    sum_across_columns(backend, layout, &prod, row_keys, scale)
}

/// Per-feature inner product `Σ_i a[i][j]·b[i][j]`, replicated down each
/// column. Depth 1.
pub fn column_dot<B: HeBackend>(
    backend: &B,
    public: &B::PublicKey,
    layout: &PackingLayout,
    a: &B::Ciphertext,
    b: &B::Ciphertext,
    col_keys: &MatKeys<B>,
) -> Result<B::Ciphertext> {
    col_keys.expect_axis(Axis::Column)?;
    ensure_depth(backend, a, 1, "column_dot")?;
    ensure_depth(backend, b, 1, "column_dot")?;
    let prod = backend.mul(a, b, public)?;
    sum_across_rows(backend, layout, &prod, col_keys)
}
