//! Plaintext matrices and their packed slot layout.
//!
//! An n×d matrix occupies an `n_pad × row_size` block (both powers of two)
//! stored row-major, and that block is tiled cyclically over every slot of
//! the ciphertext. Tiling makes a rotation of the whole slot vector act as a
//! rotation inside each block, so rotate-and-sum reductions never pick up
//! values from outside the matrix.
//!
//! ```text
//!   slot = tile·(n_pad·row_size) + i·row_size + j
//!
//!   row-stride rotations (±1, ±2, …)       move along features j
//!   column-stride rotations (row_size·2^k) move along samples i
//! ```

use ndarray::{Array2, ArrayView2};

use crate::error::{Result, TrainError};

/// Dense plaintext matrix. Vectors are n×1 matrices.
pub type Mat = Array2<f64>;

/// Initial weights for logistic regression: a `cols(X) × 1` vector filled
/// with `scaling_factor`.
///
/// Small constant weights keep the first logits well inside the sigmoid
/// approximation domain.
pub fn initialize_log_reg(x: &Mat, y: &Mat, scaling_factor: f64) -> Result<Mat> {
    if x.nrows() != y.nrows() {
        return Err(TrainError::DimensionMismatch {
            context: "initialize_log_reg: rows of y",
            expected: x.nrows(),
            actual: y.nrows(),
        });
    }
    if !scaling_factor.is_finite() {
        return Err(TrainError::InvalidConfig(format!(
            "scaling factor must be finite, got {}",
            scaling_factor
        )));
    }
    Ok(Mat::from_elem((x.ncols(), 1), scaling_factor))
}

/// Prepend a column of ones so the first weight acts as the intercept.
pub fn add_bias_column(x: &Mat) -> Mat {
    let mut out = Mat::ones((x.nrows(), x.ncols() + 1));
    out.slice_mut(ndarray::s![.., 1..]).assign(x);
    out
}

/// Geometry of a matrix packed into ciphertext slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackingLayout {
    rows: usize,
    cols: usize,
    row_size: usize,
    padded_rows: usize,
    slots: usize,
}

impl PackingLayout {
    pub fn new(rows: usize, cols: usize, slots: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(TrainError::DimensionMismatch {
                context: "packing layout: empty matrix",
                expected: 1,
                actual: 0,
            });
        }
        if !slots.is_power_of_two() {
            return Err(TrainError::InvalidConfig(format!(
                "slot count must be a power of two, got {}",
                slots
            )));
        }
        let row_size = cols.next_power_of_two();
        let padded_rows = rows.next_power_of_two();
        let needed = row_size * padded_rows;
        if needed > slots {
            return Err(TrainError::PackingOverflow {
                rows,
                cols,
                needed,
                slots,
            });
        }
        Ok(Self {
            rows,
            cols,
            row_size,
            padded_rows,
            slots,
        })
    }

    /// Layout for the feature matrix `x`.
    pub fn for_matrix(x: &Mat, slots: usize) -> Result<Self> {
        Self::new(x.nrows(), x.ncols(), slots)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn padded_rows(&self) -> usize {
        self.padded_rows
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn block_size(&self) -> usize {
        self.row_size * self.padded_rows
    }

    /// Build a full slot vector from a value per block position.
    fn tile(&self, value: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        let block = self.block_size();
        (0..self.slots)
            .map(|slot| {
                let offset = slot % block;
                value(offset / self.row_size, offset % self.row_size)
            })
            .collect()
    }

    fn check_shape(
        &self,
        m: ArrayView2<f64>,
        rows: usize,
        cols: usize,
        context: &'static str,
    ) -> Result<()> {
        if m.nrows() != rows {
            return Err(TrainError::DimensionMismatch {
                context,
                expected: rows,
                actual: m.nrows(),
            });
        }
        if m.ncols() != cols {
            return Err(TrainError::DimensionMismatch {
                context,
                expected: cols,
                actual: m.ncols(),
            });
        }
        Ok(())
    }

    /// Slot (i, j) holds `x[i][j]`; padding is zero.
    pub fn pack_matrix(&self, x: &Mat) -> Result<Vec<f64>> {
        self.check_shape(x.view(), self.rows, self.cols, "pack_matrix")?;
        Ok(self.tile(|i, j| if i < self.rows && j < self.cols { x[[i, j]] } else { 0.0 }))
    }

    /// Slot (i, j) holds `-x[i][j]`.
    ///
    /// Reducing this operand along the sample axis yields `-Xᵗ·v`, so the
    /// transposed product reuses the feature layout and needs no in-circuit
    /// transpose or negation.
    pub fn pack_negated_transpose(&self, x: &Mat) -> Result<Vec<f64>> {
        Ok(self.pack_matrix(x)?.into_iter().map(|v| -v).collect())
    }

    /// Slot (i, j) holds `y[i]` for every column of the row.
    pub fn pack_row_replicated(&self, y: &Mat) -> Result<Vec<f64>> {
        self.check_shape(y.view(), self.rows, 1, "pack_row_replicated")?;
        Ok(self.tile(|i, _| if i < self.rows { y[[i, 0]] } else { 0.0 }))
    }

    /// Slot (i, j) holds `theta[j]` in every row, padding rows included.
    pub fn pack_column_replicated(&self, theta: &Mat) -> Result<Vec<f64>> {
        self.check_shape(theta.view(), self.cols, 1, "pack_column_replicated")?;
        Ok(self.tile(|_, j| if j < self.cols { theta[[j, 0]] } else { 0.0 }))
    }

    /// Read a weight-shaped vector (`cols × 1`) back from row 0.
    pub fn unpack_column_replicated(&self, slots: &[f64]) -> Result<Mat> {
        if slots.len() < self.row_size {
            return Err(TrainError::DimensionMismatch {
                context: "unpack_column_replicated",
                expected: self.row_size,
                actual: slots.len(),
            });
        }
        Ok(Mat::from_shape_fn((self.cols, 1), |(j, _)| slots[j]))
    }

    /// Read one value per sample (`rows × 1`) from column 0.
    pub fn unpack_row_replicated(&self, slots: &[f64]) -> Result<Mat> {
        if slots.len() < self.block_size() {
            return Err(TrainError::DimensionMismatch {
                context: "unpack_row_replicated",
                expected: self.block_size(),
                actual: slots.len(),
            });
        }
        Ok(Mat::from_shape_fn((self.rows, 1), |(i, _)| slots[i * self.row_size]))
    }

    /// `scale` at column 0 of every row (padding rows included), zero
    /// elsewhere.
    pub fn row_mask(&self, scale: f64) -> Vec<f64> {
        self.tile(|_, j| if j == 0 { scale } else { 0.0 })
    }
}
