//! Shape queries and the rank-N ↔ matrix reshapes used by spectral
//! normalisation and the orthogonality regularisers.

use ndarray::{Array2, ArrayD, IxDyn};

use crate::error::{OpsError, OpsResult};

/// Fails unless `shape` has exactly `rank` dimensions.
pub fn require_rank(context: &str, shape: &[usize], rank: usize) -> OpsResult<()> {
    if shape.len() != rank {
        return Err(OpsError::invalid_rank(context, rank.to_string(), shape.len()));
    }
    Ok(())
}

/// Collapses every axis but the last: `[d0, .., dk, c] → [d0·..·dk, c]`.
///
/// A rank-1 tensor becomes a single row.
pub fn to_matrix(context: &str, w: &ArrayD<f32>) -> OpsResult<Array2<f32>> {
    let cols = match w.shape().last() {
        Some(&cols) if cols > 0 => cols,
        Some(_) => return Err(OpsError::shape_mismatch(context, &[1], w.shape())),
        None => return Err(OpsError::invalid_rank(context, ">= 1", 0)),
    };
    let rows = w.len() / cols;
    Array2::from_shape_vec((rows, cols), w.iter().copied().collect())
        .map_err(|_| OpsError::shape_mismatch(context, &[rows, cols], w.shape()))
}

/// Inverse of [`to_matrix`].
pub fn from_matrix(context: &str, m: &Array2<f32>, shape: &[usize]) -> OpsResult<ArrayD<f32>> {
    ArrayD::from_shape_vec(IxDyn(shape), m.iter().copied().collect())
        .map_err(|_| OpsError::shape_mismatch(context, shape, m.shape()))
}
