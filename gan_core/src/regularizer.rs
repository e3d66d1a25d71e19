//! Orthogonality regularisers.
//!
//! Both variants flatten the weight to `W: [rows, c_out]` and penalise
//! `R = WᵀW − I` with `scale · Σ R² / 2`. The conv variant accepts 4-D
//! kernels, the fully connected variant 2-D matrices; given the same
//! flattened matrix they agree exactly.

use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::OpsResult;
use crate::shape::{from_matrix, require_rank, to_matrix};

/// Scale used by the [`orth_regularizer`] / [`orth_regularizer_fully`] presets.
pub const DEFAULT_ORTH_SCALE: f32 = 1e-4;

/// A scalar penalty on a weight tensor, plus its gradient.
pub trait Regularizer {
    fn penalty(&self, w: &ArrayD<f32>) -> OpsResult<f32>;

    /// Gradient of [`Regularizer::penalty`] with respect to `w`.
    fn gradient(&self, w: &ArrayD<f32>) -> OpsResult<ArrayD<f32>>;
}

/// `WᵀW − I` for a flattened weight.
pub fn orthogonality_residual(w: &Array2<f32>) -> Array2<f32> {
    let cols = w.ncols();
    w.t().dot(w) - Array2::<f32>::eye(cols)
}

fn half_sum_of_squares(r: &Array2<f32>) -> f32 {
    r.iter().map(|v| v * v).sum::<f32>() / 2.0
}

fn penalty_of(scale: f32, w: &Array2<f32>) -> f32 {
    scale * half_sum_of_squares(&orthogonality_residual(w))
}

// d/dW ½‖WᵀW − I‖² = 2·W·R, R symmetric.
fn gradient_of(scale: f32, w: &Array2<f32>) -> Array2<f32> {
    let r = orthogonality_residual(w);
    w.dot(&r) * (2.0 * scale)
}

/// Orthogonality penalty for `[kh, kw, c_in, c_out]` convolution kernels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrthogonalRegularizer {
    pub scale: f32,
}

impl OrthogonalRegularizer {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl Regularizer for OrthogonalRegularizer {
    fn penalty(&self, w: &ArrayD<f32>) -> OpsResult<f32> {
        require_rank("orthogonal_regularizer", w.shape(), 4)?;
        let flat = to_matrix("orthogonal_regularizer", w)?;
        Ok(penalty_of(self.scale, &flat))
    }

    fn gradient(&self, w: &ArrayD<f32>) -> OpsResult<ArrayD<f32>> {
        require_rank("orthogonal_regularizer", w.shape(), 4)?;
        let flat = to_matrix("orthogonal_regularizer", w)?;
        from_matrix("orthogonal_regularizer", &gradient_of(self.scale, &flat), w.shape())
    }
}

/// Orthogonality penalty for `[c_in, c_out]` dense weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrthogonalRegularizerFully {
    pub scale: f32,
}

impl OrthogonalRegularizerFully {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }
}

impl Regularizer for OrthogonalRegularizerFully {
    fn penalty(&self, w: &ArrayD<f32>) -> OpsResult<f32> {
        require_rank("orthogonal_regularizer_fully", w.shape(), 2)?;
        let m = to_matrix("orthogonal_regularizer_fully", w)?;
        Ok(penalty_of(self.scale, &m))
    }

    fn gradient(&self, w: &ArrayD<f32>) -> OpsResult<ArrayD<f32>> {
        require_rank("orthogonal_regularizer_fully", w.shape(), 2)?;
        let m = to_matrix("orthogonal_regularizer_fully", w)?;
        from_matrix("orthogonal_regularizer_fully", &gradient_of(self.scale, &m), w.shape())
    }
}

/// Regulariser attached to a parameter in the [`crate::store::ParamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RegularizerKind {
    Orthogonal(OrthogonalRegularizer),
    OrthogonalFully(OrthogonalRegularizerFully),
}

impl Regularizer for RegularizerKind {
    fn penalty(&self, w: &ArrayD<f32>) -> OpsResult<f32> {
        match self {
            RegularizerKind::Orthogonal(reg) => reg.penalty(w),
            RegularizerKind::OrthogonalFully(reg) => reg.penalty(w),
        }
    }

    fn gradient(&self, w: &ArrayD<f32>) -> OpsResult<ArrayD<f32>> {
        match self {
            RegularizerKind::Orthogonal(reg) => reg.gradient(w),
            RegularizerKind::OrthogonalFully(reg) => reg.gradient(w),
        }
    }
}

pub fn orthogonal_regularizer(scale: f32) -> RegularizerKind {
    RegularizerKind::Orthogonal(OrthogonalRegularizer::new(scale))
}

pub fn orthogonal_regularizer_fully(scale: f32) -> RegularizerKind {
    RegularizerKind::OrthogonalFully(OrthogonalRegularizerFully::new(scale))
}

/// Conv preset with the default scale of 1e-4.
pub fn orth_regularizer() -> RegularizerKind {
    orthogonal_regularizer(DEFAULT_ORTH_SCALE)
}

/// Dense preset with the default scale of 1e-4.
pub fn orth_regularizer_fully() -> RegularizerKind {
    orthogonal_regularizer_fully(DEFAULT_ORTH_SCALE)
}
