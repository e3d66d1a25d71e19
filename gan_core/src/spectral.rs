//! Spectral normalisation.
//!
//! A weight of any rank ≥ 2 is flattened to `W: [rows, c_out]` and divided
//! by a power-iteration estimate of its largest singular value. The
//! estimate vector `u: [1, c_out]` lives in the [`ParamStore`] under the
//! caller's key and is refined by every call, so a single iteration per
//! forward pass converges over the course of training.
//!
//! ```text
//! repeat `iterations` times:
//!     v = normalize(u · Wᵀ)
//!     u = normalize(v · W)
//! sigma = v · W · uᵀ
//! output = W / sigma
//! ```
//!
//! `u` and `v` are constants as far as gradients are concerned; see
//! [`SpectralNormOutput::backward`].

use ndarray::{Array2, ArrayD};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{OpsError, OpsResult};
use crate::shape::{from_matrix, to_matrix};
use crate::store::ParamStore;

/// Floor applied to the squared norm in [`l2_normalize`], and the smallest
/// accepted `|sigma|`.
pub const DEFAULT_EPSILON: f32 = 1e-12;

/// Scales `x` to unit L2 norm: `x / sqrt(max(Σx², eps))`.
pub fn l2_normalize(x: &Array2<f32>, eps: f32) -> Array2<f32> {
    let sum_sq: f32 = x.iter().map(|v| v * v).sum();
    if sum_sq < eps {
        warn!(sum_sq, "l2_normalize on a near-zero vector; clamping the norm");
    }
    x / sum_sq.max(eps).sqrt()
}

fn check_row(context: &str, x: &Array2<f32>, width: usize) -> OpsResult<()> {
    if x.dim() != (1, width) {
        return Err(OpsError::shape_mismatch(context, &[1, width], x.shape()));
    }
    Ok(())
}

fn iterate(w: &Array2<f32>, u: &Array2<f32>, iterations: usize, eps: f32) -> (Array2<f32>, Array2<f32>) {
    let mut u_hat = u.clone();
    let mut v_hat = Array2::zeros((1, w.nrows()));
    for _ in 0..iterations {
        v_hat = l2_normalize(&u_hat.dot(&w.t()), eps);
        u_hat = l2_normalize(&v_hat.dot(w), eps);
    }
    (u_hat, v_hat)
}

fn estimate(w: &Array2<f32>, u: &Array2<f32>, v: &Array2<f32>) -> f32 {
    v.dot(w).dot(&u.t())[[0, 0]]
}

/// Runs `iterations` rounds of power iteration on `w` starting from `u`.
///
/// Returns `(u, v)` with shapes `[1, cols]` and `[1, rows]`.
///
/// # Errors
///
/// [`OpsError::ShapeMismatch`] unless `u` is `[1, cols]`.
pub fn power_iteration(
    w: &Array2<f32>,
    u: &Array2<f32>,
    iterations: usize,
    eps: f32,
) -> OpsResult<(Array2<f32>, Array2<f32>)> {
    check_row("power_iteration u", u, w.ncols())?;
    Ok(iterate(w, u, iterations, eps))
}

/// `v · W · uᵀ`, the singular value estimate for a converged `(u, v)` pair.
///
/// # Errors
///
/// [`OpsError::ShapeMismatch`] unless `u` is `[1, cols]` and `v` is `[1, rows]`.
pub fn sigma_estimate(w: &Array2<f32>, u: &Array2<f32>, v: &Array2<f32>) -> OpsResult<f32> {
    check_row("sigma_estimate u", u, w.ncols())?;
    check_row("sigma_estimate v", v, w.nrows())?;
    Ok(estimate(w, u, v))
}

/// Persistent power-iteration state for one weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralState {
    /// Current estimate of the dominant right singular vector, `[1, c_out]`.
    pub u: Array2<f32>,
    /// Sigma computed by the most recent update.
    pub last_sigma: Option<f32>,
    /// Number of completed updates.
    pub updates: u64,
}

impl SpectralState {
    pub fn new(u: Array2<f32>) -> Self {
        Self {
            u,
            last_sigma: None,
            updates: 0,
        }
    }
}

/// Result of one spectral normalisation.
#[derive(Debug, Clone)]
pub struct SpectralNormOutput {
    /// `W / sigma`, in the shape of the input weight.
    pub weight: ArrayD<f32>,
    pub sigma: f32,
    /// Detached right singular vector, `[1, c_out]`.
    pub u: Array2<f32>,
    /// Detached left singular vector, `[1, rows]`.
    pub v: Array2<f32>,
}

impl SpectralNormOutput {
    /// Back-propagates `grad_output` (dL/d(W/σ)) to dL/dW with `u` and `v`
    /// held constant:
    ///
    /// ```text
    /// dL/dW = G/σ − (⟨G, W⟩ / σ²) · vᵀu
    /// ```
    pub fn backward(&self, w: &ArrayD<f32>, grad_output: &ArrayD<f32>) -> OpsResult<ArrayD<f32>> {
        if w.shape() != grad_output.shape() {
            return Err(OpsError::shape_mismatch(
                "spectral_norm backward",
                w.shape(),
                grad_output.shape(),
            ));
        }
        let w_mat = to_matrix("spectral_norm backward", w)?;
        let g_mat = to_matrix("spectral_norm backward", grad_output)?;
        if w_mat.nrows() != self.v.ncols() || w_mat.ncols() != self.u.ncols() {
            return Err(OpsError::shape_mismatch(
                "spectral_norm backward",
                &[self.v.ncols(), self.u.ncols()],
                w_mat.shape(),
            ));
        }

        let sigma = self.sigma;
        let inner: f32 = (&g_mat * &w_mat).sum();
        let outer = self.v.t().dot(&self.u);
        let grad = &g_mat / sigma - &(outer * (inner / (sigma * sigma)));
        from_matrix("spectral_norm backward", &grad, w.shape())
    }
}

/// Spectral normalisation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralNorm {
    pub iterations: usize,
    pub epsilon: f32,
}

impl Default for SpectralNorm {
    fn default() -> Self {
        Self {
            iterations: 1,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl SpectralNorm {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Normalises `w` using (and updating) the state stored under `key`.
    ///
    /// The state is locked from the read of `u` until the refined `u` is
    /// written back, so concurrent calls on the same key are serialised.
    ///
    /// # Errors
    ///
    /// - rank < 2 or a zero-sized last axis
    /// - `iterations == 0`
    /// - an existing state whose width differs from `w`'s last axis
    /// - `|sigma| < epsilon` ([`OpsError::DegenerateSpectrum`])
    pub fn apply(&self, store: &ParamStore, key: &str, w: &ArrayD<f32>) -> OpsResult<SpectralNormOutput> {
        if w.ndim() < 2 {
            return Err(OpsError::invalid_rank("spectral_norm", ">= 2", w.ndim()));
        }
        if self.iterations == 0 {
            return Err(OpsError::invalid_parameter("iterations", 0, ">= 1"));
        }

        let w_mat = to_matrix("spectral_norm", w)?;
        let entry = store.spectral_entry(key, w_mat.ncols())?;
        let mut state = entry.lock();

        let (u_hat, v_hat) = iterate(&w_mat, &state.u, self.iterations, self.epsilon);
        let sigma = estimate(&w_mat, &u_hat, &v_hat);
        if !sigma.is_finite() || sigma.abs() < self.epsilon {
            return Err(OpsError::DegenerateSpectrum {
                key: key.to_string(),
                sigma,
            });
        }

        let normalized = from_matrix("spectral_norm", &(&w_mat / sigma), w.shape())?;

        state.u = u_hat.clone();
        state.last_sigma = Some(sigma);
        state.updates += 1;
        debug!(key, sigma, updates = state.updates, "spectral norm updated");

        Ok(SpectralNormOutput {
            weight: normalized,
            sigma,
            u: u_hat,
            v: v_hat,
        })
    }
}

/// Spectrally normalises `w` with `iterations` rounds of power iteration.
pub fn spectral_norm(
    store: &ParamStore,
    key: &str,
    w: &ArrayD<f32>,
    iterations: usize,
) -> OpsResult<SpectralNormOutput> {
    SpectralNorm::new(iterations).apply(store, key, w)
}

/// Largest singular value of `w` by running power iteration to convergence
/// from a ones vector. Stateless; used to check normalised weights.
pub fn largest_singular_value(w: &Array2<f32>, iterations: usize) -> f32 {
    let start = Array2::ones((1, w.ncols()));
    let (u, v) = iterate(w, &start, iterations.max(1), DEFAULT_EPSILON);
    estimate(w, &u, &v).abs()
}

/// L2 norm of a state vector.
pub fn vector_norm(u: &Array2<f32>) -> f32 {
    u.iter().map(|x| x * x).sum::<f32>().sqrt()
}
