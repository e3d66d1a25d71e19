//! Batch normalisation over every axis but the channel axis.

use ndarray::{Array1, ArrayD, Axis, Ix1};
use serde::{Deserialize, Serialize};

use super::LayerContext;
use crate::error::{OpsError, OpsResult};
use crate::init::Constant;
use crate::shape::{from_matrix, to_matrix};

/// Moving-average momentum and variance epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormConfig {
    pub momentum: f32,
    pub epsilon: f32,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            momentum: 0.9,
            epsilon: 1.1e-5,
        }
    }
}

fn vector(ctx: &LayerContext<'_>, name: &str, channels: usize, fill: f32, trainable: bool) -> OpsResult<Array1<f32>> {
    ctx.store
        .get_or_create(name, &[channels], &Constant(fill), None, trainable)?
        .into_dimensionality::<Ix1>()
        .map_err(|_| OpsError::shape_mismatch(name, &[channels], &[]))
}

/// Normalises `x` per channel (last axis).
///
/// In training mode the batch mean and (biased) variance are used and the
/// non-trainable `{scope}/moving_mean` / `{scope}/moving_variance` are
/// updated as `m ← momentum·m + (1 − momentum)·batch`. Otherwise the moving
/// statistics are used. `{scope}/gamma` (ones) and `{scope}/beta` (zeros)
/// are trainable.
///
/// Each moving-statistic blend runs under one store write lock, so
/// concurrent training calls on a scope all contribute.
pub fn batch_norm(ctx: &LayerContext<'_>, x: &ArrayD<f32>, training: bool, scope: &str) -> OpsResult<ArrayD<f32>> {
    if x.ndim() < 2 {
        return Err(OpsError::invalid_rank("batch_norm", ">= 2", x.ndim()));
    }
    let cfg = ctx.config.batch_norm;
    let flat = to_matrix("batch_norm", x)?;
    let channels = flat.ncols();
    if flat.nrows() == 0 {
        return Err(OpsError::invalid_parameter("batch_norm input", "empty", "at least one element per channel"));
    }

    let gamma = vector(ctx, &format!("{scope}/gamma"), channels, 1.0, true)?;
    let beta = vector(ctx, &format!("{scope}/beta"), channels, 0.0, true)?;
    let mean_name = format!("{scope}/moving_mean");
    let var_name = format!("{scope}/moving_variance");
    let moving_mean = vector(ctx, &mean_name, channels, 0.0, false)?;
    let moving_var = vector(ctx, &var_name, channels, 1.0, false)?;

    let (mean, var) = if training {
        let mean = flat.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(channels));
        let var = flat.var_axis(Axis(0), 0.0);

        let decay = 1.0 - cfg.momentum;
        let batch_mean = mean.view().into_dyn();
        let batch_var = var.view().into_dyn();
        ctx.store
            .update(&mean_name, |m| m * cfg.momentum + &(&batch_mean * decay))?;
        ctx.store
            .update(&var_name, |v| v * cfg.momentum + &(&batch_var * decay))?;
        (mean, var)
    } else {
        (moving_mean, moving_var)
    };

    let scale = &gamma / &var.mapv(|v| (v + cfg.epsilon).sqrt());
    let shift = &beta - &(&mean * &scale);
    let y = &flat * &scale + &shift;
    from_matrix("batch_norm", &y, x.shape())
}
