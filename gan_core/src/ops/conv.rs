//! NHWC convolution primitives.
//!
//! Kernels use the `[kh, kw, c_in, c_out]` layout for convolution and
//! `[kh, kw, c_out, c_in]` for transposed convolution. Batches are processed
//! in parallel with rayon; each image is lowered to an im2col patch matrix
//! and multiplied with the flattened kernel.

use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};

/// How out-of-range rows and columns are filled when padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PadMode {
    Zero,
    /// Mirror without repeating the edge: a left pad of 2 on `[1 2 3]` reads `3 2`.
    Reflect,
    /// Mirror including the edge: left pad of 2 on `[1 2 3]` reads `2 1`.
    Symmetric,
}

/// Per-side spatial padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pads {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Pads {
    pub fn is_empty(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }
}

fn effective_kernel(kernel: usize, dilation: usize) -> usize {
    (kernel - 1) * dilation + 1
}

/// TF "SAME" padding along one axis: `(before, after)` such that the output
/// has `ceil(input / stride)` positions. The odd pixel goes after.
pub fn same_padding(input: usize, kernel: usize, stride: usize, dilation: usize) -> (usize, usize) {
    let out = (input + stride - 1) / stride;
    let needed = (out.saturating_sub(1)) * stride + effective_kernel(kernel, dilation);
    let total = needed.saturating_sub(input);
    (total / 2, total - total / 2)
}

fn source_index(pos: isize, len: usize, mode: PadMode) -> Option<usize> {
    let len = len as isize;
    let idx = match mode {
        _ if (0..len).contains(&pos) => pos,
        PadMode::Zero => return None,
        PadMode::Reflect if pos < 0 => -pos,
        PadMode::Reflect => 2 * (len - 1) - pos,
        PadMode::Symmetric if pos < 0 => -pos - 1,
        PadMode::Symmetric => 2 * len - 1 - pos,
    };
    Some(idx as usize)
}

fn check_mirror_pads(pads: Pads, h: usize, w: usize, mode: PadMode) -> OpsResult<()> {
    let limit = |len: usize| match mode {
        PadMode::Zero => usize::MAX,
        PadMode::Reflect => len.saturating_sub(1),
        PadMode::Symmetric => len,
    };
    let worst_h = pads.top.max(pads.bottom);
    let worst_w = pads.left.max(pads.right);
    if worst_h > limit(h) || worst_w > limit(w) {
        return Err(OpsError::invalid_parameter(
            "pad",
            format!("{worst_h}x{worst_w}"),
            format!("{mode:?} padding of a {h}x{w} map needs pad <= {}", limit(h.min(w))),
        ));
    }
    Ok(())
}

/// Pads the two spatial axes of an NHWC map.
pub fn pad_spatial(x: &Array4<f32>, pads: Pads, mode: PadMode) -> OpsResult<Array4<f32>> {
    let (n, h, w, c) = x.dim();
    if pads.is_empty() {
        return Ok(x.clone());
    }
    check_mirror_pads(pads, h, w, mode)?;

    let out_h = h + pads.top + pads.bottom;
    let out_w = w + pads.left + pads.right;
    let mut out = Array4::zeros((n, out_h, out_w, c));
    for oy in 0..out_h {
        let Some(iy) = source_index(oy as isize - pads.top as isize, h, mode) else {
            continue;
        };
        for ox in 0..out_w {
            let Some(ix) = source_index(ox as isize - pads.left as isize, w, mode) else {
                continue;
            };
            out.slice_mut(s![.., oy, ox, ..])
                .assign(&x.slice(s![.., iy, ix, ..]));
        }
    }
    Ok(out)
}

fn check_channels(context: &str, expected: usize, got: usize) -> OpsResult<()> {
    if expected != got {
        return Err(OpsError::shape_mismatch(context, &[expected], &[got]));
    }
    Ok(())
}

fn check_positive(parameter: &str, value: usize) -> OpsResult<()> {
    if value == 0 {
        return Err(OpsError::invalid_parameter(parameter, value, ">= 1"));
    }
    Ok(())
}

/// Unpadded ("VALID") 2-D convolution.
///
/// `x: [n, h, w, c_in]`, `kernel: [kh, kw, c_in, c_out]`; output
/// `[n, (h − kh_eff)/stride + 1, (w − kw_eff)/stride + 1, c_out]`.
pub fn conv2d_valid(
    x: &Array4<f32>,
    kernel: &Array4<f32>,
    stride: usize,
    dilation: usize,
) -> OpsResult<Array4<f32>> {
    check_positive("stride", stride)?;
    check_positive("dilation", dilation)?;
    let (n, h, w, c_in) = x.dim();
    let (kh, kw, k_in, c_out) = kernel.dim();
    check_channels("conv2d input channels", k_in, c_in)?;
    check_positive("kernel", kh.min(kw))?;

    let (eff_h, eff_w) = (effective_kernel(kh, dilation), effective_kernel(kw, dilation));
    if h < eff_h || w < eff_w {
        return Err(OpsError::invalid_parameter(
            "input",
            format!("{h}x{w}"),
            format!("at least the dilated kernel extent {eff_h}x{eff_w}"),
        ));
    }
    let out_h = (h - eff_h) / stride + 1;
    let out_w = (w - eff_w) / stride + 1;

    let patch_len = kh * kw * c_in;
    let w_mat = Array2::from_shape_vec((patch_len, c_out), kernel.iter().copied().collect())
        .map_err(|_| OpsError::shape_mismatch("conv2d kernel", &[patch_len, c_out], kernel.shape()))?;

    let images: Vec<Array2<f32>> = (0..n)
        .into_par_iter()
        .map(|b| {
            let image = x.index_axis(Axis(0), b);
            let mut patches = Array2::zeros((out_h * out_w, patch_len));
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut row = patches.row_mut(oy * out_w + ox);
                    for a in 0..kh {
                        for bb in 0..kw {
                            let iy = oy * stride + a * dilation;
                            let ix = ox * stride + bb * dilation;
                            let start = (a * kw + bb) * c_in;
                            row.slice_mut(s![start..start + c_in])
                                .assign(&image.slice(s![iy, ix, ..]));
                        }
                    }
                }
            }
            patches.dot(&w_mat)
        })
        .collect();

    let mut out = Array4::zeros((n, out_h, out_w, c_out));
    for (b, rows) in images.into_iter().enumerate() {
        let image = rows
            .into_shape((out_h, out_w, c_out))
            .map_err(|_| OpsError::shape_mismatch("conv2d output", &[out_h, out_w, c_out], &[]))?;
        out.index_axis_mut(Axis(0), b).assign(&image);
    }
    Ok(out)
}

/// "SAME" 2-D convolution: zero-pads so the output has `ceil(h / stride)`
/// rows and `ceil(w / stride)` columns.
pub fn conv2d_same(
    x: &Array4<f32>,
    kernel: &Array4<f32>,
    stride: usize,
    dilation: usize,
) -> OpsResult<Array4<f32>> {
    check_positive("stride", stride)?;
    check_positive("dilation", dilation)?;
    let (_, h, w, _) = x.dim();
    let (kh, kw, _, _) = kernel.dim();
    let (top, bottom) = same_padding(h, kh, stride, dilation);
    let (left, right) = same_padding(w, kw, stride, dilation);
    let padded = pad_spatial(
        x,
        Pads {
            top,
            bottom,
            left,
            right,
        },
        PadMode::Zero,
    )?;
    conv2d_valid(&padded, kernel, stride, dilation)
}

/// Output extent of a transposed convolution along one axis.
pub fn transpose_output_size(input: usize, kernel: usize, stride: usize, same: bool) -> usize {
    if same {
        input * stride
    } else {
        input * stride + kernel.saturating_sub(stride)
    }
}

/// Transposed 2-D convolution (the adjoint of a strided convolution).
///
/// `x: [n, h, w, c_in]`, `kernel: [kh, kw, c_out, c_in]`. With `same` the
/// output is `[n, h·stride, w·stride, c_out]`; otherwise each spatial axis
/// grows by `max(k − stride, 0)` more.
pub fn conv2d_transpose(
    x: &Array4<f32>,
    kernel: &Array4<f32>,
    stride: usize,
    same: bool,
) -> OpsResult<Array4<f32>> {
    check_positive("stride", stride)?;
    let (n, h, w, c_in) = x.dim();
    let (kh, kw, c_out, k_in) = kernel.dim();
    check_channels("conv2d_transpose input channels", k_in, c_in)?;
    check_positive("kernel", kh.min(kw))?;

    let out_h = transpose_output_size(h, kh, stride, same);
    let out_w = transpose_output_size(w, kw, stride, same);
    let (pad_top, pad_left) = if same {
        (kh.saturating_sub(stride) / 2, kw.saturating_sub(stride) / 2)
    } else {
        (0, 0)
    };

    let scatter = |image: ArrayView3<f32>| {
        let mut out = Array3::<f32>::zeros((out_h, out_w, c_out));
        for iy in 0..h {
            for ix in 0..w {
                let pixel = image.slice(s![iy, ix, ..]);
                for a in 0..kh {
                    let Some(oy) = (iy * stride + a).checked_sub(pad_top) else {
                        continue;
                    };
                    if oy >= out_h {
                        continue;
                    }
                    for bb in 0..kw {
                        let Some(ox) = (ix * stride + bb).checked_sub(pad_left) else {
                            continue;
                        };
                        if ox >= out_w {
                            continue;
                        }
                        let contribution: Array1<f32> = kernel.slice(s![a, bb, .., ..]).dot(&pixel);
                        let mut cell = out.slice_mut(s![oy, ox, ..]);
                        cell += &contribution;
                    }
                }
            }
        }
        out
    };

    let images: Vec<Array3<f32>> = (0..n)
        .into_par_iter()
        .map(|b| scatter(x.index_axis(Axis(0), b)))
        .collect();

    let mut out = Array4::zeros((n, out_h, out_w, c_out));
    for (b, image) in images.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), b).assign(&image);
    }
    Ok(out)
}

/// Adds a per-channel bias to the last axis.
pub fn bias_add(x: &mut Array4<f32>, bias: &Array1<f32>) -> OpsResult<()> {
    check_channels("bias_add", x.dim().3, bias.len())?;
    *x += bias;
    Ok(())
}
