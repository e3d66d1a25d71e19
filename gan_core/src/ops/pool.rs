//! Reshapes, global pooling, max pooling and nearest-neighbour upsampling.

use ndarray::{s, Array2, Array3, Array4, ArrayD, Axis};

use crate::error::{OpsError, OpsResult};
use crate::ops::conv::same_padding;

/// `[n, d1, .., dk] → [n, d1·..·dk]`. A rank-1 input becomes `[n, 1]`.
pub fn flatten(x: &ArrayD<f32>) -> OpsResult<Array2<f32>> {
    let batch = match x.shape().first() {
        Some(&batch) => batch,
        None => return Err(OpsError::invalid_rank("flatten", ">= 1", 0)),
    };
    let features = x.shape()[1..].iter().product::<usize>();
    Array2::from_shape_vec((batch, features), x.iter().copied().collect())
        .map_err(|_| OpsError::shape_mismatch("flatten", &[batch, features], x.shape()))
}

/// `[n, h, w, c] → [n, h·w, c]`
pub fn hw_flatten(x: &Array4<f32>) -> Array3<f32> {
    let (n, h, w, c) = x.dim();
    Array3::from_shape_fn((n, h * w, c), |(b, p, ch)| x[[b, p / w, p % w, ch]])
}

/// Mean over the spatial axes: `[n, h, w, c] → [n, c]`.
pub fn global_avg_pooling_2d(x: &Array4<f32>) -> OpsResult<Array2<f32>> {
    let (_, h, w, _) = x.dim();
    if h * w == 0 {
        return Err(OpsError::invalid_parameter(
            "input",
            format!("{h}x{w}"),
            "a non-empty spatial extent",
        ));
    }
    Ok(global_sum_pooling_2d(x) / (h * w) as f32)
}

/// Sum over the spatial axes: `[n, h, w, c] → [n, c]`.
pub fn global_sum_pooling_2d(x: &Array4<f32>) -> Array2<f32> {
    x.sum_axis(Axis(1)).sum_axis(Axis(1))
}

/// 2×2 max pooling with stride 2 and SAME padding; padded cells never win.
pub fn max_pooling_2d(x: &Array4<f32>) -> Array4<f32> {
    const POOL: usize = 2;
    let (n, h, w, c) = x.dim();
    let (top, _) = same_padding(h, POOL, POOL, 1);
    let (left, _) = same_padding(w, POOL, POOL, 1);
    let out_h = (h + POOL - 1) / POOL;
    let out_w = (w + POOL - 1) / POOL;

    let mut out = Array4::from_elem((n, out_h, out_w, c), f32::NEG_INFINITY);
    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut cell = out.slice_mut(s![.., oy, ox, ..]);
            for dy in 0..POOL {
                let Some(iy) = (oy * POOL + dy).checked_sub(top).filter(|&iy| iy < h) else {
                    continue;
                };
                for dx in 0..POOL {
                    let Some(ix) = (ox * POOL + dx).checked_sub(left).filter(|&ix| ix < w) else {
                        continue;
                    };
                    cell.zip_mut_with(&x.slice(s![.., iy, ix, ..]), |acc, &v| *acc = acc.max(v));
                }
            }
        }
    }
    out
}

/// Nearest-neighbour resize to `[n, h·scale, w·scale, c]`.
pub fn up_sample_2d(x: &Array4<f32>, scale_factor: usize) -> OpsResult<Array4<f32>> {
    if scale_factor == 0 {
        return Err(OpsError::invalid_parameter("scale_factor", 0, ">= 1"));
    }
    let (n, h, w, c) = x.dim();
    let out = Array4::from_shape_fn((n, h * scale_factor, w * scale_factor, c), |(b, y, xx, ch)| {
        x[[b, y / scale_factor, xx / scale_factor, ch]]
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, IxDyn};

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array::range(0.0, (shape.0 * shape.1 * shape.2 * shape.3) as f32, 1.0)
            .into_shape(shape)
            .unwrap()
    }

    #[test]
    fn flatten_keeps_batch_axis() {
        let x = ArrayD::from_elem(IxDyn(&[3, 2, 4, 5]), 1.0f32);
        assert_eq!(flatten(&x).unwrap().dim(), (3, 40));
        let v = ArrayD::from_elem(IxDyn(&[6]), 1.0f32);
        assert_eq!(flatten(&v).unwrap().dim(), (6, 1));
        assert!(flatten(&ArrayD::from_elem(IxDyn(&[]), 1.0f32)).is_err());
    }

    #[test]
    fn hw_flatten_orders_pixels_row_major() {
        let x = ramp((2, 2, 3, 2));
        let y = hw_flatten(&x);
        assert_eq!(y.dim(), (2, 6, 2));
        assert_eq!(y[[1, 4, 1]], x[[1, 1, 1, 1]]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), x.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn global_pooling_reduces_spatial_axes() {
        let x = ramp((1, 2, 2, 2));
        assert_eq!(global_sum_pooling_2d(&x), array![[12.0f32, 16.0]]);
        assert_eq!(global_avg_pooling_2d(&x).unwrap(), array![[3.0f32, 4.0]]);
    }

    #[test]
    fn max_pooling_rounds_output_up() {
        let x = ramp((1, 3, 3, 1));
        let y = max_pooling_2d(&x);
        assert_eq!(y.dim(), (1, 2, 2, 1));
        assert_eq!(
            y.iter().copied().collect::<Vec<_>>(),
            vec![4.0, 5.0, 7.0, 8.0]
        );
    }

    #[test]
    fn max_pooling_ignores_padding_for_negative_maps() {
        let x = ramp((1, 1, 1, 1)) - 3.0;
        assert_eq!(max_pooling_2d(&x)[[0, 0, 0, 0]], -3.0);
    }

    #[test]
    fn up_sample_repeats_pixels() {
        let x = ramp((1, 2, 2, 1));
        let y = up_sample_2d(&x, 2).unwrap();
        assert_eq!(y.dim(), (1, 4, 4, 1));
        assert_eq!(y[[0, 1, 1, 0]], 0.0);
        assert_eq!(y[[0, 3, 2, 0]], 3.0);
        assert!(up_sample_2d(&x, 0).is_err());
    }
}
