//! Elementwise activations and local response normalisation.

use ndarray::{Array, Array4, Dimension};

/// Slope used for the negative half of every leaky ReLU in the layers.
pub const LEAKY_RELU_ALPHA: f32 = 0.2;

pub fn leaky_relu<D: Dimension>(x: &Array<f32, D>, alpha: f32) -> Array<f32, D> {
    x.mapv(|v| if v >= 0.0 { v } else { alpha * v })
}

pub fn sigmoid<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Local response normalisation across the channel axis of an NHWC map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalResponseNorm {
    pub depth_radius: usize,
    pub bias: f32,
    pub alpha: f32,
    pub beta: f32,
}

impl Default for LocalResponseNorm {
    fn default() -> Self {
        Self {
            depth_radius: 5,
            bias: 1.0,
            alpha: 1.0,
            beta: 0.5,
        }
    }
}

impl LocalResponseNorm {
    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = bias;
        self
    }

    /// `x[c] / (bias + alpha · Σ_{|d−c| ≤ r} x[d]²)^beta`
    pub fn apply(&self, x: &Array4<f32>) -> Array4<f32> {
        let (n, h, w, c) = x.dim();
        let mut out = Array4::zeros((n, h, w, c));
        for b in 0..n {
            for y in 0..h {
                for xx in 0..w {
                    for ch in 0..c {
                        let lo = ch.saturating_sub(self.depth_radius);
                        let hi = (ch + self.depth_radius).min(c - 1);
                        let sqr_sum: f32 = (lo..=hi).map(|d| x[[b, y, xx, d]].powi(2)).sum();
                        out[[b, y, xx, ch]] =
                            x[[b, y, xx, ch]] / (self.bias + self.alpha * sqr_sum).powf(self.beta);
                    }
                }
            }
        }
        out
    }
}
