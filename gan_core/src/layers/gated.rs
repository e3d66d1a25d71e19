//! Gated convolutions: a content branch modulated by a sigmoid gate branch
//! with independent weights under `{scope}/content` and `{scope}/gate`.

use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::{check_positive, deconv2d, Deconv2dConfig, LayerContext, Padding, Role};
use crate::error::{OpsError, OpsResult};
use crate::ops::{
    bias_add, conv2d_same, conv2d_valid, leaky_relu, pad_spatial, sigmoid, LocalResponseNorm, PadMode,
    Pads, LEAKY_RELU_ALPHA,
};

/// Bias of the response normalisation applied to the content branch.
pub const GATE_LRN_BIAS: f32 = 5e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConv2dConfig {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
    /// Dilation rate.
    pub rate: usize,
    pub padding: Padding,
    pub use_lrn: bool,
    pub use_bias: bool,
    pub sn: bool,
}

impl GateConv2dConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            kernel: 3,
            stride: 1,
            rate: 1,
            padding: Padding::Same,
            use_lrn: true,
            use_bias: true,
            sn: true,
        }
    }

    pub fn with_kernel(mut self, kernel: usize) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_rate(mut self, rate: usize) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_lrn(mut self, use_lrn: bool) -> Self {
        self.use_lrn = use_lrn;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_sn(mut self, sn: bool) -> Self {
        self.sn = sn;
        self
    }

    fn mirror_pads(&self) -> Pads {
        let p = self.rate * (self.kernel - 1) / 2;
        Pads {
            top: p,
            bottom: p,
            left: p,
            right: p,
        }
    }
}

fn gate_branch_conv(
    ctx: &LayerContext<'_>,
    x: &Array4<f32>,
    config: &GateConv2dConfig,
    scope: &str,
    role: Role,
) -> OpsResult<Array4<f32>> {
    let c_in = x.dim().3;
    let kernel = ctx.kernel4(
        scope,
        [config.kernel, config.kernel, c_in, config.channels],
        role,
        config.sn,
    )?;
    let mut y = match config.padding {
        Padding::Same => conv2d_same(x, &kernel, config.stride, config.rate)?,
        Padding::Symmetric | Padding::Reflect => conv2d_valid(x, &kernel, config.stride, config.rate)?,
        Padding::Valid => return Err(OpsError::InvalidPadding(config.padding.to_string())),
    };
    if config.use_bias {
        bias_add(&mut y, &ctx.bias(scope, config.channels)?)?;
    }
    Ok(y)
}

/// Gated convolution. Returns `(content ⊙ gate, gate)`.
///
/// `padding` must be `SAME`, `SYMMETRIC` or `REFLECT`; `VALID` is an
/// [`OpsError::InvalidPadding`].
///
/// Content: conv → sigmoid → LRN (optional) → leaky ReLU.
/// Gate: conv → sigmoid.
pub fn gate_conv2d(
    ctx: &LayerContext<'_>,
    x: &Array4<f32>,
    config: &GateConv2dConfig,
    scope: &str,
    role: Role,
) -> OpsResult<(Array4<f32>, Array4<f32>)> {
    check_positive("channels", config.channels)?;
    check_positive("kernel", config.kernel)?;
    check_positive("stride", config.stride)?;
    check_positive("rate", config.rate)?;

    let padded;
    let input = match config.padding {
        Padding::Symmetric => {
            padded = pad_spatial(x, config.mirror_pads(), PadMode::Symmetric)?;
            &padded
        }
        Padding::Reflect => {
            padded = pad_spatial(x, config.mirror_pads(), PadMode::Reflect)?;
            &padded
        }
        Padding::Same => x,
        Padding::Valid => return Err(OpsError::InvalidPadding(config.padding.to_string())),
    };

    let mut content = sigmoid(&gate_branch_conv(ctx, input, config, &format!("{scope}/content"), role)?);
    if config.use_lrn {
        content = LocalResponseNorm::default()
            .with_bias(GATE_LRN_BIAS)
            .apply(&content);
    }
    let content = leaky_relu(&content, LEAKY_RELU_ALPHA);

    let gate = sigmoid(&gate_branch_conv(ctx, input, config, &format!("{scope}/gate"), role)?);
    Ok((content * &gate, gate))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateDeconv2dConfig {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
    pub padding: Padding,
    pub use_bias: bool,
    pub sn: bool,
}

impl GateDeconv2dConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            kernel: 5,
            stride: 2,
            padding: Padding::Same,
            use_bias: true,
            sn: true,
        }
    }

    pub fn with_kernel(mut self, kernel: usize) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_sn(mut self, sn: bool) -> Self {
        self.sn = sn;
        self
    }

    fn branch(&self) -> Deconv2dConfig {
        Deconv2dConfig {
            channels: self.channels,
            kernel: self.kernel,
            stride: self.stride,
            padding: self.padding,
            use_bias: self.use_bias,
            sn: self.sn,
        }
    }
}

/// Gated transposed convolution. Returns `(content ⊙ gate, gate)` with a
/// leaky-ReLU content branch and a sigmoid gate.
pub fn gate_deconv2d(
    ctx: &LayerContext<'_>,
    x: &Array4<f32>,
    config: &GateDeconv2dConfig,
    scope: &str,
    role: Role,
) -> OpsResult<(Array4<f32>, Array4<f32>)> {
    let branch = config.branch();
    let content = leaky_relu(
        &deconv2d(ctx, x, &branch, &format!("{scope}/content"), role)?,
        LEAKY_RELU_ALPHA,
    );
    let gate = sigmoid(&deconv2d(ctx, x, &branch, &format!("{scope}/gate"), role)?);
    Ok((content * &gate, gate))
}
