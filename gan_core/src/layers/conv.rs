use ndarray::Array4;
use serde::{Deserialize, Serialize};

use super::{check_positive, LayerContext, PadType, Padding, Role};
use crate::error::{OpsError, OpsResult};
use crate::ops::{bias_add, conv2d_transpose, conv2d_valid, pad_spatial, Pads};

/// Settings for [`conv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conv2dConfig {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
    /// Requested padding; see [`Conv2dConfig::pads`] for the amount applied.
    pub pad: usize,
    pub dilation: usize,
    pub pad_type: PadType,
    pub use_bias: bool,
    pub sn: bool,
}

impl Conv2dConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            kernel: 4,
            stride: 2,
            pad: 0,
            dilation: 1,
            pad_type: PadType::Zero,
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

    pub fn with_pad(mut self, pad: usize, pad_type: PadType) -> Self {
        self.pad = pad;
        self.pad_type = pad_type;
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
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

    /// Padding applied to an input of height `h`.
    ///
    /// When `h` divides by the stride the requested pad is doubled,
    /// otherwise it becomes `kernel − h % stride`. The odd pixel goes to the
    /// bottom/right. Width uses the same amounts as height.
    pub fn pads(&self, h: usize) -> Pads {
        if self.pad == 0 {
            return Pads::default();
        }
        let total = if h % self.stride == 0 {
            self.pad * 2
        } else {
            self.kernel.saturating_sub(h % self.stride)
        };
        let before = total / 2;
        Pads {
            top: before,
            bottom: total - before,
            left: before,
            right: total - before,
        }
    }

    fn validate(&self) -> OpsResult<()> {
        check_positive("channels", self.channels)?;
        check_positive("kernel", self.kernel)?;
        check_positive("stride", self.stride)?;
        check_positive("dilation", self.dilation)
    }
}

/// Pads `x` per [`Conv2dConfig::pads`], then convolves it without further
/// padding with a `[k, k, c_in, channels]` kernel.
pub fn conv2d(
    ctx: &LayerContext<'_>,
    x: &Array4<f32>,
    config: &Conv2dConfig,
    scope: &str,
    role: Role,
) -> OpsResult<Array4<f32>> {
    config.validate()?;
    let (_, h, _, c_in) = x.dim();

    let pads = config.pads(h);
    let padded;
    let input = if pads.is_empty() {
        x
    } else {
        padded = pad_spatial(x, pads, config.pad_type.into())?;
        &padded
    };

    let kernel = ctx.kernel4(
        scope,
        [config.kernel, config.kernel, c_in, config.channels],
        role,
        config.sn,
    )?;
    let mut y = conv2d_valid(input, &kernel, config.stride, config.dilation)?;
    if config.use_bias {
        bias_add(&mut y, &ctx.bias(scope, config.channels)?)?;
    }
    Ok(y)
}

/// Settings for [`deconv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deconv2dConfig {
    pub channels: usize,
    pub kernel: usize,
    pub stride: usize,
    /// `Same` or `Valid`.
    pub padding: Padding,
    pub use_bias: bool,
    pub sn: bool,
}

impl Deconv2dConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            kernel: 4,
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
}

/// Transposed convolution with a `[k, k, channels, c_in]` kernel.
///
/// Output is `[n, h·s, w·s, channels]` for `Same` and grows by
/// `max(k − s, 0)` per axis for `Valid`.
pub fn deconv2d(
    ctx: &LayerContext<'_>,
    x: &Array4<f32>,
    config: &Deconv2dConfig,
    scope: &str,
    role: Role,
) -> OpsResult<Array4<f32>> {
    check_positive("channels", config.channels)?;
    check_positive("kernel", config.kernel)?;
    check_positive("stride", config.stride)?;
    let same = match config.padding {
        Padding::Same => true,
        Padding::Valid => false,
        other => return Err(OpsError::InvalidPadding(other.to_string())),
    };
    let c_in = x.dim().3;

    let kernel = ctx.kernel4(
        scope,
        [config.kernel, config.kernel, config.channels, c_in],
        role,
        config.sn,
    )?;
    let mut y = conv2d_transpose(x, &kernel, config.stride, same)?;
    if config.use_bias {
        bias_add(&mut y, &ctx.bias(scope, config.channels)?)?;
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpsConfig;
    use crate::store::ParamStore;
    use ndarray::{ArrayD, Ix4, IxDyn};

    fn input(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_fn(shape, |(b, y, x, c)| ((b + 2 * y + 3 * x + 5 * c) as f32 * 0.37).sin())
    }

    #[test]
    fn default_conv_halves_resolution() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);

        let y = conv2d(&ctx, &input((2, 16, 16, 3)), &Conv2dConfig::new(8), "disc/c0", Role::Discriminator)
            .unwrap();
        assert_eq!(y.dim(), (2, 7, 7, 8));
        assert_eq!(store.get("disc/c0/kernel").unwrap().shape(), &[4, 4, 3, 8]);
        assert_eq!(store.get("disc/c0/bias").unwrap().shape(), &[8]);
        assert_eq!(store.spectral_state("disc/c0/u").unwrap().u.dim(), (1, 8));
    }

    #[test]
    fn pad_doubles_when_height_divides_stride() {
        let config = Conv2dConfig::new(1).with_pad(1, PadType::Zero);
        assert_eq!(
            config.pads(8),
            Pads {
                top: 1,
                bottom: 1,
                left: 1,
                right: 1
            }
        );
        assert_eq!(
            config.pads(7),
            Pads {
                top: 1,
                bottom: 2,
                left: 1,
                right: 2
            }
        );
        assert!(Conv2dConfig::new(1).pads(7).is_empty());
    }

    #[test]
    fn padded_conv_keeps_stride_resolution() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let layer = Conv2dConfig::new(4).with_pad(1, PadType::Reflect);

        let y = conv2d(&ctx, &input((1, 8, 8, 2)), &layer, "disc/c1", Role::Discriminator).unwrap();
        assert_eq!(y.dim(), (1, 4, 4, 4));
    }

    #[test]
    fn unnormalised_conv_matches_raw_kernel_plus_bias() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let layer = Conv2dConfig::new(3).with_kernel(3).with_stride(1).with_sn(false);
        let x = input((1, 5, 5, 2));

        conv2d(&ctx, &x, &layer, "generator/c0", Role::Generator).unwrap();
        store
            .assign("generator/c0/bias", ArrayD::from_elem(IxDyn(&[3]), 1.5))
            .unwrap();
        let y = conv2d(&ctx, &x, &layer, "generator/c0", Role::Generator).unwrap();

        let kernel = store.get("generator/c0/kernel").unwrap().into_dimensionality::<Ix4>().unwrap();
        let expected = conv2d_valid(&x, &kernel, 1, 1).unwrap() + 1.5;
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(store.spectral_state("generator/c0/u").is_none());
    }

    #[test]
    fn spectral_state_advances_once_per_call() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let x = input((1, 8, 8, 2));

        for _ in 0..3 {
            conv2d(&ctx, &x, &Conv2dConfig::new(4), "disc/c2", Role::Discriminator).unwrap();
        }
        assert_eq!(store.spectral_state("disc/c2/u").unwrap().updates, 3);
    }

    #[test]
    fn reusing_scope_with_other_channels_fails() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);

        conv2d(&ctx, &input((1, 8, 8, 2)), &Conv2dConfig::new(4), "disc/c3", Role::Discriminator).unwrap();
        let err = conv2d(&ctx, &input((1, 8, 8, 3)), &Conv2dConfig::new(4), "disc/c3", Role::Discriminator)
            .unwrap_err();
        assert!(matches!(err, OpsError::ShapeMismatch { .. }));
    }

    #[test]
    fn zero_stride_is_rejected() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let layer = Conv2dConfig::new(4).with_stride(0);
        assert!(conv2d(&ctx, &input((1, 8, 8, 2)), &layer, "disc/c4", Role::Discriminator).is_err());
    }

    #[test]
    fn deconv_output_sizes_follow_padding() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let x = input((2, 4, 5, 3));

        let same = deconv2d(&ctx, &x, &Deconv2dConfig::new(6), "generator/d0", Role::Generator).unwrap();
        assert_eq!(same.dim(), (2, 8, 10, 6));

        let valid_layer = Deconv2dConfig::new(6).with_kernel(5).with_padding(Padding::Valid);
        let valid = deconv2d(&ctx, &x, &valid_layer, "generator/d1", Role::Generator).unwrap();
        assert_eq!(valid.dim(), (2, 11, 13, 6));

        assert_eq!(store.get("generator/d0/kernel").unwrap().shape(), &[4, 4, 6, 3]);
        assert!(store.parameter("generator/d0/kernel").unwrap().regularizer.is_some());
    }

    #[test]
    fn deconv_rejects_mirror_padding() {
        let store = ParamStore::new(0);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let layer = Deconv2dConfig::new(2).with_padding(Padding::Symmetric);
        let err = deconv2d(&ctx, &input((1, 2, 2, 1)), &layer, "generator/d2", Role::Generator).unwrap_err();
        assert_eq!(err, OpsError::InvalidPadding("SYMMETRIC".into()));
        assert!(!store.contains("generator/d2/kernel"));
    }
}
