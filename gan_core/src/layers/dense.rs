use ndarray::{Array2, ArrayD, Ix2};
use serde::{Deserialize, Serialize};

use super::{check_positive, LayerContext, Role};
use crate::error::{OpsError, OpsResult};
use crate::ops::flatten;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenseConfig {
    pub units: usize,
    pub use_bias: bool,
    pub sn: bool,
}

impl DenseConfig {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            use_bias: true,
            sn: true,
        }
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

/// Fully connected layer. The input is flattened to `[batch, features]`
/// and multiplied by a `[features, units]` kernel.
pub fn dense(
    ctx: &LayerContext<'_>,
    x: &ArrayD<f32>,
    config: &DenseConfig,
    scope: &str,
    role: Role,
) -> OpsResult<Array2<f32>> {
    check_positive("units", config.units)?;
    let x = flatten(x)?;
    let features = x.ncols();

    let shape = [features, config.units];
    let kernel = ctx
        .kernel(scope, &shape, role, ctx.config.fully_regularizer(), config.sn)?
        .into_dimensionality::<Ix2>()
        .map_err(|_| OpsError::shape_mismatch(format!("{scope}/kernel"), &shape, &[]))?;

    let mut y = x.dot(&kernel);
    if config.use_bias {
        y += &ctx.bias(scope, config.units)?;
    }
    Ok(y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpsConfig;
    use crate::regularizer::RegularizerKind;
    use crate::spectral::largest_singular_value;
    use crate::store::ParamStore;
    use ndarray::IxDyn;

    #[test]
    fn flattens_feature_maps() {
        let store = ParamStore::new(4);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let x = ArrayD::from_elem(IxDyn(&[3, 2, 2, 4]), 0.5f32);

        let y = dense(&ctx, &x, &DenseConfig::new(7), "disc/fc", Role::Discriminator).unwrap();
        assert_eq!(y.dim(), (3, 7));
        assert_eq!(store.get("disc/fc/kernel").unwrap().shape(), &[16, 7]);
    }

    #[test]
    fn generator_uses_fully_connected_regularizer() {
        let store = ParamStore::new(4);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let x = ArrayD::from_elem(IxDyn(&[2, 5]), 1.0f32);

        dense(&ctx, &x, &DenseConfig::new(3), "generator/fc", Role::Generator).unwrap();
        let reg = store.parameter("generator/fc/kernel").unwrap().regularizer;
        assert!(matches!(reg, Some(RegularizerKind::OrthogonalFully(_))));
        assert!(store.regularization_loss().unwrap() > 0.0);
    }

    #[test]
    fn normalised_kernel_has_unit_gain_on_top_direction() {
        let store = ParamStore::new(4);
        let config = OpsConfig {
            spectral_norm: crate::spectral::SpectralNorm::new(200),
            ..OpsConfig::default()
        };
        let ctx = LayerContext::new(&store, &config);

        // Rows of the identity recover the effective kernel itself.
        let eye = ArrayD::from_shape_fn(IxDyn(&[6, 6]), |i| if i[0] == i[1] { 1.0 } else { 0.0 });
        let layer = DenseConfig::new(4).with_bias(false);
        let w_hat = dense(&ctx, &eye, &layer, "disc/fc2", Role::Discriminator).unwrap();
        assert!((largest_singular_value(&w_hat, 500) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn bias_is_added_per_unit() {
        let store = ParamStore::new(4);
        let config = OpsConfig::default();
        let ctx = LayerContext::new(&store, &config);
        let x = ArrayD::from_elem(IxDyn(&[1, 2]), 0.0f32);
        let layer = DenseConfig::new(2).with_sn(false);

        dense(&ctx, &x, &layer, "disc/fc3", Role::Discriminator).unwrap();
        store
            .assign("disc/fc3/bias", ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, -1.0]).unwrap())
            .unwrap();
        let y = dense(&ctx, &x, &layer, "disc/fc3", Role::Discriminator).unwrap();
        assert_eq!(y, ndarray::array![[1.0f32, -1.0]]);
    }
}
