//! Layer constructors backed by a [`ParamStore`].
//!
//! Every constructor takes the input map, a layer configuration, a scope
//! and a [`Role`]. Parameters are created on first use under
//! `{scope}/kernel`, `{scope}/bias` and (with spectral normalisation)
//! `{scope}/u`; later calls with the same scope reuse them.
//!
//! ```
//! use gan_core::config::OpsConfig;
//! use gan_core::layers::{conv2d, Conv2dConfig, LayerContext, Role};
//! use gan_core::store::ParamStore;
//! use ndarray::Array4;
//!
//! let store = ParamStore::default();
//! let config = OpsConfig::default();
//! let ctx = LayerContext::new(&store, &config);
//!
//! let x = Array4::<f32>::ones((2, 8, 8, 3));
//! let y = conv2d(&ctx, &x, &Conv2dConfig::new(16), "disc/conv0", Role::Discriminator).unwrap();
//! assert_eq!(y.dim(), (2, 3, 3, 16));
//! assert!(store.spectral_state("disc/conv0/u").is_some());
//! ```

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array4, ArrayD, Ix1, Ix4};
use serde::{Deserialize, Serialize};

use crate::config::OpsConfig;
use crate::error::{OpsError, OpsResult};
use crate::init::zeros;
use crate::regularizer::RegularizerKind;
use crate::store::ParamStore;

pub mod conv;
pub mod dense;
pub mod gated;
pub mod norm;

pub use conv::{conv2d, deconv2d, Conv2dConfig, Deconv2dConfig};
pub use dense::{dense, DenseConfig};
pub use gated::{gate_conv2d, gate_deconv2d, GateConv2dConfig, GateDeconv2dConfig};
pub use norm::{batch_norm, BatchNormConfig};

/// Which network a layer belongs to. Only generator kernels carry an
/// orthogonality regulariser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Generator,
    Discriminator,
}

impl Role {
    /// `Generator` when `scope` contains `"generator"`.
    pub fn from_scope(scope: &str) -> Self {
        if scope.contains("generator") {
            Role::Generator
        } else {
            Role::Discriminator
        }
    }

    pub fn is_generator(&self) -> bool {
        matches!(self, Role::Generator)
    }
}

/// Fill mode for the explicit padding of [`conv2d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadType {
    #[default]
    Zero,
    Reflect,
    Symmetric,
}

impl PadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PadType::Zero => "zero",
            PadType::Reflect => "reflect",
            PadType::Symmetric => "symmetric",
        }
    }
}

impl fmt::Display for PadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PadType {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zero" => Ok(PadType::Zero),
            "reflect" => Ok(PadType::Reflect),
            "symmetric" => Ok(PadType::Symmetric),
            other => Err(OpsError::InvalidPadding(other.to_string())),
        }
    }
}

impl From<PadType> for crate::ops::PadMode {
    fn from(pad_type: PadType) -> Self {
        match pad_type {
            PadType::Zero => crate::ops::PadMode::Zero,
            PadType::Reflect => crate::ops::PadMode::Reflect,
            PadType::Symmetric => crate::ops::PadMode::Symmetric,
        }
    }
}

/// Padding scheme for the deconvolution and gated layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Padding {
    #[default]
    Same,
    Valid,
    /// Mirror-pad by `rate·(kernel − 1)/2`, then convolve without padding.
    Symmetric,
    Reflect,
}

impl Padding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Padding::Same => "SAME",
            Padding::Valid => "VALID",
            Padding::Symmetric => "SYMMETRIC",
            Padding::Reflect => "REFLECT",
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Padding {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAME" => Ok(Padding::Same),
            "VALID" => Ok(Padding::Valid),
            "SYMMETRIC" => Ok(Padding::Symmetric),
            "REFLECT" => Ok(Padding::Reflect),
            other => Err(OpsError::InvalidPadding(other.to_string())),
        }
    }
}

/// Store and settings shared by a network's layer calls.
#[derive(Debug, Clone, Copy)]
pub struct LayerContext<'a> {
    pub store: &'a ParamStore,
    pub config: &'a OpsConfig,
}

impl<'a> LayerContext<'a> {
    pub fn new(store: &'a ParamStore, config: &'a OpsConfig) -> Self {
        Self { store, config }
    }

    /// Fetches or creates `{scope}/kernel`, regularised with `regularizer`
    /// for generator layers, then spectrally normalises it under `{scope}/u`
    /// when `sn` is set.
    pub(crate) fn kernel(
        &self,
        scope: &str,
        shape: &[usize],
        role: Role,
        regularizer: RegularizerKind,
        sn: bool,
    ) -> OpsResult<ArrayD<f32>> {
        let regularizer = role.is_generator().then_some(regularizer);
        let w = self.store.get_or_create(
            &format!("{scope}/kernel"),
            shape,
            &self.config.initializer,
            regularizer,
            true,
        )?;
        if !sn {
            return Ok(w);
        }
        let output = self
            .config
            .spectral_norm
            .apply(self.store, &format!("{scope}/u"), &w)?;
        Ok(output.weight)
    }

    pub(crate) fn kernel4(
        &self,
        scope: &str,
        shape: [usize; 4],
        role: Role,
        sn: bool,
    ) -> OpsResult<Array4<f32>> {
        let w = self.kernel(scope, &shape, role, self.config.conv_regularizer(), sn)?;
        w.into_dimensionality::<Ix4>()
            .map_err(|_| OpsError::shape_mismatch(format!("{scope}/kernel"), &shape, &[]))
    }

    /// Zero-initialised `{scope}/bias` of length `channels`.
    pub(crate) fn bias(&self, scope: &str, channels: usize) -> OpsResult<Array1<f32>> {
        let name = format!("{scope}/bias");
        let b = self
            .store
            .get_or_create(&name, &[channels], &zeros(), None, true)?;
        b.into_dimensionality::<Ix1>()
            .map_err(|_| OpsError::shape_mismatch(name, &[channels], &[]))
    }
}

pub(crate) fn check_positive(parameter: &str, value: usize) -> OpsResult<()> {
    if value == 0 {
        return Err(OpsError::invalid_parameter(parameter, value, ">= 1"));
    }
    Ok(())
}
