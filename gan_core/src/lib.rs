//! # GAN Core
//!
//! Building blocks for generative adversarial networks on `ndarray`:
//! variance-scaling initialisation, orthogonality regularisation, spectral
//! normalisation by power iteration, and the convolution, deconvolution,
//! gated and dense layers that combine them.
//!
//! ## Quick Start
//!
//! ```rust
//! use gan_core::{spectral_norm, ParamStore};
//! use ndarray::{ArrayD, IxDyn};
//!
//! let store = ParamStore::new(42);
//! let w = ArrayD::from_shape_fn(IxDyn(&[4, 4]), |i| if i[0] == i[1] { 5.0 } else { 0.0 });
//!
//! // `u` persists in the store, so repeated calls refine sigma.
//! let mut sigma = 0.0;
//! for _ in 0..5 {
//!     sigma = spectral_norm(&store, "disc/conv0/u", &w, 1).unwrap().sigma;
//! }
//! assert!((sigma - 5.0).abs() < 1e-3);
//! ```
//!
//! ## Core Modules
//!
//! - [`init`] - Variance-scaling weight initialisers
//! - [`regularizer`] - Orthogonality penalties for conv and dense kernels
//! - [`spectral`] - Power-iteration spectral normalisation
//! - [`store`] - Parameter store holding weights and spectral state
//! - [`layers`] - conv2d, deconv2d, gated layers, dense, batch norm
//! - [`ops`] - Stateless convolution, pooling and activation kernels
//! - [`config`] - Layer settings via TOML
//! - [`logging`] - JSON line-delimited spectral journal
//! - [`checkpoint`] - Deterministic store persistence

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod init;
pub mod layers;
pub mod logging;
pub mod ops;
pub mod regularizer;
pub mod shape;
pub mod spectral;
pub mod store;

pub use checkpoint::Checkpointable;
pub use config::OpsConfig;
pub use error::{CheckpointError, ConfigError, OpsError, OpsResult};
pub use init::{
    compute_fans, he_uniform_initializer, variance_scaling_initializer, zeros, Constant, FanMode,
    Initializer, VarianceScaling,
};
pub use layers::{
    batch_norm, conv2d, deconv2d, dense, gate_conv2d, gate_deconv2d, BatchNormConfig,
    Conv2dConfig, Deconv2dConfig, DenseConfig, GateConv2dConfig, GateDeconv2dConfig,
    LayerContext, PadType, Padding, Role,
};
pub use logging::{append_spectral_journal, SpectralLogEntry};
pub use ops::{
    flatten, global_avg_pooling_2d, global_sum_pooling_2d, hw_flatten, max_pooling_2d,
    up_sample_2d,
};
pub use regularizer::{
    orth_regularizer, orth_regularizer_fully, orthogonal_regularizer, orthogonal_regularizer_fully,
    OrthogonalRegularizer, OrthogonalRegularizerFully, Regularizer, RegularizerKind,
};
pub use spectral::{spectral_norm, SpectralNorm, SpectralNormOutput, SpectralState};
pub use store::{ParamStore, StoreSnapshot};
