//! Layer-library configuration via TOML files.
//!
//! Every section is optional; missing values fall back to the defaults the
//! layer constructors use.
//!
//! ```toml
//! [initializer]
//! factor = 2.0
//! scale_factor = 0.1
//! mode = "FAN_AVG"
//! uniform = false
//! seed = 13371337
//!
//! [regularizer]
//! scale = 1e-4
//! fully_scale = 1e-4
//!
//! [spectral_norm]
//! iterations = 1
//! epsilon = 1e-12
//!
//! [batch_norm]
//! momentum = 0.9
//! epsilon = 1.1e-5
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::init::{FanMode, VarianceScaling, DEFAULT_SEED};
use crate::layers::BatchNormConfig;
use crate::regularizer::{
    orthogonal_regularizer, orthogonal_regularizer_fully, RegularizerKind, DEFAULT_ORTH_SCALE,
};
use crate::spectral::{SpectralNorm, DEFAULT_EPSILON};

/// Settings shared by every layer constructor.
///
/// # Examples
///
/// ```
/// use gan_core::config::OpsConfig;
///
/// let config = OpsConfig::from_str("[spectral_norm]\niterations = 3").unwrap();
/// assert_eq!(config.spectral_norm.iterations, 3);
/// assert_eq!(config.initializer.factor, 2.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpsConfig {
    /// Weight initialiser for every kernel
    pub initializer: VarianceScaling,
    /// Orthogonality penalty scale for generator conv kernels
    pub regularizer_scale: f32,
    /// Orthogonality penalty scale for generator dense kernels
    pub fully_regularizer_scale: f32,
    pub spectral_norm: SpectralNorm,
    pub batch_norm: BatchNormConfig,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            initializer: VarianceScaling::default(),
            regularizer_scale: DEFAULT_ORTH_SCALE,
            fully_regularizer_scale: DEFAULT_ORTH_SCALE,
            spectral_norm: SpectralNorm::default(),
            batch_norm: BatchNormConfig::default(),
        }
    }
}

impl OpsConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawOpsConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let initializer = raw.initializer.validate()?;
        let (regularizer_scale, fully_regularizer_scale) = raw.regularizer.validate()?;
        let spectral_norm = raw.spectral_norm.validate()?;
        let batch_norm = raw.batch_norm.validate()?;

        Ok(Self {
            initializer,
            regularizer_scale,
            fully_regularizer_scale,
            spectral_norm,
            batch_norm,
        })
    }

    /// Regulariser for 4-D generator kernels.
    pub fn conv_regularizer(&self) -> RegularizerKind {
        orthogonal_regularizer(self.regularizer_scale)
    }

    /// Regulariser for 2-D generator kernels.
    pub fn fully_regularizer(&self) -> RegularizerKind {
        orthogonal_regularizer_fully(self.fully_regularizer_scale)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOpsConfig {
    #[serde(default)]
    initializer: RawInitializer,
    #[serde(default)]
    regularizer: RawRegularizer,
    #[serde(default)]
    spectral_norm: RawSpectralNorm,
    #[serde(default)]
    batch_norm: RawBatchNorm,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawInitializer {
    factor: f64,
    scale_factor: f64,
    mode: String,
    uniform: bool,
    seed: u64,
}

impl Default for RawInitializer {
    fn default() -> Self {
        Self {
            factor: 2.0,
            scale_factor: 0.1,
            mode: FanMode::FanAvg.as_str().to_string(),
            uniform: false,
            seed: DEFAULT_SEED,
        }
    }
}

impl RawInitializer {
    fn validate(&self) -> Result<VarianceScaling, ConfigError> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(ConfigError::Parse("initializer.factor must be positive".into()));
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(ConfigError::Parse(
                "initializer.scale_factor must be positive".into(),
            ));
        }
        let mode = self
            .mode
            .parse::<FanMode>()
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        Ok(VarianceScaling::new(
            self.factor,
            self.scale_factor,
            mode,
            self.uniform,
            self.seed,
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRegularizer {
    scale: f32,
    fully_scale: f32,
}

impl Default for RawRegularizer {
    fn default() -> Self {
        Self {
            scale: DEFAULT_ORTH_SCALE,
            fully_scale: DEFAULT_ORTH_SCALE,
        }
    }
}

impl RawRegularizer {
    fn validate(&self) -> Result<(f32, f32), ConfigError> {
        for (name, value) in [("scale", self.scale), ("fully_scale", self.fully_scale)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Parse(format!(
                    "regularizer.{name} must be non-negative"
                )));
            }
        }
        Ok((self.scale, self.fully_scale))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSpectralNorm {
    iterations: usize,
    epsilon: f32,
}

impl Default for RawSpectralNorm {
    fn default() -> Self {
        Self {
            iterations: 1,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl RawSpectralNorm {
    fn validate(&self) -> Result<SpectralNorm, ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::Parse(
                "spectral_norm.iterations must be at least 1".into(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ConfigError::Parse(
                "spectral_norm.epsilon must be positive".into(),
            ));
        }
        Ok(SpectralNorm::new(self.iterations).with_epsilon(self.epsilon))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawBatchNorm {
    momentum: f32,
    epsilon: f32,
}

impl Default for RawBatchNorm {
    fn default() -> Self {
        let defaults = BatchNormConfig::default();
        Self {
            momentum: defaults.momentum,
            epsilon: defaults.epsilon,
        }
    }
}

impl RawBatchNorm {
    fn validate(&self) -> Result<BatchNormConfig, ConfigError> {
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::Parse(
                "batch_norm.momentum must lie in [0, 1)".into(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(ConfigError::Parse("batch_norm.epsilon must be positive".into()));
        }
        Ok(BatchNormConfig {
            momentum: self.momentum,
            epsilon: self.epsilon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = OpsConfig::from_str("").unwrap();
        assert_eq!(config, OpsConfig::default());
    }

    #[test]
    fn parses_custom_values() {
        let toml = r#"
            [initializer]
            factor = 1.0
            mode = "FAN_IN"
            uniform = true
            seed = 5

            [regularizer]
            scale = 0.01

            [spectral_norm]
            iterations = 4

            [batch_norm]
            momentum = 0.99
        "#;
        let config = OpsConfig::from_str(toml).unwrap();
        assert_eq!(config.initializer.factor, 1.0);
        assert_eq!(config.initializer.scale_factor, 0.1);
        assert_eq!(config.initializer.mode, FanMode::FanIn);
        assert!(config.initializer.uniform);
        assert_eq!(config.initializer.seed, 5);
        assert_eq!(config.regularizer_scale, 0.01);
        assert_eq!(config.fully_regularizer_scale, DEFAULT_ORTH_SCALE);
        assert_eq!(config.spectral_norm.iterations, 4);
        assert_eq!(config.batch_norm.momentum, 0.99);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = OpsConfig::from_str("[initializer]\nmode = \"FAN_MAX\"").unwrap_err();
        assert!(err.to_string().contains("FAN_MAX"));
    }

    #[test]
    fn zero_iterations_are_rejected() {
        assert!(OpsConfig::from_str("[spectral_norm]\niterations = 0").is_err());
    }

    #[test]
    fn momentum_out_of_range_is_rejected() {
        assert!(OpsConfig::from_str("[batch_norm]\nmomentum = 1.0").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(OpsConfig::from_str("[initializer]\nfactr = 2.0").is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = OpsConfig::load_from_file("/nonexistent/ops.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
