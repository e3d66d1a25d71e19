//! Weight initialisation.
//!
//! [`VarianceScaling`] samples weights whose variance is scaled by the
//! fan-in/fan-out of the target shape, then multiplies every sample by a
//! global `scale_factor`. Leading dimensions of a shape with rank ≥ 2 are
//! treated as receptive-field extents, so a `[kh, kw, c_in, c_out]` kernel
//! has `fan_in = kh·kw·c_in` and `fan_out = kh·kw·c_out`.

use std::fmt::{self, Display};
use std::str::FromStr;

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};

/// Default seed used by the variance-scaling presets.
pub const DEFAULT_SEED: u64 = 13_371_337;

/// Truncated-normal samples further than this many standard deviations
/// from the mean are redrawn.
const TRUNCATION_STDDEVS: f64 = 2.0;

/// Produces the initial value of a parameter of a given shape.
pub trait Initializer: Send + Sync {
    fn sample(&self, shape: &[usize]) -> OpsResult<ArrayD<f32>>;
}

/// Which fan statistic scales the variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanMode {
    #[serde(rename = "FAN_IN")]
    FanIn,
    #[serde(rename = "FAN_OUT")]
    FanOut,
    #[serde(rename = "FAN_AVG")]
    FanAvg,
}

impl FanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanMode::FanIn => "FAN_IN",
            FanMode::FanOut => "FAN_OUT",
            FanMode::FanAvg => "FAN_AVG",
        }
    }

    /// Picks `n` out of the `(fan_in, fan_out)` pair.
    pub fn select(&self, fan_in: f64, fan_out: f64) -> f64 {
        match self {
            FanMode::FanIn => fan_in,
            FanMode::FanOut => fan_out,
            FanMode::FanAvg => (fan_in + fan_out) / 2.0,
        }
    }
}

impl Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanMode {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FAN_IN" => Ok(FanMode::FanIn),
            "FAN_OUT" => Ok(FanMode::FanOut),
            "FAN_AVG" => Ok(FanMode::FanAvg),
            other => Err(OpsError::InvalidMode(other.to_string())),
        }
    }
}

/// Computes `(fan_in, fan_out)` for a parameter shape.
///
/// A rank-1 shape uses its only dimension for both fans. For higher ranks
/// the last two dimensions are `fan_in`/`fan_out` and both are multiplied by
/// the product of the leading dimensions.
///
/// # Errors
///
/// [`OpsError::EmptyShape`] for a scalar shape.
pub fn compute_fans(shape: &[usize]) -> OpsResult<(f64, f64)> {
    match shape {
        [] => Err(OpsError::EmptyShape),
        [only] => Ok((*only as f64, *only as f64)),
        [leading @ .., fan_in, fan_out] => {
            let receptive: f64 = leading.iter().map(|&d| d as f64).product();
            Ok((*fan_in as f64 * receptive, *fan_out as f64 * receptive))
        }
    }
}

/// Variance-scaling initialiser configuration.
///
/// Immutable and stateless: two calls to [`Initializer::sample`] with the
/// same shape return bit-identical tensors because the RNG is reseeded from
/// `seed` every time.
///
/// # Examples
///
/// ```
/// use gan_core::init::{FanMode, Initializer, VarianceScaling};
///
/// let init = VarianceScaling::default().with_mode(FanMode::FanIn).with_uniform(true);
/// let kernel = init.sample(&[3, 3, 4, 8]).unwrap();
/// assert_eq!(kernel.shape(), &[3, 3, 4, 8]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceScaling {
    pub factor: f64,
    pub scale_factor: f64,
    pub mode: FanMode,
    pub uniform: bool,
    pub seed: u64,
}

impl Default for VarianceScaling {
    fn default() -> Self {
        Self {
            factor: 2.0,
            scale_factor: 0.1,
            mode: FanMode::FanAvg,
            uniform: false,
            seed: DEFAULT_SEED,
        }
    }
}

impl VarianceScaling {
    pub fn new(factor: f64, scale_factor: f64, mode: FanMode, uniform: bool, seed: u64) -> Self {
        Self {
            factor,
            scale_factor,
            mode,
            uniform,
            seed,
        }
    }

    /// The `he_uniform` preset: factor 3, scale factor 0.1, averaged fans.
    ///
    /// Despite the name this samples from the truncated normal, exactly like
    /// every other non-uniform configuration.
    pub fn he_uniform() -> Self {
        Self {
            factor: 3.0,
            ..Self::default()
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_mode(mut self, mode: FanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_uniform(mut self, uniform: bool) -> Self {
        self.uniform = uniform;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns `n`, the fan statistic selected by `mode`.
    pub fn fan(&self, shape: &[usize]) -> OpsResult<f64> {
        let (fan_in, fan_out) = compute_fans(shape)?;
        let n = self.mode.select(fan_in, fan_out);
        if n <= 0.0 {
            return Err(OpsError::DegenerateFan {
                shape: shape.to_vec(),
            });
        }
        Ok(n)
    }

    /// Half-width of the uniform distribution, `sqrt(3·factor/n)`.
    pub fn uniform_limit(&self, shape: &[usize]) -> OpsResult<f64> {
        Ok((3.0 * self.factor / self.fan(shape)?).sqrt())
    }

    /// Standard deviation of the truncated normal, `sqrt(1.3·factor/n)`.
    pub fn truncated_stddev(&self, shape: &[usize]) -> OpsResult<f64> {
        Ok((1.3 * self.factor / self.fan(shape)?).sqrt())
    }

    fn validate(&self) -> OpsResult<()> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(OpsError::invalid_parameter("factor", self.factor, "finite and > 0"));
        }
        if !self.scale_factor.is_finite() {
            return Err(OpsError::invalid_parameter(
                "scale_factor",
                self.scale_factor,
                "finite",
            ));
        }
        Ok(())
    }
}

impl Initializer for VarianceScaling {
    fn sample(&self, shape: &[usize]) -> OpsResult<ArrayD<f32>> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = self.scale_factor;

        let values = if self.uniform {
            let limit = self.uniform_limit(shape)?;
            ArrayD::from_shape_fn(IxDyn(shape), |_| {
                (rng.gen_range(-limit..=limit) * scale) as f32
            })
        } else {
            let stddev = self.truncated_stddev(shape)?;
            let normal = Normal::new(0.0, stddev).map_err(|_| {
                OpsError::invalid_parameter("stddev", stddev, "finite and >= 0")
            })?;
            let bound = TRUNCATION_STDDEVS * stddev;
            ArrayD::from_shape_fn(IxDyn(shape), |_| {
                let value = loop {
                    let candidate: f64 = normal.sample(&mut rng);
                    if candidate.abs() <= bound {
                        break candidate;
                    }
                };
                (value * scale) as f32
            })
        };

        Ok(values)
    }
}

/// Fills every element with the same value. Used for biases and the batch
/// normalisation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constant(pub f32);

impl Initializer for Constant {
    fn sample(&self, shape: &[usize]) -> OpsResult<ArrayD<f32>> {
        Ok(ArrayD::from_elem(IxDyn(shape), self.0))
    }
}

/// Zero initialiser.
pub fn zeros() -> Constant {
    Constant(0.0)
}

/// The default weight initialiser of every layer constructor.
pub fn variance_scaling_initializer() -> VarianceScaling {
    VarianceScaling::default()
}

/// Named preset kept alongside [`variance_scaling_initializer`]; see
/// [`VarianceScaling::he_uniform`].
pub fn he_uniform_initializer(factor: f64, scale_factor: f64) -> VarianceScaling {
    VarianceScaling::he_uniform()
        .with_factor(factor)
        .with_scale_factor(scale_factor)
}
