//! Error types shared by the initialisers, regularisers, spectral
//! normalisation and layer constructors.
//!
//! Every failure here is structural: a bad shape, an unrecognised enum
//! string or a degenerate weight. Nothing is retried.

use thiserror::Error;

/// Result type alias for layer operations
pub type OpsResult<T> = Result<T, OpsError>;

/// Error type for initialisation, regularisation, spectral norm and layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpsError {
    /// Two shapes that must agree did not
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Tensor rank does not fit the operation
    #[error("invalid rank in {context}: expected {expected}, got {got}")]
    InvalidRank {
        context: String,
        expected: String,
        got: usize,
    },

    /// Fan statistics were requested for a scalar shape
    #[error("cannot compute fan-in/fan-out of an empty shape")]
    EmptyShape,

    /// The fan statistic used to scale the variance is zero
    #[error("degenerate fan for shape {shape:?}: every dimension must be positive")]
    DegenerateFan { shape: Vec<usize> },

    /// Unrecognised variance-scaling mode
    #[error("invalid variance scaling mode '{0}': expected FAN_IN, FAN_OUT or FAN_AVG")]
    InvalidMode(String),

    /// Unrecognised padding or pad type
    #[error("invalid padding '{0}'")]
    InvalidPadding(String),

    /// The power-iteration estimate of the largest singular value vanished
    #[error("spectral norm of '{key}' is degenerate (sigma = {sigma:e})")]
    DegenerateSpectrum { key: String, sigma: f32 },

    /// Lookup of a parameter that was never created
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Parameter value outside its allowed range
    #[error("invalid parameter '{parameter}' = '{value}': must satisfy {constraint}")]
    InvalidParameter {
        parameter: String,
        value: String,
        constraint: String,
    },
}

impl OpsError {
    pub(crate) fn shape_mismatch(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        OpsError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub(crate) fn invalid_rank(context: impl Into<String>, expected: impl Into<String>, got: usize) -> Self {
        OpsError::InvalidRank {
            context: context.into(),
            expected: expected.into(),
            got,
        }
    }

    pub(crate) fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        OpsError::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }
}

/// Errors raised while loading an [`crate::config::OpsConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Underlying I/O failure while reading or writing checkpoint files.
    #[error("I/O error while accessing checkpoint: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error from the binary codec.
    #[error("failed to (de)serialize checkpoint payload: {0}")]
    Serialization(#[from] bincode::Error),
    /// The checkpoint was well formed but carries an incompatible schema version.
    #[error("checkpoint version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    /// The checkpoint did not match the expected structure.
    #[error("checkpoint file has invalid structure: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let err = OpsError::InvalidPadding("REFELECT".into());
        assert!(err.to_string().contains("REFELECT"));

        let err = OpsError::InvalidMode("FAN_MAX".into());
        assert!(err.to_string().contains("FAN_MAX"));
    }

    #[test]
    fn shape_mismatch_reports_both_shapes() {
        let err = OpsError::shape_mismatch("assign", &[3, 3], &[3, 4]);
        let msg = err.to_string();
        assert!(msg.contains("[3, 3]"));
        assert!(msg.contains("[3, 4]"));
    }
}
