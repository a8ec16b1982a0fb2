use thiserror::Error;

/// Main error type for Quench
#[derive(Error, Debug)]
pub enum QnError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Minimizer error: {0}")]
    Minimizer(#[from] MinimizerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Problems detected before any expensive evaluation happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown optimization method: {method}")]
    UnknownMethod { method: String },

    #[error("Unsupported numerical derivative option: {spec} (use e.g. numerical:2-point)")]
    UnsupportedScheme { spec: String },

    #[error("Bounds ordering mismatch: expected {expected:?}, found {found:?}")]
    BoundsOrdering {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("No initial value for active variable {variable}")]
    MissingInitialValue { variable: String },

    #[error("No derivative supplied for {derivative}")]
    MissingDerivative { derivative: String },

    #[error("Invalid option {option}: {message}")]
    InvalidOption { option: String, message: String },
}

/// Failures raised while evaluating a compiled objective.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Objective evaluation failed: {message}")]
    Failed { message: String },

    #[error("Parameter vector has {found} entries, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Faults reported by the external minimization routine itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MinimizerError {
    #[error("Minimizer aborted: {message}")]
    Aborted { message: String },

    #[error("Minimizer internal fault: {message}")]
    Internal { message: String },
}

/// Result type alias for Quench operations
pub type QnResult<T> = Result<T, QnError>;

/// Result type for a single compiled-objective call
pub type EvalResult<T> = Result<T, EvaluationError>;

/// Macro for creating configuration errors on an option
#[macro_export]
macro_rules! config_error {
    ($option:expr, $($arg:tt)*) => {
        $crate::QnError::Config($crate::ConfigError::InvalidOption {
            option: $option.to_string(),
            message: format!($($arg)*),
        })
    };
}
