//! The boundary to the expression layer: objectives, their compiled form,
//! and how the caller asks for derivatives.

use qn_types::{
    Assignment, CompileOptions, ConfigError, EvalResult, EvalSettings, QnResult, Variable,
    VariablePair,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Prefix marking a request for the minimizer's own finite differencing.
pub const NUMERICAL_PREFIX: &str = "numerical:";

/// A parameterized energy expression.
///
/// Compilation and derivative construction belong to the expression layer;
/// the driver only calls them.
pub trait Objective {
    /// Every variable the expression depends on, in a stable order.
    fn extract_variables(&self) -> Vec<Variable>;

    /// The partial derivative with respect to `variable`.
    fn differentiate(&self, variable: &Variable) -> QnResult<Self>
    where
        Self: Sized;

    /// Build the executable evaluator.
    fn compile(&self, options: &CompileOptions) -> QnResult<Box<dyn CompiledObjective>>;

    /// Number of expensive sub-evaluations per call, used in run banners.
    fn count_expectation_values(&self) -> usize {
        1
    }
}

/// An executable evaluator taking a full variable assignment.
pub trait CompiledObjective {
    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings) -> EvalResult<f64>;
}

impl<F> CompiledObjective for F
where
    F: Fn(&Assignment, &EvalSettings) -> EvalResult<f64>,
{
    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings) -> EvalResult<f64> {
        self(assignment, settings)
    }
}

/// Finite-difference schemes the external minimizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FiniteDifference {
    #[serde(rename = "2-point")]
    TwoPoint,
    #[serde(rename = "3-point")]
    ThreePoint,
    #[serde(rename = "cs")]
    ComplexStep,
}

impl FiniteDifference {
    /// The scheme name forwarded to the minimizer.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TwoPoint => "2-point",
            Self::ThreePoint => "3-point",
            Self::ComplexStep => "cs",
        }
    }

    /// Parse a full `numerical:<scheme>` request.
    pub fn from_request(request: &str) -> Result<Self, ConfigError> {
        let unsupported = || ConfigError::UnsupportedScheme {
            spec: request.to_string(),
        };
        request
            .trim()
            .strip_prefix(NUMERICAL_PREFIX)
            .ok_or_else(unsupported)?
            .parse::<Self>()
            .map_err(|_| unsupported())
    }
}

impl FromStr for FiniteDifference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2-point" => Ok(Self::TwoPoint),
            "3-point" => Ok(Self::ThreePoint),
            "cs" => Ok(Self::ComplexStep),
            _ => Err(ConfigError::UnsupportedScheme {
                spec: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FiniteDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the gradient comes from.
pub enum GradientSpec<O> {
    /// Differentiate the objective with respect to every active variable.
    Automatic,
    /// Caller-supplied partial derivatives keyed by variable.
    Explicit(HashMap<Variable, O>),
    /// Let the minimizer difference the energy itself.
    Numerical(FiniteDifference),
}

impl<O> GradientSpec<O> {
    /// Parse a `numerical:<scheme>` request.
    pub fn numerical(request: &str) -> QnResult<Self> {
        Ok(Self::Numerical(FiniteDifference::from_request(request)?))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Automatic => "automatic".to_string(),
            Self::Explicit(map) => format!("{} explicit partials", map.len()),
            Self::Numerical(scheme) => format!("{NUMERICAL_PREFIX}{scheme}"),
        }
    }
}

impl<O> Default for GradientSpec<O> {
    fn default() -> Self {
        Self::Automatic
    }
}

/// Where the Hessian comes from.
pub enum HessianSpec<O> {
    /// Differentiate the objective twice for every active pair.
    Automatic,
    /// Caller-supplied second derivatives. Each unordered pair may be given
    /// in either orientation.
    Explicit(HashMap<VariablePair, O>),
    /// Let the minimizer difference the gradient itself.
    Numerical(FiniteDifference),
}

impl<O> HessianSpec<O> {
    /// Parse a `numerical:<scheme>` request.
    pub fn numerical(request: &str) -> QnResult<Self> {
        Ok(Self::Numerical(FiniteDifference::from_request(request)?))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Automatic => "automatic".to_string(),
            Self::Explicit(map) => format!("{} explicit second partials", map.len()),
            Self::Numerical(scheme) => format!("{NUMERICAL_PREFIX}{scheme}"),
        }
    }
}

impl<O> Default for HessianSpec<O> {
    fn default() -> Self {
        Self::Automatic
    }
}
