//! Method registry and capability tiers.

use qn_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::objective::{FiniteDifference, GradientSpec, HessianSpec};

const DERIVATIVE_FREE_METHODS: &[&str] = &["NELDER-MEAD", "COBYLA", "POWELL", "SLSQP"];
const GRADIENT_BASED_METHODS: &[&str] = &["L-BFGS-B", "BFGS", "CG", "TNC"];
const HESSIAN_BASED_METHODS: &[&str] = &[
    "TRUST-KRYLOV",
    "NEWTON-CG",
    "DOGLEG",
    "TRUST-NCG",
    "TRUST-EXACT",
    "TRUST-CONSTR",
];

/// What a minimization method needs from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodTier {
    DerivativeFree,
    GradientBased,
    HessianBased,
}

impl MethodTier {
    pub const ALL: [MethodTier; 3] = [
        MethodTier::DerivativeFree,
        MethodTier::GradientBased,
        MethodTier::HessianBased,
    ];

    /// Registered method names for this tier, upper case.
    pub fn methods(self) -> &'static [&'static str] {
        match self {
            Self::DerivativeFree => DERIVATIVE_FREE_METHODS,
            Self::GradientBased => GRADIENT_BASED_METHODS,
            Self::HessianBased => HESSIAN_BASED_METHODS,
        }
    }

    pub fn requires_gradient(self) -> bool {
        matches!(self, Self::GradientBased | Self::HessianBased)
    }

    pub fn requires_hessian(self) -> bool {
        matches!(self, Self::HessianBased)
    }
}

impl fmt::Display for MethodTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DerivativeFree => "derivative-free",
            Self::GradientBased => "gradient-based",
            Self::HessianBased => "hessian-based",
        };
        f.write_str(name)
    }
}

/// Canonical form of a method name.
pub fn normalize_method(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Map a method name to its tier.
pub fn classify(name: &str) -> Result<MethodTier, ConfigError> {
    let normalized = normalize_method(name);
    MethodTier::ALL
        .into_iter()
        .find(|tier| tier.methods().contains(&normalized.as_str()))
        .ok_or_else(|| ConfigError::UnknownMethod {
            method: name.to_string(),
        })
}

/// Registered method names for the selected tiers.
pub fn available_methods(energy: bool, gradient: bool, hessian: bool) -> Vec<&'static str> {
    let mut methods = Vec::new();
    if energy {
        methods.extend_from_slice(DERIVATIVE_FREE_METHODS);
    }
    if gradient {
        methods.extend_from_slice(GRADIENT_BASED_METHODS);
    }
    if hessian {
        methods.extend_from_slice(HESSIAN_BASED_METHODS);
    }
    methods
}

/// How one derivative reaches the minimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeSource {
    /// Compile expressions and wrap them in an evaluation container.
    Compile,
    /// Forward the scheme name; no container is built.
    Numerical(FiniteDifference),
    /// The method does not use this derivative.
    Skip,
}

/// Derivative handling decided from the tier and the caller's requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivativePlan {
    pub gradient: DerivativeSource,
    pub hessian: DerivativeSource,
}

impl DerivativePlan {
    /// Numerical requests are forwarded whatever the tier. Compiled
    /// derivatives are only built when the tier requires them.
    pub fn new<O>(tier: MethodTier, gradient: &GradientSpec<O>, hessian: &HessianSpec<O>) -> Self {
        let gradient = match gradient {
            GradientSpec::Numerical(scheme) => DerivativeSource::Numerical(*scheme),
            _ if tier.requires_gradient() => DerivativeSource::Compile,
            _ => DerivativeSource::Skip,
        };
        let hessian = match hessian {
            HessianSpec::Numerical(scheme) => DerivativeSource::Numerical(*scheme),
            _ if tier.requires_hessian() => DerivativeSource::Compile,
            _ => DerivativeSource::Skip,
        };
        Self { gradient, hessian }
    }
}
