//! The calling convention of the external minimization routine.
//!
//! Field names follow the conventional
//! `minimize(fun, x0, jac, hess, bounds, constraints, method, tol, options, callback)`
//! contract so existing method implementations can be wrapped directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use qn_types::{Bound, EvalResult, MethodOptions, QnResult};

use crate::container::Matrix;
use crate::objective::FiniteDifference;

/// Objective callback: positional vector in, energy out.
pub type ObjectiveFn<'a> = &'a dyn Fn(&[f64]) -> EvalResult<f64>;

/// Per-iteration callback, called with the current point.
pub type IterationCallback<'a> = &'a mut dyn FnMut(&[f64]);

/// How the minimizer obtains a derivative.
pub enum Derivative<'a, T> {
    /// Evaluate this callback.
    Callable(&'a dyn Fn(&[f64]) -> EvalResult<T>),
    /// Approximate with the named finite-difference scheme.
    Scheme(FiniteDifference),
    /// Not provided.
    Absent,
}

impl<'a, T> Derivative<'a, T> {
    pub fn scheme(&self) -> Option<FiniteDifference> {
        match self {
            Self::Scheme(scheme) => Some(*scheme),
            _ => None,
        }
    }

    pub fn callable(&self) -> Option<&'a dyn Fn(&[f64]) -> EvalResult<T>> {
        match self {
            Self::Callable(f) => Some(*f),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Derivative<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("Callable"),
            Self::Scheme(scheme) => write!(f, "Scheme({scheme})"),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

/// One invocation of the external minimizer.
pub struct MinimizeRequest<'a> {
    pub fun: ObjectiveFn<'a>,
    pub x0: Vec<f64>,
    pub jac: Derivative<'a, Vec<f64>>,
    pub hess: Derivative<'a, Matrix>,
    /// One entry per active variable, `None` meaning unbounded.
    pub bounds: Option<Vec<Option<Bound>>>,
    pub constraints: &'a Value,
    /// Upper-case method name.
    pub method: &'a str,
    pub tol: Option<f64>,
    pub options: MethodOptions,
    pub callback: Option<IterationCallback<'a>>,
}

impl MinimizeRequest<'_> {
    /// `options["maxiter"]` as an integer, if present.
    pub fn maxiter(&self) -> Option<usize> {
        self.options
            .get("maxiter")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }

    /// `options["disp"]`, defaulting to false.
    pub fn disp(&self) -> bool {
        self.options
            .get("disp")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// What the external minimizer reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerOutput {
    /// Final point, positioned like `x0`.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    pub success: bool,
    pub message: String,
    /// Iterations performed, when the method reports them.
    pub nit: Option<usize>,
    /// Objective evaluations, when the method reports them.
    pub nfev: Option<usize>,
    /// Method-specific extras.
    pub raw: Value,
}

/// A general-purpose multivariate minimization routine.
///
/// Evaluation errors returned by `fun`, `jac` or `hess` should abort the run
/// and be returned as the error of `minimize`.
pub trait Minimizer {
    fn minimize(&mut self, request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput>;
}

impl<M: Minimizer + ?Sized> Minimizer for &mut M {
    fn minimize(&mut self, request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput> {
        (**self).minimize(request)
    }
}

impl<M: Minimizer + ?Sized> Minimizer for Box<M> {
    fn minimize(&mut self, request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput> {
        (**self).minimize(request)
    }
}
