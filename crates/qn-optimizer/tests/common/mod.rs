//! Shared fixtures: a separable quadratic objective and a few minimizers
//! standing in for an external optimization library.

#![allow(dead_code)]

use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

use qn_optimizer::{
    Assignment, Bound, CompileOptions, CompiledObjective, Derivative, EvalResult, EvalSettings,
    EvaluationError, FiniteDifference, MethodOptions, MinimizeRequest, Minimizer, MinimizerError,
    MinimizerOutput, Objective, QnResult, Variable,
};

/// `quadratic * x^2 + linear * x` in one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub variable: Variable,
    pub quadratic: f64,
    pub linear: f64,
}

/// A separable polynomial of degree two. Closed under differentiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub terms: Vec<Term>,
    pub constant: f64,
    /// Evaluations fail once this many calls have succeeded.
    pub fail_after: Option<usize>,
    /// Successful evaluations across every compiled copy.
    pub calls: Rc<Cell<usize>>,
}

impl Expr {
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            constant: 0.0,
            fail_after: None,
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// Adds `(x - center)^2`.
    pub fn well(mut self, variable: &str, center: f64) -> Self {
        self.terms.push(Term {
            variable: Variable::from(variable),
            quadratic: 1.0,
            linear: -2.0 * center,
        });
        self.constant += center * center;
        self
    }

    /// Adds `slope * x`.
    pub fn slope(mut self, variable: &str, slope: f64) -> Self {
        self.terms.push(Term {
            variable: Variable::from(variable),
            quadratic: 0.0,
            linear: slope,
        });
        self
    }

    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    pub fn value(&self, values: &Assignment) -> f64 {
        self.constant
            + self
                .terms
                .iter()
                .map(|t| {
                    let x = values[&t.variable];
                    t.quadratic * x * x + t.linear * x
                })
                .sum::<f64>()
    }
}

impl Objective for Expr {
    fn extract_variables(&self) -> Vec<Variable> {
        let mut variables: Vec<Variable> = Vec::new();
        for term in &self.terms {
            if !variables.contains(&term.variable) {
                variables.push(term.variable.clone());
            }
        }
        variables
    }

    fn differentiate(&self, variable: &Variable) -> QnResult<Self> {
        let mut derivative = Self {
            terms: Vec::new(),
            constant: 0.0,
            fail_after: self.fail_after,
            calls: Rc::clone(&self.calls),
        };
        for term in self.terms.iter().filter(|t| &t.variable == variable) {
            derivative.constant += term.linear;
            if term.quadratic != 0.0 {
                derivative.terms.push(Term {
                    variable: variable.clone(),
                    quadratic: 0.0,
                    linear: 2.0 * term.quadratic,
                });
            }
        }
        Ok(derivative)
    }

    fn compile(&self, _: &CompileOptions) -> QnResult<Box<dyn CompiledObjective>> {
        let expr = self.clone();
        Ok(Box::new(
            move |values: &Assignment, _: &EvalSettings| -> EvalResult<f64> {
                let done = expr.calls.get();
                if expr.fail_after.is_some_and(|limit| done >= limit) {
                    return Err(EvaluationError::Failed {
                        message: "backend rejected the circuit".to_string(),
                    });
                }
                expr.calls.set(done + 1);
                Ok(expr.value(values))
            },
        ))
    }

    fn count_expectation_values(&self) -> usize {
        self.terms.len()
    }
}

/// `(a - 1)^2 + (b + 2)^2 + 0.5 * c`
pub fn bowl() -> Expr {
    Expr::new().well("a", 1.0).well("b", -2.0).slope("c", 0.5)
}

pub fn point(values: &[(&str, f64)]) -> Assignment {
    qn_optimizer::assignment(values.iter().copied())
}

fn finite_difference(
    fun: &dyn Fn(&[f64]) -> EvalResult<f64>,
    x: &[f64],
    scheme: FiniteDifference,
) -> EvalResult<Vec<f64>> {
    const H: f64 = 1e-6;
    let f0 = fun(x)?;
    let mut gradient = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        let mut forward = x.to_vec();
        forward[i] += H;
        let value = match scheme {
            FiniteDifference::TwoPoint => (fun(&forward)? - f0) / H,
            FiniteDifference::ThreePoint | FiniteDifference::ComplexStep => {
                let mut backward = x.to_vec();
                backward[i] -= H;
                (fun(&forward)? - fun(&backward)?) / (2.0 * H)
            }
        };
        gradient.push(value);
    }
    Ok(gradient)
}

fn clamp(x: &mut [f64], bounds: Option<&[Option<Bound>]>) {
    let Some(bounds) = bounds else { return };
    for (value, bound) in x.iter_mut().zip(bounds) {
        if let Some(bound) = bound {
            if let Some(lower) = bound.lower {
                *value = value.max(lower);
            }
            if let Some(upper) = bound.upper {
                *value = value.min(upper);
            }
        }
    }
}

/// Fixed-step projected gradient descent. Fires the callback once per
/// accepted step.
pub struct GradientDescent {
    pub step: f64,
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self { step: 0.25 }
    }
}

impl Minimizer for GradientDescent {
    fn minimize(&mut self, mut request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput> {
        let maxiter = request.maxiter().unwrap_or(100);
        let tol = request.tol.unwrap_or(1e-8);
        let mut x = request.x0.clone();
        let mut fun = (request.fun)(&x)?;
        let mut nit = 0;

        while nit < maxiter {
            let gradient = match &request.jac {
                Derivative::Callable(jac) => jac(&x)?,
                Derivative::Scheme(scheme) => finite_difference(request.fun, &x, *scheme)?,
                Derivative::Absent => {
                    return Err(MinimizerError::Aborted {
                        message: "gradient descent needs a gradient".to_string(),
                    }
                    .into())
                }
            };
            let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < tol {
                break;
            }
            for (xi, gi) in x.iter_mut().zip(&gradient) {
                *xi -= self.step * gi;
            }
            clamp(&mut x, request.bounds.as_deref());
            fun = (request.fun)(&x)?;
            nit += 1;
            if let Some(callback) = request.callback.as_mut() {
                callback(&x);
            }
        }

        Ok(MinimizerOutput {
            x,
            fun,
            success: nit < maxiter,
            message: "gradient descent finished".to_string(),
            nit: Some(nit),
            nfev: None,
            raw: json!({ "step": self.step }),
        })
    }
}

/// Walks a fixed number of points along the first axis without ever
/// firing the iteration callback.
pub struct SilentWalk {
    pub evaluations: usize,
}

impl Minimizer for SilentWalk {
    fn minimize(&mut self, request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput> {
        let mut x = request.x0.clone();
        let mut best = (request.fun)(&x)?;
        let mut best_x = x.clone();
        for _ in 1..self.evaluations {
            x[0] += 0.1;
            let value = (request.fun)(&x)?;
            if value < best {
                best = value;
                best_x = x.clone();
            }
        }
        Ok(MinimizerOutput {
            x: best_x,
            fun: best,
            success: true,
            message: "walk finished".to_string(),
            nit: None,
            nfev: Some(self.evaluations),
            raw: json!(null),
        })
    }
}

/// Captures what the driver hands over, evaluates every callable once at
/// `x0`, fires the callback once, and reports `x0` back.
#[derive(Default)]
pub struct Recording {
    pub x0: Vec<f64>,
    pub method: String,
    pub jac: String,
    pub hess: String,
    pub bounds: Option<Vec<Option<Bound>>>,
    pub constraints: serde_json::Value,
    pub tol: Option<f64>,
    pub options: MethodOptions,
    pub gradient: Option<Vec<f64>>,
    pub hessian: Option<Vec<Vec<f64>>>,
}

impl Minimizer for Recording {
    fn minimize(&mut self, mut request: MinimizeRequest<'_>) -> QnResult<MinimizerOutput> {
        self.x0 = request.x0.clone();
        self.method = request.method.to_string();
        self.jac = format!("{:?}", request.jac);
        self.hess = format!("{:?}", request.hess);
        self.bounds = request.bounds.clone();
        self.constraints = request.constraints.clone();
        self.tol = request.tol;
        self.options = request.options.clone();

        let fun = (request.fun)(&request.x0)?;
        if let Some(jac) = request.jac.callable() {
            self.gradient = Some(jac(&request.x0)?);
        }
        if let Some(hess) = request.hess.callable() {
            self.hessian = Some(hess(&request.x0)?);
        }
        if let Some(callback) = request.callback.as_mut() {
            callback(&request.x0);
        }

        Ok(MinimizerOutput {
            x: request.x0.clone(),
            fun,
            success: true,
            message: "recorded".to_string(),
            nit: Some(1),
            nfev: Some(1),
            raw: json!({}),
        })
    }
}
