//! Run configuration for the optimization driver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::errors::QnResult;
use crate::variable::{Bound, Variable};

/// Opaque mapping handed to the external minimizer as `options`.
pub type MethodOptions = Map<String, Value>;

/// Opaque backend options forwarded to every compiled-objective call.
pub type BackendOptions = Map<String, Value>;

/// Containers log a progress line per call at or above this print level.
pub const PROGRESS_PRINT_LEVEL: u8 = 3;

/// Every option the driver recognizes, with its default.
///
/// Deserialization rejects unknown keys, so a misspelled option fails at
/// construction instead of being silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Minimization method name, matched case-insensitively.
    pub method: String,

    /// Convergence tolerance forwarded as `tol`.
    pub tol: Option<f64>,

    /// Default for `method_options["maxiter"]`.
    pub maxiter: usize,

    /// Method-specific options forwarded verbatim (plus `maxiter` and `disp`).
    pub method_options: MethodOptions,

    /// Per-variable bounds; variables not mentioned are unbounded.
    pub method_bounds: Option<HashMap<Variable, Bound>>,

    /// Constraints forwarded to the minimizer untouched.
    pub method_constraints: Value,

    /// Suppresses banners, warnings and progress lines.
    pub silent: bool,

    /// Copy iteration and evaluation histories into the aggregator.
    pub save_history: bool,

    /// Clear the aggregator at the start of every run.
    pub reset_history: bool,

    pub print_level: u8,

    /// Shot count passed to every compiled-objective call.
    pub samples: Option<u64>,

    pub backend: Option<String>,

    pub backend_options: BackendOptions,

    /// Noise model, opaque to the driver and forwarded to compilation.
    pub noise: Option<Value>,

    /// Seed for auto-completed initial values.
    pub seed: Option<u64>,

    /// Fill missing initial values with uniform draws from [0, 2π).
    pub autocomplete: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: "BFGS".to_string(),
            tol: Some(1e-3),
            maxiter: 100,
            method_options: MethodOptions::new(),
            method_bounds: None,
            method_constraints: Value::Null,
            silent: false,
            save_history: true,
            reset_history: true,
            print_level: PROGRESS_PRINT_LEVEL,
            samples: None,
            backend: None,
            backend_options: BackendOptions::new(),
            noise: None,
            seed: None,
            autocomplete: true,
        }
    }
}

impl OptimizerConfig {
    pub fn new(method: &str) -> Self {
        Self::default().with_method(method)
    }

    /// Parse a JSON configuration, rejecting unknown keys.
    pub fn from_json(json: &str) -> QnResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| crate::config_error!("config", "{e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: Value) -> QnResult<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| crate::config_error!("config", "{e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the numeric options. The method name is checked by the
    /// method classifier.
    pub fn validate(&self) -> QnResult<()> {
        if let Some(tol) = self.tol {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(crate::config_error!(
                    "tol",
                    "must be a positive finite number, got {tol}"
                ));
            }
        }
        if self.maxiter == 0 {
            return Err(crate::config_error!("maxiter", "must be at least 1"));
        }
        if let Some(bounds) = &self.method_bounds {
            for (variable, bound) in bounds {
                if let (Some(lo), Some(hi)) = (bound.lower, bound.upper) {
                    if lo > hi {
                        return Err(crate::config_error!(
                            "method_bounds",
                            "lower bound above upper bound for {variable}"
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_tol(mut self, tol: Option<f64>) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_maxiter(mut self, maxiter: usize) -> Self {
        self.maxiter = maxiter;
        self
    }

    pub fn with_method_option(mut self, key: &str, value: Value) -> Self {
        self.method_options.insert(key.to_string(), value);
        self
    }

    pub fn with_bounds(mut self, bounds: HashMap<Variable, Bound>) -> Self {
        self.method_bounds = Some(bounds);
        self
    }

    pub fn with_constraints(mut self, constraints: Value) -> Self {
        self.method_constraints = constraints;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_save_history(mut self, save_history: bool) -> Self {
        self.save_history = save_history;
        self
    }

    pub fn with_reset_history(mut self, reset_history: bool) -> Self {
        self.reset_history = reset_history;
        self
    }

    pub fn with_samples(mut self, samples: Option<u64>) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_backend(mut self, backend: &str, options: BackendOptions) -> Self {
        self.backend = Some(backend.to_string());
        self.backend_options = options;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_autocomplete(mut self, autocomplete: bool) -> Self {
        self.autocomplete = autocomplete;
        self
    }

    /// The `options` mapping handed to the minimizer.
    pub fn effective_method_options(&self) -> MethodOptions {
        let mut options = self.method_options.clone();
        options
            .entry("maxiter")
            .or_insert_with(|| Value::from(self.maxiter));
        options.insert("disp".to_string(), Value::Bool(!self.silent));
        options
    }

    /// Print level seen by the evaluation containers.
    pub fn effective_print_level(&self) -> u8 {
        if self.silent {
            0
        } else {
            self.print_level
        }
    }

    pub fn eval_settings(&self) -> EvalSettings {
        EvalSettings {
            samples: self.samples,
            backend_options: self.backend_options.clone(),
        }
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            backend: self.backend.clone(),
            samples: self.samples,
            noise: self.noise.clone(),
        }
    }
}

impl fmt::Display for OptimizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tol = self.tol.map_or_else(|| "None".to_string(), |t| format!("{t:e}"));
        let samples = self
            .samples
            .map_or_else(|| "None".to_string(), |s| s.to_string());
        write!(
            f,
            "method={} tol={} maxiter={} samples={} backend={} save_history={}",
            self.method.to_uppercase(),
            tol,
            self.maxiter,
            samples,
            self.backend.as_deref().unwrap_or("auto"),
            self.save_history,
        )
    }
}

/// Per-call settings every compiled objective receives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvalSettings {
    pub samples: Option<u64>,
    pub backend_options: BackendOptions,
}

/// Settings forwarded to objective compilation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompileOptions {
    pub backend: Option<String>,
    pub samples: Option<u64>,
    pub noise: Option<Value>,
}
