//! The optimization driver: partitions variables, compiles the objective
//! and its derivatives into evaluation containers, hands them to the
//! external minimizer, and assembles the result.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use qn_types::{
    Assignment, CompileOptions, ConfigError, EvalResult, MinimizerError, OptimizerConfig,
    QnResult, Variable, VariablePair,
};

use crate::container::{
    EnergyEvaluator, EvalHistory, EvaluationContainer, Evaluator, GradientEvaluator,
    HessianEvaluator, Matrix,
};
use crate::history::{Evaluation, History, IterationRecord, RunHistory, RunRecord};
use crate::method::{classify, normalize_method, DerivativePlan, DerivativeSource, MethodTier};
use crate::minimizer::{Derivative, MinimizeRequest, Minimizer, MinimizerOutput};
use crate::objective::{GradientSpec, HessianSpec, Objective};
use crate::partition::{ActiveKeys, Partition, Partitioner};
use crate::recorder::IterationRecorder;

/// Lifecycle of one driver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    Configuring,
    Compiling,
    Running,
    Finalizing,
}

/// What to optimize: the objective, which variables move, where they
/// start, and where derivatives come from.
pub struct Problem<'a, O> {
    objective: &'a O,
    variables: Option<Vec<Variable>>,
    initial_values: Option<Assignment>,
    gradient: GradientSpec<O>,
    hessian: HessianSpec<O>,
}

impl<'a, O: Objective> Problem<'a, O> {
    pub fn new(objective: &'a O) -> Self {
        Self {
            objective,
            variables: None,
            initial_values: None,
            gradient: GradientSpec::Automatic,
            hessian: HessianSpec::Automatic,
        }
    }

    /// Restrict optimization to these variables, in this order.
    pub fn with_variables<I, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Variable>,
    {
        self.variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_initial_values(mut self, values: Assignment) -> Self {
        self.initial_values = Some(values);
        self
    }

    pub fn with_gradient(mut self, gradient: GradientSpec<O>) -> Self {
        self.gradient = gradient;
        self
    }

    pub fn with_hessian(mut self, hessian: HessianSpec<O>) -> Self {
        self.hessian = hessian;
        self
    }
}

/// Final energy, final full assignment, history and raw minimizer output.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    energy: f64,
    angles: Assignment,
    history: History,
    minimizer_output: MinimizerOutput,
}

impl OptimizationResult {
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Active and passive variables at the final point.
    pub fn angles(&self) -> &Assignment {
        &self.angles
    }

    pub fn angle(&self, variable: &Variable) -> Option<f64> {
        self.angles.get(variable).copied()
    }

    /// Snapshot of the driver's history after this run.
    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn minimizer_output(&self) -> &MinimizerOutput {
        &self.minimizer_output
    }
}

/// Drives an external [`Minimizer`] over an expensive [`Objective`].
///
/// The driver owns the history aggregator; it survives across calls to
/// [`Optimizer::optimize`] and is cleared by [`Optimizer::reset_history`]
/// or, when `reset_history` is configured, at the start of every run.
pub struct Optimizer<M> {
    config: OptimizerConfig,
    method: String,
    tier: MethodTier,
    minimizer: M,
    history: History,
    state: DriverState,
}

impl<M: Minimizer> Optimizer<M> {
    /// Validates the configuration and classifies the method.
    pub fn new(config: OptimizerConfig, minimizer: M) -> QnResult<Self> {
        config.validate()?;
        let tier = classify(&config.method)?;
        Ok(Self {
            method: normalize_method(&config.method),
            tier,
            config,
            minimizer,
            history: History::new(),
            state: DriverState::Configuring,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn tier(&self) -> MethodTier {
        self.tier
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn reset_history(&mut self) {
        self.history.reset();
    }

    pub fn minimizer(&self) -> &M {
        &self.minimizer
    }

    fn transition(&mut self, next: DriverState) {
        debug!("Driver state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn partition<O: Objective>(
        &self,
        objective: &O,
        variables: Option<&[Variable]>,
        initial_values: Option<&Assignment>,
    ) -> QnResult<Partition> {
        let partitioner = Partitioner {
            autocomplete: self.config.autocomplete,
            silent: self.config.silent,
        };
        let all_variables = objective.extract_variables();
        let partition = match self.config.seed {
            Some(seed) => partitioner.split(
                &all_variables,
                variables,
                initial_values,
                &mut StdRng::seed_from_u64(seed),
            )?,
            None => partitioner.split(&all_variables, variables, initial_values, &mut rand::rng())?,
        };

        if partition.keys.is_empty() {
            return Err(qn_types::config_error!(
                "variables",
                "no active variables to optimize"
            ));
        }
        Ok(partition)
    }

    fn bind<E: Evaluator>(&self, evaluator: E, partition: &Partition) -> EvaluationContainer<E> {
        EvaluationContainer::new(
            evaluator,
            partition.keys.clone(),
            partition.passive.clone(),
            self.config.eval_settings(),
            self.config.effective_print_level(),
        )
    }

    /// Run one optimization.
    ///
    /// Configuration problems fail before the minimizer is invoked. Errors
    /// raised by the minimizer (including evaluation errors it propagates)
    /// are returned after the partial history has been saved.
    pub fn optimize<O: Objective>(&mut self, problem: Problem<'_, O>) -> QnResult<OptimizationResult> {
        self.transition(DriverState::Configuring);
        let Problem {
            objective,
            variables,
            initial_values,
            gradient,
            hessian,
        } = problem;

        let partition = self.partition(objective, variables.as_deref(), initial_values.as_ref())?;
        let keys = partition.keys.clone();
        let bounds = self
            .config
            .method_bounds
            .as_ref()
            .map(|b| keys.align_bounds(b))
            .transpose()?;
        let plan = DerivativePlan::new(self.tier, &gradient, &hessian);

        self.transition(DriverState::Compiling);
        let compile_options = self.config.compile_options();
        let energy = self.bind(
            EnergyEvaluator::new(objective.compile(&compile_options)?),
            &partition,
        );

        let mut gradient_expvals = 0;
        let gradient_container = match plan.gradient {
            DerivativeSource::Compile => {
                let (evaluator, expvals) =
                    compile_gradient(objective, &gradient, &keys, &compile_options)?;
                gradient_expvals = expvals;
                Some(self.bind(evaluator, &partition))
            }
            _ => None,
        };

        let mut hessian_expvals = 0;
        let hessian_container = match plan.hessian {
            DerivativeSource::Compile => {
                let (evaluator, expvals) =
                    compile_hessian(objective, &hessian, &keys, &compile_options)?;
                hessian_expvals = expvals;
                Some(self.bind(evaluator, &partition))
            }
            _ => None,
        };

        if !self.config.silent {
            info!("{}", self);
            info!("Starting {} optimization", self.method);
            info!(
                "Objective: {} expectation values",
                objective.count_expectation_values()
            );
            info!("Gradient from {}", gradient.describe());
            if gradient_container.is_some() {
                info!("Gradient: {} expectation values", gradient_expvals);
            }
            if hessian_container.is_some() {
                info!("Hessian from {}", hessian.describe());
                info!("Hessian: {} expectation values", hessian_expvals);
            }
            if let Some(bounds) = &self.config.method_bounds {
                info!("Bounds: {} entries", bounds.len());
            }
            info!(
                "Active variables: {}, passive variables: {}",
                keys.len(),
                partition.passive.len()
            );
        }

        if self.config.save_history && self.config.reset_history {
            self.history.reset();
        }

        self.transition(DriverState::Running);
        let mut run = RunRecord::new(&self.method, self.tier);

        let fun = |x: &[f64]| energy.call(x);
        let jac_fn = gradient_container
            .as_ref()
            .map(|g| move |x: &[f64]| g.call(x));
        let hess_fn = hessian_container
            .as_ref()
            .map(|h| move |x: &[f64]| h.call(x));

        let jac: Derivative<'_, Vec<f64>> = match (&jac_fn, plan.gradient) {
            (Some(f), _) => Derivative::Callable(f as &dyn Fn(&[f64]) -> EvalResult<Vec<f64>>),
            (None, DerivativeSource::Numerical(scheme)) => Derivative::Scheme(scheme),
            _ => Derivative::Absent,
        };
        let hess: Derivative<'_, Matrix> = match (&hess_fn, plan.hessian) {
            (Some(f), _) => Derivative::Callable(f as &dyn Fn(&[f64]) -> EvalResult<Matrix>),
            (None, DerivativeSource::Numerical(scheme)) => Derivative::Scheme(scheme),
            _ => Derivative::Absent,
        };

        let mut recorder = IterationRecorder::new(
            &energy,
            gradient_container.as_ref(),
            hessian_container.as_ref(),
        );
        let mut on_iteration = |_xk: &[f64]| recorder.record();

        let request = MinimizeRequest {
            fun: &fun,
            x0: partition.x0.clone(),
            jac,
            hess,
            bounds,
            constraints: &self.config.method_constraints,
            method: &self.method,
            tol: self.config.tol,
            options: self.config.effective_method_options(),
            callback: Some(&mut on_iteration),
        };
        let outcome = self.minimizer.minimize(request);

        self.transition(DriverState::Finalizing);
        let real_iterations = recorder.real_iterations();
        let recorded = recorder.into_records();

        let energy_history = energy.take_history();
        let gradient_history = gradient_container.as_ref().map(|g| g.take_history());
        let hessian_history = hessian_container.as_ref().map(|h| h.take_history());

        let fallback = real_iterations == 0;
        let iterations = if fallback {
            debug!(
                "Iteration callback never fired; counting {} energy evaluations as iterations",
                energy_history.len()
            );
            fallback_iterations(
                &keys,
                &energy_history,
                gradient_history.as_ref(),
                hessian_history.as_ref(),
            )
        } else {
            recorded
        };

        let outcome = outcome.and_then(|output| {
            let angles = partition.merge(&output.x).map_err(|e| MinimizerError::Internal {
                message: format!("final point does not match the active variables: {e}"),
            })?;
            Ok((output, angles))
        });

        run.iterations = iterations.len();
        run.evaluations = energy_history.len();
        run.fallback = fallback;
        match &outcome {
            Ok((output, _)) => run.mark_completed(output.success),
            Err(e) => run.mark_failed(e.to_string()),
        }

        if self.config.save_history {
            self.history.absorb(RunHistory {
                run,
                iterations,
                energy_evaluations: Evaluation::from_history(energy_history, &keys),
                gradient_evaluations: gradient_history
                    .map(|h| Evaluation::from_history(h, &keys))
                    .unwrap_or_default(),
                hessian_evaluations: hessian_history
                    .map(|h| Evaluation::from_history(h, &keys))
                    .unwrap_or_default(),
            });
        }

        let (output, angles) = outcome?;

        if !self.config.silent {
            info!(
                "Finished {} optimization: E={:+.8} success={} message={}",
                self.method, output.fun, output.success, output.message
            );
        }

        Ok(OptimizationResult {
            energy: output.fun,
            angles,
            history: self.history.clone(),
            minimizer_output: output,
        })
    }
}

impl<M> fmt::Display for Optimizer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Optimizer[{}] {}", self.tier, self.config)
    }
}

/// One compiled partial derivative per active key.
fn compile_gradient<O: Objective>(
    objective: &O,
    spec: &GradientSpec<O>,
    keys: &ActiveKeys,
    options: &CompileOptions,
) -> QnResult<(GradientEvaluator, usize)> {
    let mut partials = HashMap::with_capacity(keys.len());
    let mut expvals = 0;
    for key in keys.iter() {
        let compiled = match spec {
            GradientSpec::Explicit(map) => {
                let partial = map.get(key).ok_or_else(|| ConfigError::MissingDerivative {
                    derivative: format!("d/d{key}"),
                })?;
                expvals += partial.count_expectation_values();
                partial.compile(options)?
            }
            _ => {
                let partial = objective.differentiate(key)?;
                expvals += partial.count_expectation_values();
                partial.compile(options)?
            }
        };
        partials.insert(key.clone(), compiled);
    }
    Ok((GradientEvaluator::new(keys, partials)?, expvals))
}

/// One compiled second derivative per unordered pair of active keys.
fn compile_hessian<O: Objective>(
    objective: &O,
    spec: &HessianSpec<O>,
    keys: &ActiveKeys,
    options: &CompileOptions,
) -> QnResult<(HessianEvaluator, usize)> {
    let mut entries = HashMap::new();
    let mut expvals = 0;
    for (i, ki) in keys.iter().enumerate() {
        for kj in keys.iter().skip(i) {
            let pair = VariablePair(ki.clone(), kj.clone());
            let compiled = match spec {
                HessianSpec::Explicit(map) => {
                    let second = map
                        .get(&pair)
                        .or_else(|| map.get(&pair.swapped()))
                        .ok_or_else(|| ConfigError::MissingDerivative {
                            derivative: format!("d2/d{ki}d{kj}"),
                        })?;
                    expvals += second.count_expectation_values();
                    second.compile(options)?
                }
                _ => {
                    let second = objective.differentiate(ki)?.differentiate(kj)?;
                    expvals += second.count_expectation_values();
                    second.compile(options)?
                }
            };
            entries.insert(pair, compiled);
        }
    }
    Ok((HessianEvaluator::new(keys.clone(), entries)?, expvals))
}

/// Every raw energy call becomes one iteration. Derivative entries are
/// matched by call index and are best-effort: gradient and Hessian calls
/// need not line up with energy calls.
fn fallback_iterations(
    keys: &ActiveKeys,
    energy: &EvalHistory<f64>,
    gradient: Option<&EvalHistory<Vec<f64>>>,
    hessian: Option<&EvalHistory<Matrix>>,
) -> Vec<IterationRecord> {
    energy
        .values
        .iter()
        .zip(&energy.parameters)
        .enumerate()
        .map(|(i, (value, angles))| IterationRecord {
            energy: *value,
            angles: angles.clone(),
            gradient: gradient.and_then(|g| g.values.get(i).cloned()),
            hessian: hessian.and_then(|h| h.values.get(i).cloned()),
            keys: keys.clone(),
        })
        .collect()
}

/// One-shot convenience: build a driver and run it once.
pub fn minimize<O, M>(
    problem: Problem<'_, O>,
    minimizer: M,
    config: OptimizerConfig,
) -> QnResult<OptimizationResult>
where
    O: Objective,
    M: Minimizer,
{
    Optimizer::new(config, minimizer)?.optimize(problem)
}
