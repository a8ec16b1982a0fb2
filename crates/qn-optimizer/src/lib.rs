//! # qn-optimizer
//!
//! Optimization driver for Quench.
//!
//! Wraps an external general-purpose minimizer around an expensive,
//! parameterized energy objective: splits variables into active and
//! passive sets, classifies the method by the derivatives it needs,
//! compiles energy, gradient and Hessian into recording evaluation
//! containers, and collects per-call and per-iteration history.

mod container;
mod driver;
mod history;
mod method;
mod minimizer;
mod objective;
mod partition;
mod recorder;

pub use container::{
    expand_symmetric, EnergyContainer, EnergyEvaluator, EvalHistory, EvaluationContainer,
    Evaluator, GradientContainer, GradientEvaluator, HessianContainer, HessianEvaluator, Matrix,
};
pub use driver::{minimize, DriverState, OptimizationResult, Optimizer, Problem};
pub use history::{Evaluation, History, IterationRecord, RunHistory, RunId, RunRecord};
pub use method::{
    available_methods, classify, normalize_method, DerivativePlan, DerivativeSource, MethodTier,
};
pub use minimizer::{
    Derivative, IterationCallback, MinimizeRequest, Minimizer, MinimizerOutput, ObjectiveFn,
};
pub use objective::{
    CompiledObjective, FiniteDifference, GradientSpec, HessianSpec, Objective, NUMERICAL_PREFIX,
};
pub use partition::{ActiveKeys, Partition, Partitioner};
pub use recorder::IterationRecorder;

pub use qn_types::*;
