//! History aggregation across driver invocations.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use qn_types::{Assignment, QnResult};

use crate::container::{EvalHistory, Matrix};
use crate::method::MethodTier;
use crate::partition::ActiveKeys;

/// Unique run identifier.
pub type RunId = Uuid;

/// Snapshot taken once per outer iteration of the minimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub energy: f64,
    /// Active vector of the latest energy evaluation.
    pub angles: Vec<f64>,
    pub gradient: Option<Vec<f64>>,
    pub hessian: Option<Matrix>,
    pub keys: ActiveKeys,
}

impl IterationRecord {
    /// The active values as a mapping.
    pub fn assignment(&self) -> Assignment {
        self.keys
            .iter()
            .cloned()
            .zip(self.angles.iter().copied())
            .collect()
    }
}

/// One raw call of an evaluation container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation<T> {
    pub value: T,
    pub angles: Vec<f64>,
    pub keys: ActiveKeys,
}

impl<T> Evaluation<T> {
    pub(crate) fn from_history(history: EvalHistory<T>, keys: &ActiveKeys) -> Vec<Self> {
        history
            .values
            .into_iter()
            .zip(history.parameters)
            .map(|(value, angles)| Self {
                value,
                angles,
                keys: keys.clone(),
            })
            .collect()
    }
}

/// Bookkeeping for one driver invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: RunId,
    pub method: String,
    pub tier: MethodTier,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Outer iterations recorded for this run.
    pub iterations: usize,
    /// Raw energy evaluations.
    pub evaluations: usize,
    /// The callback never fired and every raw energy call was counted as
    /// an iteration.
    pub fallback: bool,
    pub success: bool,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(method: &str, tier: MethodTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.to_string(),
            tier,
            started_at: Utc::now(),
            finished_at: None,
            iterations: 0,
            evaluations: 0,
            fallback: false,
            success: false,
            error: None,
        }
    }

    pub fn mark_completed(&mut self, success: bool) {
        self.success = success;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.success = false;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Everything one run contributes to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHistory {
    pub run: RunRecord,
    pub iterations: Vec<IterationRecord>,
    pub energy_evaluations: Vec<Evaluation<f64>>,
    pub gradient_evaluations: Vec<Evaluation<Vec<f64>>>,
    pub hessian_evaluations: Vec<Evaluation<Matrix>>,
}

/// Energies, angles, gradients and Hessians accumulated over one or more
/// runs. Owned by the driver and cleared with [`History::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct History {
    runs: Vec<RunRecord>,
    iterations: Vec<IterationRecord>,
    energy_evaluations: Vec<Evaluation<f64>>,
    gradient_evaluations: Vec<Evaluation<Vec<f64>>>,
    hessian_evaluations: Vec<Evaluation<Matrix>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty() && self.iterations.is_empty() && self.energy_evaluations.is_empty()
    }

    /// Append one run's records.
    pub fn absorb(&mut self, run: RunHistory) {
        self.runs.push(run.run);
        self.iterations.extend(run.iterations);
        self.energy_evaluations.extend(run.energy_evaluations);
        self.gradient_evaluations.extend(run.gradient_evaluations);
        self.hessian_evaluations.extend(run.hessian_evaluations);
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn iterations(&self) -> &[IterationRecord] {
        &self.iterations
    }

    /// Energy per outer iteration.
    pub fn energies(&self) -> Vec<f64> {
        self.iterations.iter().map(|r| r.energy).collect()
    }

    /// Active values per outer iteration.
    pub fn angles(&self) -> Vec<Assignment> {
        self.iterations.iter().map(IterationRecord::assignment).collect()
    }

    /// Gradient per outer iteration, for iterations that have one.
    pub fn gradients(&self) -> Vec<Vec<f64>> {
        self.iterations
            .iter()
            .filter_map(|r| r.gradient.clone())
            .collect()
    }

    /// Hessian per outer iteration, for iterations that have one.
    pub fn hessians(&self) -> Vec<Matrix> {
        self.iterations
            .iter()
            .filter_map(|r| r.hessian.clone())
            .collect()
    }

    pub fn energy_evaluations(&self) -> &[Evaluation<f64>] {
        &self.energy_evaluations
    }

    pub fn gradient_evaluations(&self) -> &[Evaluation<Vec<f64>>] {
        &self.gradient_evaluations
    }

    pub fn hessian_evaluations(&self) -> &[Evaluation<Matrix>] {
        &self.hessian_evaluations
    }

    pub fn to_json(&self) -> QnResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
