//! Splitting the parameter set into active and passive variables, and the
//! single key ordering every positional vector of a run is built from.

use rand::Rng;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::{debug, warn};

use qn_types::{
    Assignment, Bound, ConfigError, EvalResult, EvaluationError, QnError, QnResult, Variable,
};

/// The ordering of active variables, fixed at the start of a run.
///
/// The initial vector, the bounds sequence, every container call and the
/// decoding of the final point all go through the same `ActiveKeys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveKeys(Arc<[Variable]>);

impl ActiveKeys {
    pub fn new(keys: Vec<Variable>) -> Self {
        Self(keys.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Variable] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Variable> {
        self.0.iter()
    }

    pub fn position(&self, variable: &Variable) -> Option<usize> {
        self.0.iter().position(|k| k == variable)
    }

    /// Positional vector of `values` in key order.
    pub fn encode(&self, values: &Assignment) -> QnResult<Vec<f64>> {
        self.iter()
            .map(|k| {
                values.get(k).copied().ok_or_else(|| {
                    QnError::from(ConfigError::MissingInitialValue {
                        variable: k.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Pair each entry of `x` with its key.
    pub fn decode(&self, x: &[f64]) -> EvalResult<Vec<(Variable, f64)>> {
        self.check_len(x.len())?;
        Ok(self.iter().cloned().zip(x.iter().copied()).collect())
    }

    /// Full assignment for one evaluation: `x` in key order merged with the
    /// passive values.
    pub fn assign(&self, x: &[f64], passive: &Assignment) -> EvalResult<Assignment> {
        self.check_len(x.len())?;
        let mut full = passive.clone();
        full.extend(self.iter().cloned().zip(x.iter().copied()));
        Ok(full)
    }

    pub fn check_len(&self, found: usize) -> EvalResult<()> {
        if found != self.len() {
            return Err(EvaluationError::DimensionMismatch {
                expected: self.len(),
                found,
            });
        }
        Ok(())
    }

    /// Fails unless `names` lists exactly these keys in this order.
    pub fn ensure_order(&self, names: &[Variable]) -> Result<(), ConfigError> {
        if names != self.as_slice() {
            return Err(ConfigError::BoundsOrdering {
                expected: self.iter().map(ToString::to_string).collect(),
                found: names.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }

    /// One bounds entry per key, `None` where the caller gave none.
    /// Bounds on variables outside the active set are ignored.
    ///
    /// The sequence is built by walking these keys, so the `ensure_order`
    /// call is a structural guard: it holds unless this function changes
    /// to iterate anything other than `self`.
    pub fn align_bounds(&self, bounds: &HashMap<Variable, Bound>) -> QnResult<Vec<Option<Bound>>> {
        let (names, aligned): (Vec<Variable>, Vec<Option<Bound>>) = self
            .iter()
            .map(|k| (k.clone(), bounds.get(k).copied()))
            .unzip();
        self.ensure_order(&names)?;

        for variable in bounds.keys().filter(|v| self.position(v).is_none()) {
            debug!("Ignoring bounds for inactive variable {}", variable);
        }
        Ok(aligned)
    }
}

impl Serialize for ActiveKeys {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// Active and passive halves of the initial values.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub keys: ActiveKeys,
    /// Initial active values in key order.
    pub x0: Vec<f64>,
    pub passive: Assignment,
    /// Variables that received a random initial value.
    pub autocompleted: Vec<Variable>,
}

impl Partition {
    /// Merge a final active vector with the passive values.
    pub fn merge(&self, x: &[f64]) -> EvalResult<Assignment> {
        self.keys.assign(x, &self.passive)
    }
}

/// Splits variables into active and passive sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    /// Fill missing initial values with uniform draws from [0, 2π).
    pub autocomplete: bool,
    /// Suppress the auto-completion warning.
    pub silent: bool,
}

impl Default for Partitioner {
    fn default() -> Self {
        Self {
            autocomplete: true,
            silent: false,
        }
    }
}

impl Partitioner {
    /// `requested` defaults to every variable of the objective. Active keys
    /// follow the order of `requested`, first occurrence wins.
    pub fn split<R: Rng + ?Sized>(
        &self,
        all_variables: &[Variable],
        requested: Option<&[Variable]>,
        initial_values: Option<&Assignment>,
        rng: &mut R,
    ) -> QnResult<Partition> {
        let requested = requested.unwrap_or(all_variables);

        let mut seen = HashSet::new();
        let active: Vec<Variable> = requested
            .iter()
            .filter(|v| seen.insert(*v))
            .cloned()
            .collect();

        let mut values = initial_values.cloned().unwrap_or_default();
        let mut autocompleted = Vec::new();
        for variable in all_variables.iter().chain(active.iter()) {
            if values.contains_key(variable) {
                continue;
            }
            if !self.autocomplete {
                if active.contains(variable) {
                    return Err(ConfigError::MissingInitialValue {
                        variable: variable.to_string(),
                    }
                    .into());
                }
                continue;
            }
            values.insert(variable.clone(), rng.random_range(0.0..TAU));
            autocompleted.push(variable.clone());
        }

        if !autocompleted.is_empty() && !self.silent {
            let names: Vec<&str> = autocompleted.iter().map(Variable::name).collect();
            warn!(
                "Initial values given but not complete: autocompleted {:?} with random numbers",
                names
            );
        }

        let keys = ActiveKeys::new(active);
        let x0 = keys.encode(&values)?;
        let passive = values
            .into_iter()
            .filter(|(k, _)| keys.position(k).is_none())
            .collect();

        Ok(Partition {
            keys,
            x0,
            passive,
            autocompleted,
        })
    }
}
