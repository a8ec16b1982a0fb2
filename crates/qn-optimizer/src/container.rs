//! Evaluation containers: stateful wrappers that turn a positional vector
//! into a full assignment, call the compiled objective(s), and keep a record
//! of every raw call.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::info;

use qn_types::{
    Assignment, ConfigError, EvalResult, EvalSettings, EvaluationError, QnResult, Variable,
    VariablePair, PROGRESS_PRINT_LEVEL,
};

use crate::objective::CompiledObjective;
use crate::partition::ActiveKeys;

/// Dense second-derivative matrix, rows and columns in active-key order.
pub type Matrix = Vec<Vec<f64>>;

/// The part of a container that differs between energy, gradient and
/// Hessian evaluation.
pub trait Evaluator {
    type Output: Clone + Debug;

    /// Prefix of progress lines.
    const LABEL: &'static str;

    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings)
        -> EvalResult<Self::Output>;

    fn describe(output: &Self::Output) -> String;
}

/// Raw-call history of one container, one entry per call.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalHistory<T> {
    pub values: Vec<T>,
    /// The active vector each call received.
    pub parameters: Vec<Vec<f64>>,
}

impl<T> Default for EvalHistory<T> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

impl<T> EvalHistory<T> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A compiled evaluator bound to one run's key ordering and passive values.
///
/// Calls take `&self` so the minimizer's objective closure and the iteration
/// recorder can hold the container at the same time. The container is not
/// `Sync` and belongs to a single run.
pub struct EvaluationContainer<E: Evaluator> {
    evaluator: E,
    keys: ActiveKeys,
    passive: Assignment,
    settings: EvalSettings,
    print_level: u8,
    history: RefCell<EvalHistory<E::Output>>,
}

pub type EnergyContainer = EvaluationContainer<EnergyEvaluator>;
pub type GradientContainer = EvaluationContainer<GradientEvaluator>;
pub type HessianContainer = EvaluationContainer<HessianEvaluator>;

impl<E: Evaluator> EvaluationContainer<E> {
    pub fn new(
        evaluator: E,
        keys: ActiveKeys,
        passive: Assignment,
        settings: EvalSettings,
        print_level: u8,
    ) -> Self {
        Self {
            evaluator,
            keys,
            passive,
            settings,
            print_level,
            history: RefCell::new(EvalHistory::default()),
        }
    }

    /// Evaluate at `x`, positioned by the active keys.
    ///
    /// Errors from the compiled objective are returned unchanged and leave
    /// the history untouched.
    pub fn call(&self, x: &[f64]) -> EvalResult<E::Output> {
        let assignment = self.keys.assign(x, &self.passive)?;
        let value = self.evaluator.evaluate(&assignment, &self.settings)?;

        {
            let mut history = self.history.borrow_mut();
            history.values.push(value.clone());
            history.parameters.push(x.to_vec());
        }

        if self.print_level >= PROGRESS_PRINT_LEVEL {
            info!(
                "{}={} angles={:?} samples={:?}",
                E::LABEL,
                E::describe(&value),
                x,
                self.settings.samples
            );
        }
        Ok(value)
    }

    /// Number of raw calls so far.
    pub fn calls(&self) -> usize {
        self.history.borrow().len()
    }

    /// Most recent value and the vector it was evaluated at.
    pub fn last(&self) -> Option<(E::Output, Vec<f64>)> {
        let history = self.history.borrow();
        match (history.values.last(), history.parameters.last()) {
            (Some(value), Some(x)) => Some((value.clone(), x.clone())),
            _ => None,
        }
    }

    pub fn keys(&self) -> &ActiveKeys {
        &self.keys
    }

    pub fn history(&self) -> Ref<'_, EvalHistory<E::Output>> {
        self.history.borrow()
    }

    /// Move the recorded history out, leaving it empty.
    pub fn take_history(&self) -> EvalHistory<E::Output> {
        self.history.take()
    }
}

// ---- energy ----

pub struct EnergyEvaluator {
    objective: Box<dyn CompiledObjective>,
}

impl EnergyEvaluator {
    pub fn new(objective: Box<dyn CompiledObjective>) -> Self {
        Self { objective }
    }
}

impl Evaluator for EnergyEvaluator {
    type Output = f64;
    const LABEL: &'static str = "E";

    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings) -> EvalResult<f64> {
        self.objective.evaluate(assignment, settings)
    }

    fn describe(output: &f64) -> String {
        format!("{output:+.8}")
    }
}

// ---- gradient ----

/// One compiled partial derivative per active key, in key order.
pub struct GradientEvaluator {
    partials: Vec<Box<dyn CompiledObjective>>,
}

impl GradientEvaluator {
    /// Arrange `partials` by `keys`; every key needs an entry.
    pub fn new(
        keys: &ActiveKeys,
        mut partials: HashMap<Variable, Box<dyn CompiledObjective>>,
    ) -> QnResult<Self> {
        let ordered = keys
            .iter()
            .map(|k| {
                partials.remove(k).ok_or_else(|| ConfigError::MissingDerivative {
                    derivative: format!("d/d{k}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { partials: ordered })
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

impl Evaluator for GradientEvaluator {
    type Output = Vec<f64>;
    const LABEL: &'static str = "dE";

    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings) -> EvalResult<Vec<f64>> {
        self.partials
            .iter()
            .map(|partial| partial.evaluate(assignment, settings))
            .collect()
    }

    fn describe(output: &Vec<f64>) -> String {
        format!("{output:?}")
    }
}

// ---- hessian ----

/// Compiled second derivatives, one per unordered pair of active keys.
pub struct HessianEvaluator {
    keys: ActiveKeys,
    entries: Vec<(VariablePair, Box<dyn CompiledObjective>)>,
}

impl HessianEvaluator {
    /// Keep one entry per unordered pair. The orientation that follows the
    /// key order is preferred when both were supplied.
    pub fn new(
        keys: ActiveKeys,
        mut entries: HashMap<VariablePair, Box<dyn CompiledObjective>>,
    ) -> QnResult<Self> {
        let mut kept = Vec::with_capacity(keys.len() * (keys.len() + 1) / 2);
        for (i, ki) in keys.iter().enumerate() {
            for kj in keys.iter().skip(i) {
                let pair = VariablePair(ki.clone(), kj.clone());
                let swapped = pair.swapped();
                let entry = match entries.remove(&pair) {
                    Some(compiled) => (pair, compiled),
                    None => match entries.remove(&swapped) {
                        Some(compiled) => (swapped, compiled),
                        None => {
                            return Err(ConfigError::MissingDerivative {
                                derivative: format!("d2/d{ki}d{kj}"),
                            }
                            .into())
                        }
                    },
                };
                kept.push(entry);
            }
        }
        Ok(Self {
            keys,
            entries: kept,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Evaluator for HessianEvaluator {
    type Output = Matrix;
    const LABEL: &'static str = "ddE";

    fn evaluate(&self, assignment: &Assignment, settings: &EvalSettings) -> EvalResult<Matrix> {
        let mut values = HashMap::with_capacity(self.entries.len());
        for (pair, compiled) in &self.entries {
            values.insert(pair.clone(), compiled.evaluate(assignment, settings)?);
        }
        expand_symmetric(&self.keys, &values).map_err(|e| EvaluationError::Failed {
            message: e.to_string(),
        })
    }

    fn describe(output: &Matrix) -> String {
        format!("{output:?}")
    }
}

/// Expand second derivatives keyed by variable pairs into a full matrix in
/// key order. A pair supplied in one orientation fills both `(i, j)` and
/// `(j, i)`.
pub fn expand_symmetric(
    keys: &ActiveKeys,
    values: &HashMap<VariablePair, f64>,
) -> Result<Matrix, ConfigError> {
    keys.iter()
        .map(|ki| {
            keys.iter()
                .map(|kj| {
                    let pair = VariablePair(ki.clone(), kj.clone());
                    values
                        .get(&pair)
                        .or_else(|| values.get(&pair.swapped()))
                        .copied()
                        .ok_or_else(|| ConfigError::MissingDerivative {
                            derivative: format!("d2/d{ki}d{kj}"),
                        })
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qn_types::assignment;
    use std::cell::Cell;
    use std::rc::Rc;

    fn keys(names: &[&str]) -> ActiveKeys {
        ActiveKeys::new(names.iter().map(|n| Variable::from(*n)).collect())
    }

    fn value_of(name: &'static str) -> Box<dyn CompiledObjective> {
        Box::new(move |a: &Assignment, _: &EvalSettings| -> EvalResult<f64> {
            Ok(a[&Variable::from(name)])
        })
    }

    fn constant(value: f64) -> Box<dyn CompiledObjective> {
        Box::new(move |_: &Assignment, _: &EvalSettings| -> EvalResult<f64> { Ok(value) })
    }

    #[test]
    fn energy_container_merges_passive_values_and_records_every_call() {
        let seen = Rc::new(Cell::new(0.0));
        let sink = Rc::clone(&seen);
        let compiled = Box::new(move |a: &Assignment, _: &EvalSettings| -> EvalResult<f64> {
            sink.set(a[&Variable::from("c")]);
            Ok(a[&Variable::from("a")] + 10.0 * a[&Variable::from("b")])
        });

        let container = EnergyContainer::new(
            EnergyEvaluator::new(compiled),
            keys(&["a", "b"]),
            assignment([("c", 0.3)]),
            EvalSettings::default(),
            0,
        );

        assert_eq!(container.call(&[1.0, 2.0]).unwrap(), 21.0);
        assert_eq!(container.call(&[0.0, 1.0]).unwrap(), 10.0);
        assert_eq!(container.call(&[0.0, 1.0]).unwrap(), 10.0);
        assert_eq!(seen.get(), 0.3);

        assert_eq!(container.calls(), 3);
        let history = container.history();
        assert_eq!(history.values, vec![21.0, 10.0, 10.0]);
        assert_eq!(history.parameters[0], vec![1.0, 2.0]);
    }

    #[test]
    fn evaluation_errors_propagate_and_are_not_recorded() {
        let compiled = Box::new(|_: &Assignment, _: &EvalSettings| -> EvalResult<f64> {
            Err(EvaluationError::Failed {
                message: "device lost".to_string(),
            })
        });
        let container = EnergyContainer::new(
            EnergyEvaluator::new(compiled),
            keys(&["a"]),
            Assignment::new(),
            EvalSettings::default(),
            0,
        );

        let err = container.call(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::Failed {
                message: "device lost".to_string()
            }
        );
        assert_eq!(container.calls(), 0);
        assert!(container.last().is_none());
    }

    #[test]
    fn wrong_vector_length_is_rejected() {
        let container = EnergyContainer::new(
            EnergyEvaluator::new(constant(1.0)),
            keys(&["a", "b"]),
            Assignment::new(),
            EvalSettings::default(),
            0,
        );
        assert!(matches!(
            container.call(&[1.0]),
            Err(EvaluationError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn settings_reach_the_compiled_objective() {
        let compiled = Box::new(|_: &Assignment, s: &EvalSettings| -> EvalResult<f64> {
            Ok(s.samples.unwrap_or(0) as f64)
        });
        let settings = EvalSettings {
            samples: Some(1000),
            ..EvalSettings::default()
        };
        let container = EnergyContainer::new(
            EnergyEvaluator::new(compiled),
            keys(&["a"]),
            Assignment::new(),
            settings,
            0,
        );
        assert_eq!(container.call(&[0.0]).unwrap(), 1000.0);
    }

    #[test]
    fn gradient_is_ordered_like_the_keys() {
        let k = keys(&["b", "a"]);
        let mut partials: HashMap<Variable, Box<dyn CompiledObjective>> = HashMap::new();
        partials.insert(Variable::from("a"), value_of("a"));
        partials.insert(Variable::from("b"), value_of("b"));

        let container = GradientContainer::new(
            GradientEvaluator::new(&k, partials).unwrap(),
            k,
            Assignment::new(),
            EvalSettings::default(),
            0,
        );
        assert_eq!(container.call(&[2.0, 1.0]).unwrap(), vec![2.0, 1.0]);
        assert_eq!(container.last().unwrap().0, vec![2.0, 1.0]);
    }

    #[test]
    fn gradient_without_a_partial_fails_at_construction() {
        let mut partials: HashMap<Variable, Box<dyn CompiledObjective>> = HashMap::new();
        partials.insert(Variable::from("a"), constant(0.0));
        let err = GradientEvaluator::new(&keys(&["a", "b"]), partials).err().unwrap();
        assert!(err.to_string().contains("d/db"));
    }

    #[test]
    fn hessian_mirrors_pairs_given_once() {
        let k = keys(&["x", "y"]);
        let mut entries: HashMap<VariablePair, Box<dyn CompiledObjective>> = HashMap::new();
        entries.insert(VariablePair::new("x", "x"), constant(2.0));
        entries.insert(VariablePair::new("y", "x"), constant(0.5));
        entries.insert(VariablePair::new("y", "y"), constant(4.0));

        let evaluator = HessianEvaluator::new(k.clone(), entries).unwrap();
        assert_eq!(evaluator.len(), 3);
        let container =
            HessianContainer::new(evaluator, k, Assignment::new(), EvalSettings::default(), 0);

        let h = container.call(&[0.0, 0.0]).unwrap();
        assert_eq!(h, vec![vec![2.0, 0.5], vec![0.5, 4.0]]);
    }

    #[test]
    fn hessian_prefers_key_order_orientation_when_both_given() {
        let k = keys(&["x", "y"]);
        let mut entries: HashMap<VariablePair, Box<dyn CompiledObjective>> = HashMap::new();
        entries.insert(VariablePair::new("x", "x"), constant(1.0));
        entries.insert(VariablePair::new("x", "y"), constant(3.0));
        entries.insert(VariablePair::new("y", "x"), constant(-3.0));
        entries.insert(VariablePair::new("y", "y"), constant(1.0));

        let evaluator = HessianEvaluator::new(k.clone(), entries).unwrap();
        let container =
            HessianContainer::new(evaluator, k, Assignment::new(), EvalSettings::default(), 0);
        let h = container.call(&[0.0, 0.0]).unwrap();
        assert_eq!(h[0][1], 3.0);
        assert_eq!(h[1][0], 3.0);
    }

    #[test]
    fn hessian_missing_pair_fails_at_construction() {
        let mut entries: HashMap<VariablePair, Box<dyn CompiledObjective>> = HashMap::new();
        entries.insert(VariablePair::new("x", "x"), constant(1.0));
        entries.insert(VariablePair::new("y", "y"), constant(1.0));
        let err = HessianEvaluator::new(keys(&["x", "y"]), entries).err().unwrap();
        assert!(err.to_string().contains("d2/dxdy"));
    }

    #[test]
    fn expansion_respects_active_order() {
        let mut values = HashMap::new();
        values.insert(VariablePair::new("a", "a"), 1.0);
        values.insert(VariablePair::new("b", "b"), 2.0);
        values.insert(VariablePair::new("c", "c"), 3.0);
        values.insert(VariablePair::new("a", "c"), 13.0);
        values.insert(VariablePair::new("b", "a"), 12.0);
        values.insert(VariablePair::new("c", "b"), 23.0);

        let m = expand_symmetric(&keys(&["c", "a", "b"]), &values).unwrap();
        assert_eq!(
            m,
            vec![
                vec![3.0, 13.0, 23.0],
                vec![13.0, 1.0, 12.0],
                vec![23.0, 12.0, 2.0],
            ]
        );
    }

    #[test]
    fn take_history_empties_the_container() {
        let container = EnergyContainer::new(
            EnergyEvaluator::new(constant(1.0)),
            keys(&["a"]),
            Assignment::new(),
            EvalSettings::default(),
            0,
        );
        container.call(&[0.0]).unwrap();
        let history = container.take_history();
        assert_eq!(history.len(), 1);
        assert_eq!(container.calls(), 0);
    }
}
