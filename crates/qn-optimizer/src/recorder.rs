//! Per-iteration snapshots, as opposed to per-call records.

use tracing::debug;

use crate::container::{EnergyContainer, GradientContainer, HessianContainer};
use crate::history::IterationRecord;

/// Callback state fired once per outer iteration of the minimizer.
///
/// Each firing copies the latest raw entry of every active container.
pub struct IterationRecorder<'a> {
    energy: &'a EnergyContainer,
    gradient: Option<&'a GradientContainer>,
    hessian: Option<&'a HessianContainer>,
    records: Vec<IterationRecord>,
    real_iterations: usize,
}

impl<'a> IterationRecorder<'a> {
    pub fn new(
        energy: &'a EnergyContainer,
        gradient: Option<&'a GradientContainer>,
        hessian: Option<&'a HessianContainer>,
    ) -> Self {
        Self {
            energy,
            gradient,
            hessian,
            records: Vec::new(),
            real_iterations: 0,
        }
    }

    /// Take a snapshot. A firing before the first energy evaluation has
    /// nothing to copy and is not counted.
    pub fn record(&mut self) {
        let Some((energy, angles)) = self.energy.last() else {
            debug!("Iteration callback fired before any energy evaluation");
            return;
        };
        self.records.push(IterationRecord {
            energy,
            angles,
            gradient: self.gradient.and_then(|g| g.last()).map(|(value, _)| value),
            hessian: self.hessian.and_then(|h| h.last()).map(|(value, _)| value),
            keys: self.energy.keys().clone(),
        });
        self.real_iterations += 1;
    }

    /// Number of counted firings.
    pub fn real_iterations(&self) -> usize {
        self.real_iterations
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<IterationRecord> {
        self.records
    }
}
