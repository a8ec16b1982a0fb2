//! Parameter identifiers and value containers shared by every crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of one scalar optimization parameter.
///
/// Equality and hashing are by name, so a `Variable` built from the same
/// string is the same key everywhere in a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variable(String);

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Variable {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Key of a second-derivative entry, `d²/(first)(second)`.
///
/// Pairs are stored as given. Lookups that need the symmetric entry use
/// [`VariablePair::swapped`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariablePair(pub Variable, pub Variable);

impl VariablePair {
    pub fn new(first: impl Into<Variable>, second: impl Into<Variable>) -> Self {
        Self(first.into(), second.into())
    }

    pub fn swapped(&self) -> Self {
        Self(self.1.clone(), self.0.clone())
    }
}

impl fmt::Display for VariablePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// A full variable assignment handed to compiled objectives.
pub type Assignment = HashMap<Variable, f64>;

/// Box constraint for one variable. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bound {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn between(lower: f64, upper: f64) -> Self {
        Self::new(Some(lower), Some(upper))
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower.map_or(true, |lo| value >= lo) && self.upper.map_or(true, |hi| value <= hi)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |v: Option<f64>| v.map_or_else(|| "None".to_string(), |v| v.to_string());
        write!(f, "({}, {})", side(self.lower), side(self.upper))
    }
}

/// Convenience for building an [`Assignment`] from literal pairs.
pub fn assignment<I, K>(values: I) -> Assignment
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<Variable>,
{
    values.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
