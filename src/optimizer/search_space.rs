//! Discrete hyperparameter grids

use crate::error::{CrowdBusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single grid value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Unset, e.g. unlimited `max_depth`
    None,
    Int(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::String(v.to_string())
    }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParameterValue::None, Into::into)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::None => f.write_str("None"),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::String(v) => f.write_str(v),
        }
    }
}

/// One named grid axis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<ParameterValue>,
}

/// One point of a grid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialParams(BTreeMap<String, ParameterValue>);

impl TrialParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Integer parameter, `default` when absent
    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_int()
                .filter(|i| *i >= 0)
                .map(|i| i as usize)
                .ok_or_else(|| CrowdBusError::invalid_param(name, v, "expected a non-negative integer")),
        }
    }

    /// Integer or `None` parameter, `default` when absent
    pub fn opt_usize_or(&self, name: &str, default: Option<usize>) -> Result<Option<usize>> {
        match self.get(name) {
            None => Ok(default),
            Some(ParameterValue::None) => Ok(None),
            Some(_) => self.usize_or(name, 0).map(Some),
        }
    }

    pub fn f64_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_float()
                .ok_or_else(|| CrowdBusError::invalid_param(name, v, "expected a number")),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_string()
                .ok_or_else(|| CrowdBusError::invalid_param(name, v, "expected a string")),
        }
    }
}

impl fmt::Display for TrialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("{}");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Cartesian grid over named axes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    parameters: Vec<Parameter>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis
    pub fn axis<V: Into<ParameterValue>>(mut self, name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Number of combinations. A grid without axes has one (all defaults);
    /// any empty axis makes it zero.
    pub fn len(&self) -> usize {
        self.parameters.iter().map(|p| p.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination in declared order; the last axis varies fastest
    pub fn combinations(&self) -> Vec<TrialParams> {
        let mut combos = vec![TrialParams::new()];
        for param in &self.parameters {
            combos = combos
                .iter()
                .flat_map(|base| {
                    param
                        .values
                        .iter()
                        .map(move |v| base.clone().with(param.name.clone(), v.clone()))
                })
                .collect();
        }
        combos
    }
}
