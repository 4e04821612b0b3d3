//! Persisted feature ordering

use crate::error::{CrowdBusError, Result};
use crate::schema::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The exact column sequence a trained model expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureOrder(Vec<String>);

impl FeatureOrder {
    /// Trainable columns of a task, in declared order
    pub fn for_task(task: Task) -> Self {
        Self(task.trainable_fields().iter().map(|s| s.to_string()).collect())
    }

    /// Build from arbitrary names; duplicates and empty orders are rejected
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CrowdBusError::Data("feature order is empty".to_string()));
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(CrowdBusError::Data(format!("duplicate feature `{}` in order", name)));
            }
        }
        Ok(Self(names))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    /// Same length and same set as the task's trainable fields
    pub fn matches_schema(&self, task: Task) -> bool {
        let expected = task.trainable_fields();
        if self.0.len() != expected.len() {
            return false;
        }
        let ours: HashSet<&str> = self.iter().collect();
        expected.iter().all(|name| ours.contains(name))
    }

    /// Names in this order that the task's schema does not know
    pub fn unknown_to(&self, task: Task) -> Vec<&str> {
        self.iter().filter(|name| task.field(name).is_none()).collect()
    }
}
