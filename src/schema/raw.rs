//! Untyped field->value mappings as they arrive from CSV rows or request bodies

use crate::error::{CrowdBusError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Presence, Task};
use crate::vectorize::FeatureLookup;

/// A single untyped scalar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Numeric view used by the vectorizer; text that does not parse is `None`
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Null => None,
            RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RawValue::Number(v) => Some(*v),
            RawValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<Option<f64>> for RawValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(RawValue::Null, RawValue::Number)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

/// A named-field mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(HashMap<String, RawValue>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<RawValue>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<RawValue> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// View through `task`'s schema defaults: absent or null fields with a
    /// declared default read as that default. Present values pass through
    /// unchecked.
    pub fn with_defaults(&self, task: Task) -> DefaultedRecord<'_> {
        DefaultedRecord { record: self, task }
    }

    /// Build from a JSON object; nested arrays or objects are rejected
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(CrowdBusError::Data("feature record must be a JSON object".to_string()));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// One record per DataFrame row. String columns stay text, booleans stay
    /// booleans, everything else is cast to f64 with nulls preserved.
    pub fn from_dataframe(df: &DataFrame) -> Result<Vec<Self>> {
        let n_rows = df.height();
        let mut rows = vec![Self::new(); n_rows];

        for column in df.get_columns() {
            let name = column.name().to_string();
            match column.dtype() {
                DataType::String => {
                    let values = column.str()?;
                    for (row, value) in rows.iter_mut().zip(values.into_iter()) {
                        row.0.insert(
                            name.clone(),
                            value.map_or(RawValue::Null, |s| RawValue::Text(s.to_string())),
                        );
                    }
                }
                DataType::Boolean => {
                    let values = column.bool()?;
                    for (row, value) in rows.iter_mut().zip(values.into_iter()) {
                        row.0.insert(name.clone(), value.map_or(RawValue::Null, RawValue::Bool));
                    }
                }
                _ => {
                    let cast = column.cast(&DataType::Float64)?;
                    let values = cast.f64()?;
                    for (row, value) in rows.iter_mut().zip(values.into_iter()) {
                        row.0.insert(name.clone(), RawValue::from(value));
                    }
                }
            }
        }

        Ok(rows)
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A raw record that falls back to schema defaults, see
/// [`RawRecord::with_defaults`]
#[derive(Debug, Clone, Copy)]
pub struct DefaultedRecord<'a> {
    record: &'a RawRecord,
    task: Task,
}

impl FeatureLookup for DefaultedRecord<'_> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.record.feature(name).or_else(|| match self.task.field(name)?.presence {
            Presence::Default(value) => Some(value),
            Presence::Required | Presence::Nullable => None,
        })
    }
}
