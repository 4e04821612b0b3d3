//! Feature scaling

use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column z-score scaling: `(x - mean) / std`.
///
/// Uses the population standard deviation. Constant columns keep a scale
/// of 1 so they map to 0 instead of NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(CrowdBusError::Data("cannot fit scaler on zero rows".to_string()));
        }
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| CrowdBusError::Data("empty matrix".to_string()))?;
        let scale = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(CrowdBusError::ModelNotFitted),
        };
        if x.ncols() != mean.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} columns", mean.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok((x - mean) / scale)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }
}
