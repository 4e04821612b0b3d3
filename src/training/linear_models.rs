//! Linear classifiers

use super::gradient_boosting::sigmoid;
use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// L2-regularized logistic regression for binary 0/1 targets.
///
/// Minimizes `C * sum(log_loss) + 0.5 * ||w||²` with full-batch gradient
/// descent. The intercept is not penalized. Inputs are expected to be
/// standardized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept
    pub intercept: f64,
    /// Inverse regularization strength
    pub c: f64,
    pub max_iter: usize,
    /// Stop when the gradient norm falls below this
    pub tol: f64,
    pub learning_rate: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            c: 1.0,
            max_iter: 100,
            tol: 1e-6,
            learning_rate: 0.5,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(CrowdBusError::Training("no training rows".to_string()));
        }
        if !(self.c > 0.0) {
            return Err(CrowdBusError::invalid_param("C", self.c, "must be positive"));
        }

        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;
        // Gradient of the objective divided by C * n
        let penalty = 1.0 / (self.c * n_samples as f64);

        for _ in 0..self.max_iter {
            let linear = x.dot(&weights) + bias;
            let errors = linear.mapv(sigmoid) - y;

            let dw = x.t().dot(&errors) / n_samples as f64 + &weights * penalty;
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights.scaled_add(-self.learning_rate, &dw);
            bias -= self.learning_rate * db;
        }

        self.coefficients = Some(weights);
        self.intercept = bias;
        Ok(())
    }

    /// Probability of the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(CrowdBusError::ModelNotFitted)?;
        if coefficients.len() != x.ncols() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok((x.dot(coefficients) + self.intercept).mapv(sigmoid))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_proba(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            let base = if i < 20 { -1.5 } else { 1.5 };
            if j == 0 { base + (i % 5) as f64 * 0.1 } else { (i % 3) as f64 - 1.0 }
        });
        let y = Array1::from_shape_fn(40, |i| if i < 20 { 0.0 } else { 1.0 });
        (x, y)
    }

    #[test]
    fn test_logistic_regression_separates() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new().with_c(10.0).with_max_iter(200);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_stronger_penalty_shrinks_weights() {
        let (x, y) = separable();
        let mut loose = LogisticRegression::new().with_c(10.0).with_max_iter(200);
        let mut tight = LogisticRegression::new().with_c(0.01).with_max_iter(200);
        loose.fit(&x, &y).unwrap();
        tight.fit(&x, &y).unwrap();

        let norm = |m: &LogisticRegression| m.coefficients.as_ref().unwrap().mapv(|v| v * v).sum();
        assert!(norm(&tight) < norm(&loose));
    }

    #[test]
    fn test_unfitted_errors() {
        let model = LogisticRegression::new();
        assert!(matches!(
            model.predict_proba(&Array2::zeros((1, 2))),
            Err(CrowdBusError::ModelNotFitted)
        ));
    }
}
