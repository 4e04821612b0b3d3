//! Support vector classifier
//!
//! Binary C-SVC trained with simplified SMO (Sequential Minimal Optimization)
//! over a precomputed RBF kernel matrix. Probabilities come from Platt
//! scaling fitted on the training decision values.

use crate::calibration::PlattScaling;
use crate::error::{CrowdBusError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of samples for eager kernel matrix computation
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// RBF kernel width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * var(X))`
    Scale,
    Value(f64),
}

impl Gamma {
    fn resolve(&self, x: &Array2<f64>) -> f64 {
        match *self {
            Gamma::Value(g) => g,
            Gamma::Scale => {
                let var = x.var(0.0);
                let n_features = x.ncols().max(1) as f64;
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
        }
    }
}

/// SVM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    pub gamma: Gamma,
    /// KKT tolerance
    pub tol: f64,
    /// Maximum passes over the data
    pub max_iter: usize,
    pub random_state: u64,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            gamma: Gamma::Scale,
            tol: 1e-3,
            max_iter: 200,
            random_state: 42,
        }
    }
}

/// Binary support vector classifier with calibrated probabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMClassifier {
    config: SVMConfig,
    support_vectors: Option<Array2<f64>>,
    /// `alpha_i * y_i` for each support vector
    dual_coef: Array1<f64>,
    bias: f64,
    gamma: f64,
    calibrator: PlattScaling,
    /// Constant output when training saw a single class
    constant: Option<f64>,
}

impl SVMClassifier {
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            support_vectors: None,
            dual_coef: Array1::zeros(0),
            bias: 0.0,
            gamma: 1.0,
            calibrator: PlattScaling::new(),
            constant: None,
        }
    }

    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    /// Fit on 0/1 targets
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = x.nrows();
        if n != y.len() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("y length = {}", n),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n == 0 {
            return Err(CrowdBusError::Training("no training rows".to_string()));
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(CrowdBusError::Training(format!(
                "{} samples exceed the SVM kernel matrix limit of {}",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        if !(self.config.c > 0.0) {
            return Err(CrowdBusError::invalid_param("C", self.config.c, "must be positive"));
        }

        let signed: Array1<f64> = y.mapv(|v| if v >= 0.5 { 1.0 } else { -1.0 });
        let positives = signed.iter().filter(|&&v| v > 0.0).count();
        self.support_vectors = Some(x.to_owned());
        if positives == 0 || positives == n {
            self.constant = Some(if positives == 0 { 0.0 } else { 1.0 });
            self.dual_coef = Array1::zeros(0);
            self.support_vectors = Some(Array2::zeros((0, x.ncols())));
            return Ok(());
        }
        self.constant = None;

        self.gamma = self.config.gamma.resolve(x);
        let kernel = rbf_matrix(x, self.gamma);
        let (alphas, bias) = self.smo(&kernel, &signed);

        let support: Vec<usize> = (0..n).filter(|&i| alphas[i] > 1e-8).collect();
        let mut sv = Array2::zeros((support.len(), x.ncols()));
        let mut dual = Array1::zeros(support.len());
        for (k, &i) in support.iter().enumerate() {
            sv.row_mut(k).assign(&x.row(i));
            dual[k] = alphas[i] * signed[i];
        }
        self.support_vectors = Some(sv);
        self.dual_coef = dual;
        self.bias = bias;

        let decision = self.decision_function(x)?;
        self.calibrator.fit(&decision, y)?;
        Ok(())
    }

    fn smo(&self, k: &Array2<f64>, y: &Array1<f64>) -> (Array1<f64>, f64) {
        let n = y.len();
        let c = self.config.c;
        let tol = self.config.tol;
        let mut alphas = Array1::<f64>::zeros(n);
        let mut bias = 0.0;
        // Cached f(x_i) - y_i, starting from f = 0
        let mut errors: Array1<f64> = -y;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state);

        let mut passes = 0;
        let max_passes = 5;
        let mut total_iter = 0;

        while passes < max_passes && total_iter < self.config.max_iter {
            let mut num_changed = 0;

            for i in 0..n {
                let e_i = errors[i];
                let violates = (y[i] * e_i < -tol && alphas[i] < c) || (y[i] * e_i > tol && alphas[i] > 0.0);
                if !violates {
                    continue;
                }

                let j = loop {
                    let j = rng.gen_range(0..n);
                    if j != i {
                        break j;
                    }
                };
                let e_j = errors[j];
                let (ai_old, aj_old) = (alphas[i], alphas[j]);

                let (l, h) = if y[i] != y[j] {
                    ((aj_old - ai_old).max(0.0), (c + aj_old - ai_old).min(c))
                } else {
                    ((ai_old + aj_old - c).max(0.0), (ai_old + aj_old).min(c))
                };
                if (h - l).abs() < 1e-10 {
                    continue;
                }

                let eta = 2.0 * k[[i, j]] - k[[i, i]] - k[[j, j]];
                if eta >= 0.0 {
                    continue;
                }

                let aj = (aj_old - y[j] * (e_i - e_j) / eta).clamp(l, h);
                if (aj - aj_old).abs() < 1e-5 {
                    continue;
                }
                let ai = ai_old + y[i] * y[j] * (aj_old - aj);

                let b1 = bias - e_i - y[i] * (ai - ai_old) * k[[i, i]] - y[j] * (aj - aj_old) * k[[i, j]];
                let b2 = bias - e_j - y[i] * (ai - ai_old) * k[[i, j]] - y[j] * (aj - aj_old) * k[[j, j]];
                let new_bias = if ai > 0.0 && ai < c {
                    b1
                } else if aj > 0.0 && aj < c {
                    b2
                } else {
                    (b1 + b2) / 2.0
                };

                let di = y[i] * (ai - ai_old);
                let dj = y[j] * (aj - aj_old);
                let db = new_bias - bias;
                for m in 0..n {
                    errors[m] += di * k[[i, m]] + dj * k[[j, m]] + db;
                }

                alphas[i] = ai;
                alphas[j] = aj;
                bias = new_bias;
                num_changed += 1;
            }

            total_iter += 1;
            if num_changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
        }

        (alphas, bias)
    }

    /// Signed distance to the margin, positive for the 1 class
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let sv = self.support_vectors.as_ref().ok_or(CrowdBusError::ModelNotFitted)?;
        if sv.ncols() != x.ncols() {
            return Err(CrowdBusError::ShapeMismatch {
                expected: format!("{} features", sv.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let scores: Vec<f64> = x
            .outer_iter()
            .into_par_iter()
            .map(|row| {
                sv.outer_iter()
                    .zip(self.dual_coef.iter())
                    .map(|(s, coef)| coef * rbf(row, s, self.gamma))
                    .sum::<f64>()
                    + self.bias
            })
            .collect();
        Ok(Array1::from_vec(scores))
    }

    /// Platt-calibrated probability of the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if let Some(p) = self.constant {
            return Ok(Array1::from_elem(x.nrows(), p));
        }
        self.calibrator.calibrate(&self.decision_function(x)?)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if let Some(p) = self.constant {
            return Ok(Array1::from_elem(x.nrows(), p));
        }
        Ok(self.decision_function(x)?.mapv(|d| if d >= 0.0 { 1.0 } else { 0.0 }))
    }

    pub fn n_support_vectors(&self) -> usize {
        self.dual_coef.len()
    }
}

fn rbf(a: ArrayView1<f64>, b: ArrayView1<f64>, gamma: f64) -> f64 {
    let sq: f64 = a.iter().zip(b.iter()).map(|(u, v)| (u - v) * (u - v)).sum();
    (-gamma * sq).exp()
}

fn rbf_matrix(x: &Array2<f64>, gamma: f64) -> Array2<f64> {
    let n = x.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| (0..n).map(|j| rbf(x.row(i), x.row(j), gamma)).collect())
        .collect();
    let mut k = Array2::zeros((n, n));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            k[[i, j]] = v;
        }
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            let center = if i < 20 { -2.0 } else { 2.0 };
            let jitter = ((i * 7 + j * 3) % 5) as f64 * 0.2 - 0.4;
            center + jitter
        });
        let y = Array1::from_shape_fn(40, |i| if i < 20 { 0.0 } else { 1.0 });
        (x, y)
    }

    #[test]
    fn test_svm_separates_blobs() {
        let (x, y) = two_blobs();
        let mut svm = SVMClassifier::new(SVMConfig::default());
        svm.fit(&x, &y).unwrap();

        assert_eq!(svm.predict(&x).unwrap(), y);
        assert!(svm.n_support_vectors() > 0);
    }

    #[test]
    fn test_svm_probabilities_follow_class() {
        let (x, y) = two_blobs();
        let mut svm = SVMClassifier::new(SVMConfig { c: 5.0, ..Default::default() });
        svm.fit(&x, &y).unwrap();

        let p = svm.predict_proba(&x).unwrap();
        assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(p[0] < 0.5 && p[39] > 0.5);
    }

    #[test]
    fn test_single_class_is_constant() {
        let x = Array2::from_shape_fn((5, 2), |(i, j)| (i + j) as f64);
        let y = Array1::from_elem(5, 1.0);
        let mut svm = SVMClassifier::new(SVMConfig::default());
        svm.fit(&x, &y).unwrap();
        assert!(svm.predict_proba(&x).unwrap().iter().all(|&p| p == 1.0));
    }

    #[test]
    fn test_gamma_scale() {
        let x = Array2::from_shape_fn((4, 2), |(i, _)| i as f64);
        // var of [0,0,1,1,2,2,3,3] = 1.25
        assert!((Gamma::Scale.resolve(&x) - 1.0 / (2.0 * 1.25)).abs() < 1e-12);
    }
}
