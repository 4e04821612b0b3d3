//! Validation metrics for the two task kinds

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary confusion counts (positive class = 1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

/// Precision and recall of one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Scores for class 0 then class 1
    pub per_class: [ClassScores; 2],
    pub confusion: ConfusionCounts,
    pub log_loss: Option<f64>,
    pub n_samples: usize,
}

impl ClassificationMetrics {
    /// `y_pred` holds hard 0/1 labels, `y_prob` the positive probability
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>, y_prob: Option<&Array1<f64>>) -> Self {
        let mut confusion = ConfusionCounts::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t >= 0.5, p >= 0.5) {
                (true, true) => confusion.true_positive += 1,
                (false, true) => confusion.false_positive += 1,
                (false, false) => confusion.true_negative += 1,
                (true, false) => confusion.false_negative += 1,
            }
        }

        let n = y_true.len();
        let correct = confusion.true_positive + confusion.true_negative;
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let c = confusion;
        let per_class = [
            ClassScores {
                precision: ratio(c.true_negative, c.true_negative + c.false_negative),
                recall: ratio(c.true_negative, c.true_negative + c.false_positive),
                support: c.true_negative + c.false_positive,
            },
            ClassScores {
                precision: ratio(c.true_positive, c.true_positive + c.false_positive),
                recall: ratio(c.true_positive, c.true_positive + c.false_negative),
                support: c.true_positive + c.false_negative,
            },
        ];

        let log_loss = y_prob.filter(|_| n > 0).map(|probs| {
            let eps = 1e-15;
            -y_true
                .iter()
                .zip(probs.iter())
                .map(|(&t, &p)| {
                    let p = p.clamp(eps, 1.0 - eps);
                    if t >= 0.5 { p.ln() } else { (1.0 - p).ln() }
                })
                .sum::<f64>()
                / n as f64
        });

        Self {
            accuracy: ratio(correct, n),
            per_class,
            confusion,
            log_loss,
            n_samples: n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Percent, over non-zero targets
    pub mape: f64,
    pub rmse_minutes: f64,
    pub mae_minutes: f64,
    pub n_samples: usize,
}

impl RegressionMetrics {
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let n = y_true.len();
        if n == 0 {
            return Self {
                rmse: 0.0,
                mae: 0.0,
                r2: 0.0,
                mape: 0.0,
                rmse_minutes: 0.0,
                mae_minutes: 0.0,
                n_samples: 0,
            };
        }

        let nf = n as f64;
        let residuals: Vec<f64> = y_true.iter().zip(y_pred.iter()).map(|(t, p)| t - p).collect();
        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let mse = ss_res / nf;
        let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / nf;

        let mean = y_true.sum() / nf;
        let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        let (ape_sum, ape_n) = y_true
            .iter()
            .zip(residuals.iter())
            .filter(|(t, _)| **t != 0.0)
            .fold((0.0, 0usize), |(s, c), (t, r)| (s + (r / t).abs(), c + 1));
        let mape = if ape_n > 0 { ape_sum / ape_n as f64 * 100.0 } else { 0.0 };

        let rmse = mse.sqrt();
        Self {
            rmse,
            mae,
            r2,
            mape,
            rmse_minutes: rmse / 60.0,
            mae_minutes: mae / 60.0,
            n_samples: n,
        }
    }
}

/// Held-out metrics of a fitted family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMetrics {
    Classification(ClassificationMetrics),
    Regression(RegressionMetrics),
}

impl ValidationMetrics {
    /// Accuracy for classification, RMSE for regression
    pub fn headline(&self) -> f64 {
        match self {
            ValidationMetrics::Classification(m) => m.accuracy,
            ValidationMetrics::Regression(m) => m.rmse,
        }
    }

    /// Strictly better: higher accuracy or lower RMSE. Equal scores are not
    /// an improvement. A non-finite score ranks below every finite one.
    pub fn improves_on(&self, other: &ValidationMetrics) -> bool {
        match (self, other) {
            (ValidationMetrics::Classification(a), ValidationMetrics::Classification(b)) => {
                a.accuracy.is_finite() && (!b.accuracy.is_finite() || a.accuracy > b.accuracy)
            }
            (ValidationMetrics::Regression(a), ValidationMetrics::Regression(b)) => {
                a.rmse.is_finite() && (!b.rmse.is_finite() || a.rmse < b.rmse)
            }
            _ => false,
        }
    }
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMetrics::Classification(m) => {
                write!(f, "accuracy={:.4}", m.accuracy)?;
                for (label, s) in ["0", "1"].iter().zip(m.per_class.iter()) {
                    write!(f, " p{}={:.3} r{}={:.3}", label, s.precision, label, s.recall)?;
                }
                if let Some(ll) = m.log_loss {
                    write!(f, " log_loss={:.4}", ll)?;
                }
                Ok(())
            }
            ValidationMetrics::Regression(m) => write!(
                f,
                "rmse={:.2}s ({:.2} min) mae={:.2}s ({:.2} min) r2={:.4} mape={:.2}%",
                m.rmse, m.rmse_minutes, m.mae, m.mae_minutes, m.r2, m.mape
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classification_metrics() {
        let y_true = array![1.0, 1.0, 0.0, 0.0, 1.0];
        let y_pred = array![1.0, 0.0, 0.0, 1.0, 1.0];
        let m = ClassificationMetrics::compute(&y_true, &y_pred, None);

        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert_eq!(m.confusion.true_positive, 2);
        assert_eq!(m.confusion.false_negative, 1);
        assert_eq!(m.confusion.false_positive, 1);
        assert!((m.per_class[1].precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.per_class[1].recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.per_class[0].recall - 0.5).abs() < 1e-12);
        assert!(m.log_loss.is_none());
    }

    #[test]
    fn test_log_loss() {
        let y_true = array![1.0, 0.0];
        let probs = array![0.9, 0.1];
        let m = ClassificationMetrics::compute(&y_true, &array![1.0, 0.0], Some(&probs));
        assert!((m.log_loss.unwrap() - (-(0.9f64).ln())).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_score_never_wins() {
        let finite = RegressionMetrics::compute(&array![100.0, 200.0], &array![150.0, 250.0]);
        let mut broken = finite.clone();
        broken.rmse = f64::NAN;
        let (finite, broken) = (ValidationMetrics::Regression(finite), ValidationMetrics::Regression(broken));

        assert!(finite.improves_on(&broken));
        assert!(!broken.improves_on(&finite));
        assert!(!broken.improves_on(&broken));

        let mut accurate = ClassificationMetrics::compute(&array![1.0, 0.0], &array![1.0, 1.0], None);
        let accurate_metrics = ValidationMetrics::Classification(accurate.clone());
        accurate.accuracy = f64::NAN;
        assert!(accurate_metrics.improves_on(&ValidationMetrics::Classification(accurate)));
    }

    #[test]
    fn test_regression_metrics() {
        let y_true = array![100.0, 200.0, 300.0, 0.0];
        let y_pred = array![110.0, 190.0, 330.0, 10.0];
        let m = RegressionMetrics::compute(&y_true, &y_pred);

        assert!((m.mae - 15.0).abs() < 1e-12);
        assert!((m.rmse - (1200.0f64 / 4.0).sqrt()).abs() < 1e-12);
        // zero target excluded: (0.1 + 0.05 + 0.1) / 3
        assert!((m.mape - 25.0 / 3.0).abs() < 1e-9);
        assert!((m.rmse_minutes - m.rmse / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_improvement_is_strict() {
        let a = ValidationMetrics::Regression(RegressionMetrics::compute(&array![1.0, 2.0], &array![1.5, 2.5]));
        let b = a.clone();
        assert!(!a.improves_on(&b));

        let better = ValidationMetrics::Regression(RegressionMetrics::compute(&array![1.0, 2.0], &array![1.0, 2.0]));
        assert!(better.improves_on(&a));
        assert!(!a.improves_on(&better));
    }
}
