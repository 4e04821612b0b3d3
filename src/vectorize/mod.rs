//! Feature vectorization
//!
//! Turns a record into the numeric row a model was trained on. The column
//! sequence always comes from a [`FeatureOrder`], never from the record.
//! Vectorization cannot fail: names the record does not carry, nulls, NaN
//! and infinities all become the fill value (0.0 by default).

mod order;

pub use order::FeatureOrder;

use crate::config::SANITIZE_FILL;
use crate::schema::RawRecord;
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use tracing::warn;

/// Name-based access to a record's numeric features
pub trait FeatureLookup {
    /// `None` when the field is absent or null
    fn feature(&self, name: &str) -> Option<f64>;
}

impl FeatureLookup for RawRecord {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.as_number())
    }
}

impl FeatureLookup for HashMap<String, f64> {
    fn feature(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<T: FeatureLookup + ?Sized> FeatureLookup for &T {
    fn feature(&self, name: &str) -> Option<f64> {
        (**self).feature(name)
    }
}

/// Assemble a vector in `order`, filling gaps and anomalies with 0.0
pub fn vectorize<R: FeatureLookup + ?Sized>(record: &R, order: &FeatureOrder) -> Vec<f64> {
    vectorize_with_fill(record, order, SANITIZE_FILL)
}

/// Same as [`vectorize`] with an explicit fill value
pub fn vectorize_with_fill<R: FeatureLookup + ?Sized>(
    record: &R,
    order: &FeatureOrder,
    fill: f64,
) -> Vec<f64> {
    order
        .iter()
        .map(|name| match record.feature(name) {
            None => fill,
            Some(v) if v.is_finite() => v,
            Some(v) => {
                warn!(feature = %name, value = %v, fill, "Numeric anomaly in feature vector");
                fill
            }
        })
        .collect()
}

/// Single row as an ndarray vector
pub fn vectorize_array<R: FeatureLookup + ?Sized>(record: &R, order: &FeatureOrder, fill: f64) -> Array1<f64> {
    Array1::from_vec(vectorize_with_fill(record, order, fill))
}

/// Stack records into a matrix with one row per record
pub fn vectorize_batch<R: FeatureLookup>(records: &[R], order: &FeatureOrder, fill: f64) -> Array2<f64> {
    let mut x = Array2::from_elem((records.len(), order.len()), fill);
    for (mut row, record) in x.rows_mut().into_iter().zip(records) {
        for (cell, value) in row.iter_mut().zip(vectorize_with_fill(record, order, fill)) {
            *cell = value;
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArrivalFeatures, RawValue, Task};

    fn order(names: &[&str]) -> FeatureOrder {
        FeatureOrder::from_names(names.iter().copied()).unwrap()
    }

    #[test]
    fn test_follows_order_not_record() {
        let record: RawRecord = [("b", 2.0), ("a", 1.0), ("c", 3.0)].into_iter().collect();
        assert_eq!(vectorize(&record, &order(&["c", "a", "b"])), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_missing_and_null_become_zero() {
        let mut record = RawRecord::new();
        record.insert("a", 4.0);
        record.insert("n", RawValue::Null);
        assert_eq!(vectorize(&record, &order(&["a", "n", "absent"])), vec![4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sanitizes_non_finite() {
        let record: RawRecord = [
            ("nan", f64::NAN),
            ("pos", f64::INFINITY),
            ("neg", f64::NEG_INFINITY),
            ("ok", -2.5),
        ]
        .into_iter()
        .collect();

        let v = vectorize(&record, &order(&["nan", "pos", "neg", "ok"]));
        assert_eq!(v, vec![0.0, 0.0, 0.0, -2.5]);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_unparseable_text_becomes_zero() {
        let record = RawRecord::new().with("a", "not a number").with("b", "1.5");
        assert_eq!(vectorize(&record, &order(&["a", "b"])), vec![0.0, 1.5]);
    }

    #[test]
    fn test_custom_fill() {
        let record = RawRecord::new().with("a", f64::NAN);
        assert_eq!(vectorize_with_fill(&record, &order(&["a", "b"]), -1.0), vec![-1.0, -1.0]);
    }

    #[test]
    fn test_typed_record_in_task_order() {
        let raw = crate::schema::arrival_sample_raw();
        let record = ArrivalFeatures::from_raw(&raw).unwrap();
        let order = FeatureOrder::for_task(Task::Arrival);

        let typed = vectorize(&record, &order);
        let untyped = vectorize(&raw.with_defaults(Task::Arrival), &order);
        assert_eq!(typed.len(), order.len());
        assert_eq!(typed[order.index_of("report_count").unwrap()], 5.0);
        // Nullable fields the raw map omits are zero either way
        assert_eq!(typed[order.index_of("distance_median").unwrap()], 0.0);
        assert_eq!(typed, untyped);
    }

    #[test]
    fn test_batch_shape() {
        let rows: Vec<RawRecord> = (0..3)
            .map(|i| RawRecord::new().with("a", i as f64).with("b", f64::NAN))
            .collect();
        let x = vectorize_batch(&rows, &order(&["a", "b"]), 0.0);
        assert_eq!(x.dim(), (3, 2));
        assert_eq!(x[[2, 0]], 2.0);
        assert_eq!(x[[1, 1]], 0.0);
    }
}
