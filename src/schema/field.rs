//! Declarative field specifications

use super::raw::{RawRecord, RawValue};
use crate::error::{CrowdBusError, Result};
use serde::Serialize;

/// Numeric kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    /// Whole numbers only (counts, flags, hour of day)
    Int,
    Float,
}

/// What happens when a field is absent or null
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Presence {
    /// Absence is a validation failure
    Required,
    /// Absence is replaced by the value
    Default(f64),
    /// Absence is kept as `None`
    Nullable,
}

/// One input field: name, kind, inclusive range and presence rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub presence: Presence,
}

impl FieldSpec {
    pub const fn float() -> Self {
        Self {
            name: "",
            kind: FieldKind::Float,
            min: None,
            max: None,
            presence: Presence::Required,
        }
    }

    pub const fn int() -> Self {
        Self {
            kind: FieldKind::Int,
            ..Self::float()
        }
    }

    pub const fn named(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    pub const fn at_least(self, min: f64) -> Self {
        Self {
            min: Some(min),
            ..self
        }
    }

    pub const fn between(self, min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..self
        }
    }

    /// Flag fields: integers in [0, 1]
    pub const fn flag() -> Self {
        Self::int().between(0.0, 1.0)
    }

    pub const fn or_default(self, value: f64) -> Self {
        Self {
            presence: Presence::Default(value),
            ..self
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            presence: Presence::Nullable,
            ..self
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self.presence, Presence::Required)
    }

    /// Resolve a raw value into a checked number, applying the presence rule
    pub fn resolve(&self, raw: Option<&RawValue>) -> Result<Option<f64>> {
        let value = match raw {
            None | Some(RawValue::Null) => None,
            Some(RawValue::Number(v)) => Some(*v),
            Some(RawValue::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
            Some(RawValue::Text(text)) => parse_text(self.name, text)?,
        };

        let value = match (value, self.presence) {
            (Some(v), _) => v,
            (None, Presence::Default(default)) => return Ok(Some(default)),
            (None, Presence::Nullable) => return Ok(None),
            (None, Presence::Required) => {
                return Err(CrowdBusError::schema(self.name, "required field is missing"));
            }
        };

        self.check(value)?;
        Ok(Some(value))
    }

    /// Type and range check of a present value
    pub fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(CrowdBusError::schema(
                self.name,
                format!("must be a finite number, got {}", value),
            ));
        }
        if self.kind == FieldKind::Int && value.fract() != 0.0 {
            return Err(CrowdBusError::schema(
                self.name,
                format!("must be an integer, got {}", value),
            ));
        }
        if let Some(min) = self.min {
            if value < min {
                return Err(CrowdBusError::schema(
                    self.name,
                    format!("must be >= {}, got {}", min, value),
                ));
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return Err(CrowdBusError::schema(
                    self.name,
                    format!("must be <= {}, got {}", max, value),
                ));
            }
        }
        Ok(())
    }

    /// Resolve this field out of a record
    pub fn resolve_in(&self, raw: &RawRecord) -> Result<Option<f64>> {
        self.resolve(raw.get(self.name))
    }

    /// Human readable range, e.g. `[0, 23]` or `>= 0`
    pub fn range_label(&self) -> String {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => format!("[{}, {}]", lo, hi),
            (Some(lo), None) => format!(">= {}", lo),
            (None, Some(hi)) => format!("<= {}", hi),
            (None, None) => "any".to_string(),
        }
    }
}

fn parse_text(field: &str, text: &str) -> Result<Option<f64>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed {
        "true" | "True" | "TRUE" => return Ok(Some(1.0)),
        "false" | "False" | "FALSE" => return Ok(Some(0.0)),
        _ => {}
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| CrowdBusError::schema(field, format!("expected a number, got {:?}", text)))
}

/// Storage type of a record field, `f64` or `Option<f64>`
pub trait FieldValue: Sized {
    const NULLABLE: bool;

    fn from_resolved(value: Option<f64>) -> Self;

    fn as_feature(&self) -> Option<f64>;
}

impl FieldValue for f64 {
    const NULLABLE: bool = false;

    fn from_resolved(value: Option<f64>) -> Self {
        // Required and defaulted specs always resolve to Some
        value.unwrap_or(0.0)
    }

    fn as_feature(&self) -> Option<f64> {
        Some(*self)
    }
}

impl FieldValue for Option<f64> {
    const NULLABLE: bool = true;

    fn from_resolved(value: Option<f64>) -> Self {
        value
    }

    fn as_feature(&self) -> Option<f64> {
        *self
    }
}

/// Declares a feature record struct together with its field table,
/// a `from_raw` constructor and a name-based feature lookup.
macro_rules! feature_record {
    (
        $(#[$attr:meta])*
        pub struct $name:ident for $task:path {
            $(
                $(#[$fattr:meta])*
                $field:ident : $ty:ty = $spec:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct $name {
            $(
                $(#[$fattr])*
                pub $field: $ty,
            )+
        }

        impl $name {
            /// Declared fields, in declaration order
            pub const FIELDS: &'static [$crate::schema::FieldSpec] = &[
                $( $spec.named(stringify!($field)), )+
            ];

            #[cfg(test)]
            pub(crate) const NULLABILITY: &'static [bool] = &[
                $( <$ty as $crate::schema::FieldValue>::NULLABLE, )+
            ];

            /// Validate a raw mapping; unknown keys are ignored
            pub fn from_raw(raw: &$crate::schema::RawRecord) -> $crate::error::Result<Self> {
                Ok(Self {
                    $(
                        $field: <$ty as $crate::schema::FieldValue>::from_resolved(
                            $spec.named(stringify!($field)).resolve_in(raw)?,
                        ),
                    )+
                })
            }
        }

        impl $crate::schema::FeatureSchema for $name {
            const TASK: $crate::schema::Task = $task;

            fn fields() -> &'static [$crate::schema::FieldSpec] {
                Self::FIELDS
            }

            fn from_raw(raw: &$crate::schema::RawRecord) -> $crate::error::Result<Self> {
                $name::from_raw(raw)
            }
        }

        impl $crate::vectorize::FeatureLookup for $name {
            fn feature(&self, name: &str) -> Option<f64> {
                match name {
                    $( stringify!($field) => $crate::schema::FieldValue::as_feature(&self.$field), )+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use feature_record;

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: FieldSpec = FieldSpec::int().between(0.0, 23.0).named("hour_of_day");

    #[test]
    fn test_required_missing_fails() {
        let err = HOUR.resolve(None).unwrap_err();
        assert!(matches!(err, CrowdBusError::SchemaValidation { ref field, .. } if field == "hour_of_day"));
    }

    #[test]
    fn test_range_checks() {
        assert_eq!(HOUR.resolve(Some(&RawValue::Number(14.0))).unwrap(), Some(14.0));
        assert!(HOUR.resolve(Some(&RawValue::Number(24.0))).is_err());
        assert!(HOUR.resolve(Some(&RawValue::Number(-1.0))).is_err());
        assert!(HOUR.resolve(Some(&RawValue::Number(3.5))).is_err());
        assert!(HOUR.resolve(Some(&RawValue::Number(f64::NAN))).is_err());
    }

    #[test]
    fn test_default_and_nullable() {
        let score = FieldSpec::float().between(0.0, 1.0).or_default(0.5).named("score");
        assert_eq!(score.resolve(None).unwrap(), Some(0.5));
        assert_eq!(score.resolve(Some(&RawValue::Null)).unwrap(), Some(0.5));

        let dist = FieldSpec::float().at_least(0.0).nullable().named("distance_mean");
        assert_eq!(dist.resolve(None).unwrap(), None);
        assert!(dist.resolve(Some(&RawValue::Number(-3.0))).is_err());
    }

    #[test]
    fn test_text_and_bool_coercion() {
        let flag = FieldSpec::flag().named("is_weekend");
        assert_eq!(flag.resolve(Some(&RawValue::Bool(true))).unwrap(), Some(1.0));
        assert_eq!(flag.resolve(Some(&RawValue::Text(" 0 ".into()))).unwrap(), Some(0.0));
        assert_eq!(flag.resolve(Some(&RawValue::Text("True".into()))).unwrap(), Some(1.0));
        assert!(flag.resolve(Some(&RawValue::Text("yes".into()))).is_err());
        // Empty CSV cell counts as absent
        assert!(flag.resolve(Some(&RawValue::Text(String::new()))).is_err());
    }

    #[test]
    fn test_range_label() {
        assert_eq!(HOUR.range_label(), "[0, 23]");
        assert_eq!(FieldSpec::float().at_least(1.0).range_label(), ">= 1");
        assert_eq!(FieldSpec::float().range_label(), "any");
    }
}
