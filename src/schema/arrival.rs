//! Arrival confirmation features
//!
//! One record describes the crowd reports gathered around a stop for a
//! candidate arrival. Identifier fields are optional here: they are useful
//! for tracing a row back to its source but never reach the model.

use super::{feature_record, FieldSpec, Task};

/// Identifier fields excluded from training
pub const ARRIVAL_METADATA_FIELDS: &[&str] = &["bus_id", "stop_id", "arrival_time"];

/// Model input columns, in training order
pub const ARRIVAL_TRAINABLE_FIELDS: &[&str] = &[
    "report_count",
    "unique_reporters",
    "reports_per_minute",
    "time_since_last_report_s",
    "time_since_first_report_s",
    "distance_mean",
    "distance_median",
    "distance_std",
    "pct_within_radius",
    "weighted_dist_mean",
    "acc_mean",
    "prev_arrival_time",
    "time_since_last_arrival_s",
    "t_mean",
    "t_std",
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_rush_hour",
    "is_early_morning",
    "is_mid_day",
    "is_evening",
    "is_night",
    "rain_1h",
    "snow_1h",
    "temperature",
    "wind_speed",
    "humidity",
    "visibility",
    "weather_delay_multiplier",
    "weather_clear",
    "weather_rain",
    "weather_snow",
    "weather_fog",
    "weather_clouds",
    "weather_thunderstorm",
    "weather_unknown",
    "traffic_level",
    "event_nearby",
];

feature_record! {
    /// Validated arrival confirmation record
    pub struct ArrivalFeatures for Task::Arrival {
        bus_id: Option<f64> = FieldSpec::int().nullable(),
        stop_id: Option<f64> = FieldSpec::int().nullable(),
        /// Reported arrival timestamp, Unix ms
        arrival_time: Option<f64> = FieldSpec::float().nullable(),

        report_count: f64 = FieldSpec::int().at_least(0.0),
        unique_reporters: f64 = FieldSpec::int().at_least(0.0),
        reports_per_minute: f64 = FieldSpec::float().at_least(0.0),
        time_since_last_report_s: f64 = FieldSpec::float().at_least(0.0),
        time_since_first_report_s: f64 = FieldSpec::float().at_least(0.0),

        /// Mean reporter distance from the stop, meters
        distance_mean: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        distance_median: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        distance_std: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        pct_within_radius: f64 = FieldSpec::float().between(0.0, 1.0),
        /// Accuracy-weighted mean distance
        weighted_dist_mean: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        acc_mean: f64 = FieldSpec::float().between(0.0, 1.0),

        prev_arrival_time: Option<f64> = FieldSpec::float().nullable(),
        time_since_last_arrival_s: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),

        /// Mean of reporter timestamps
        t_mean: f64 = FieldSpec::float(),
        t_std: f64 = FieldSpec::float().at_least(0.0),

        hour_of_day: f64 = FieldSpec::int().between(0.0, 23.0),
        /// 0 = Sunday
        day_of_week: f64 = FieldSpec::int().between(0.0, 6.0),
        is_weekend: f64 = FieldSpec::flag(),
        is_rush_hour: f64 = FieldSpec::flag(),
        is_early_morning: f64 = FieldSpec::flag(),
        is_mid_day: f64 = FieldSpec::flag(),
        is_evening: f64 = FieldSpec::flag(),
        is_night: f64 = FieldSpec::flag(),

        rain_1h: f64 = FieldSpec::float().at_least(0.0),
        snow_1h: f64 = FieldSpec::float().at_least(0.0),
        /// Celsius
        temperature: f64 = FieldSpec::float().between(-50.0, 60.0),
        wind_speed: f64 = FieldSpec::float().at_least(0.0),
        humidity: f64 = FieldSpec::float().between(0.0, 100.0),
        visibility: f64 = FieldSpec::float().at_least(0.0),
        weather_delay_multiplier: f64 = FieldSpec::float().at_least(1.0),

        // One-hot weather condition, at most one set by convention
        weather_clear: f64 = FieldSpec::flag().or_default(0.0),
        weather_rain: f64 = FieldSpec::flag().or_default(0.0),
        weather_snow: f64 = FieldSpec::flag().or_default(0.0),
        weather_fog: f64 = FieldSpec::flag().or_default(0.0),
        weather_clouds: f64 = FieldSpec::flag().or_default(0.0),
        weather_thunderstorm: f64 = FieldSpec::flag().or_default(0.0),
        weather_unknown: f64 = FieldSpec::flag().or_default(0.0),

        /// 0 unknown, 1 low, 2 medium, 3 high, 4 severe
        traffic_level: f64 = FieldSpec::int().between(0.0, 4.0).or_default(0.0),
        event_nearby: f64 = FieldSpec::flag().or_default(0.0),
    }
}

impl ArrivalFeatures {
    /// Number of weather one-hot flags set; more than one is tolerated
    pub fn weather_flags_set(&self) -> usize {
        [
            self.weather_clear,
            self.weather_rain,
            self.weather_snow,
            self.weather_fog,
            self.weather_clouds,
            self.weather_thunderstorm,
            self.weather_unknown,
        ]
        .iter()
        .filter(|&&v| v >= 1.0)
        .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CrowdBusError;
    use crate::schema::RawRecord;

    /// A complete, valid arrival record
    pub(crate) fn sample_raw() -> RawRecord {
        RawRecord::new()
            .with("bus_id", 123.0)
            .with("stop_id", 456.0)
            .with("report_count", 5.0)
            .with("unique_reporters", 4.0)
            .with("reports_per_minute", 2.5)
            .with("time_since_last_report_s", 10.5)
            .with("time_since_first_report_s", 45.2)
            .with("distance_mean", 15.3)
            .with("pct_within_radius", 0.8)
            .with("acc_mean", 0.85)
            .with("t_mean", 1_704_567_880.0)
            .with("t_std", 5.2)
            .with("hour_of_day", 14.0)
            .with("day_of_week", 3.0)
            .with("is_weekend", 0.0)
            .with("is_rush_hour", 0.0)
            .with("is_early_morning", 0.0)
            .with("is_mid_day", 1.0)
            .with("is_evening", 0.0)
            .with("is_night", 0.0)
            .with("rain_1h", 0.0)
            .with("snow_1h", 0.0)
            .with("temperature", 28.5)
            .with("wind_speed", 3.2)
            .with("humidity", 65.0)
            .with("visibility", 10_000.0)
            .with("weather_delay_multiplier", 1.0)
            .with("weather_clear", 1.0)
    }

    #[test]
    fn test_parse_sample() {
        let record = ArrivalFeatures::from_raw(&sample_raw()).unwrap();
        assert_eq!(record.report_count, 5.0);
        assert_eq!(record.distance_mean, Some(15.3));
        assert_eq!(record.distance_median, None);
        assert_eq!(record.traffic_level, 0.0);
        assert_eq!(record.weather_flags_set(), 1);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let raw = sample_raw().with("confirm_prob", 0.7).with("driver_name", "x");
        assert!(ArrivalFeatures::from_raw(&raw).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let mut raw = sample_raw();
        raw.remove("acc_mean");
        let err = ArrivalFeatures::from_raw(&raw).unwrap_err();
        assert!(matches!(err, CrowdBusError::SchemaValidation { ref field, .. } if field == "acc_mean"));
    }

    #[test]
    fn test_out_of_range_field() {
        let raw = sample_raw().with("pct_within_radius", 1.2);
        let err = ArrivalFeatures::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("pct_within_radius"));
    }

    #[test]
    fn test_metadata_optional() {
        let mut raw = sample_raw();
        raw.remove("bus_id");
        raw.remove("stop_id");
        let record = ArrivalFeatures::from_raw(&raw).unwrap();
        assert_eq!(record.bus_id, None);
    }

    #[test]
    fn test_field_count() {
        assert_eq!(ArrivalFeatures::FIELDS.len(), 42);
        assert_eq!(ARRIVAL_TRAINABLE_FIELDS.len(), 39);
    }
}
