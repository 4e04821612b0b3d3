//! ETA regression features

use super::{feature_record, FieldSpec, Task};

/// Identifier fields excluded from training
pub const ETA_METADATA_FIELDS: &[&str] = &["bus_id", "target_stop_id", "prediction_made_at"];

/// Model input columns, in training order
pub const ETA_TRAINABLE_FIELDS: &[&str] = &[
    // schedule and delay
    "scheduled_arrival_time",
    "seconds_until_scheduled",
    "current_delay_seconds",
    "delay_at_last_stop",
    "avg_delay_this_route_today",
    "avg_delay_same_hour",
    "schedule_adherence_score",
    "delay_trend_last_3_stops",
    "is_delay_accelerating",
    "delay_per_stop_rate",
    // route and segments
    "stops_remaining",
    "pct_route_completed",
    "distance_remaining_km",
    "total_segment_time_remaining",
    "avg_segment_time_remaining",
    "stddev_segment_time",
    "min_segment_time",
    "max_segment_time",
    "segment_time_variance",
    // checkpoint freshness
    "minutes_since_last_checkpoint",
    "checkpoint_freshness_score",
    "checkpoint_age_penalty",
    "has_recent_checkpoint",
    "stops_since_last_checkpoint",
    "time_to_next_expected_report",
    "checkpoint_reliability_score",
    // history
    "historical_delay_avg",
    "historical_delay_p50",
    "historical_delay_p90",
    "same_day_hour_avg_delay",
    "recent_24h_performance",
    "recent_7d_performance",
    "route_punctuality_score",
    "historical_completion_rate",
    "typical_delay_this_stop",
    "historical_sample_count",
    // time
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_rush_hour",
    "is_peak_period",
    "minutes_into_rush_hour",
    // weather and context
    "temperature",
    "rain_1h",
    "snow_1h",
    "visibility",
    "wind_speed",
    "humidity",
    "weather_delay_multiplier",
    "traffic_level_encoded",
    "is_holiday",
    "is_special_event",
    "weather_clear",
    "weather_rain",
    "weather_snow",
    "weather_fog",
    "weather_clouds",
    "weather_thunderstorm",
    "weather_unknown",
    // reporters
    "reporters_at_target_stop",
    "avg_reporter_accuracy_target",
    "recent_report_density",
    "report_consensus_strength",
    "has_high_quality_reporter",
    "reporter_cluster_tightness",
];

feature_record! {
    /// Validated ETA record
    pub struct EtaFeatures for Task::Eta {
        bus_id: Option<f64> = FieldSpec::int().nullable(),
        target_stop_id: Option<f64> = FieldSpec::int().nullable(),
        /// Unix ms
        prediction_made_at: Option<f64> = FieldSpec::float().nullable(),

        scheduled_arrival_time: Option<f64> = FieldSpec::float().nullable(),
        seconds_until_scheduled: Option<f64> = FieldSpec::float().nullable(),
        current_delay_seconds: f64 = FieldSpec::float().or_default(0.0),
        delay_at_last_stop: f64 = FieldSpec::float().or_default(0.0),
        avg_delay_this_route_today: f64 = FieldSpec::float().or_default(0.0),
        avg_delay_same_hour: f64 = FieldSpec::float().or_default(0.0),
        schedule_adherence_score: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),
        delay_trend_last_3_stops: f64 = FieldSpec::float().or_default(0.0),
        is_delay_accelerating: f64 = FieldSpec::flag().or_default(0.0),
        /// Seconds of delay gained per stop
        delay_per_stop_rate: f64 = FieldSpec::float().or_default(0.0),

        stops_remaining: f64 = FieldSpec::int().at_least(0.0),
        pct_route_completed: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.0),
        distance_remaining_km: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        total_segment_time_remaining: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        avg_segment_time_remaining: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        stddev_segment_time: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        min_segment_time: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        max_segment_time: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        segment_time_variance: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),

        /// Minutes since the last confirmed arrival; drives output confidence
        minutes_since_last_checkpoint: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        checkpoint_freshness_score: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.0),
        checkpoint_age_penalty: f64 = FieldSpec::float().at_least(1.0).or_default(2.0),
        has_recent_checkpoint: f64 = FieldSpec::flag().or_default(0.0),
        stops_since_last_checkpoint: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        time_to_next_expected_report: Option<f64> = FieldSpec::float().at_least(0.0).nullable(),
        checkpoint_reliability_score: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),

        historical_delay_avg: f64 = FieldSpec::float().or_default(0.0),
        historical_delay_p50: f64 = FieldSpec::float().or_default(0.0),
        historical_delay_p90: f64 = FieldSpec::float().or_default(0.0),
        same_day_hour_avg_delay: f64 = FieldSpec::float().or_default(0.0),
        recent_24h_performance: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),
        recent_7d_performance: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),
        route_punctuality_score: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),
        historical_completion_rate: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.9),
        typical_delay_this_stop: f64 = FieldSpec::float().or_default(0.0),
        historical_sample_count: f64 = FieldSpec::int().at_least(0.0).or_default(0.0),

        hour_of_day: f64 = FieldSpec::int().between(0.0, 23.0),
        day_of_week: f64 = FieldSpec::int().between(0.0, 6.0),
        is_weekend: f64 = FieldSpec::flag(),
        is_rush_hour: f64 = FieldSpec::flag(),
        is_peak_period: f64 = FieldSpec::flag(),
        minutes_into_rush_hour: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),

        temperature: f64 = FieldSpec::float().between(-50.0, 60.0).or_default(20.0),
        rain_1h: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        snow_1h: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        visibility: f64 = FieldSpec::float().at_least(0.0).or_default(10_000.0),
        wind_speed: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        humidity: f64 = FieldSpec::float().between(0.0, 100.0).or_default(50.0),
        weather_delay_multiplier: f64 = FieldSpec::float().at_least(1.0).or_default(1.0),
        traffic_level_encoded: f64 = FieldSpec::int().between(0.0, 4.0).or_default(0.0),
        is_holiday: f64 = FieldSpec::flag().or_default(0.0),
        is_special_event: f64 = FieldSpec::flag().or_default(0.0),

        weather_clear: f64 = FieldSpec::flag().or_default(0.0),
        weather_rain: f64 = FieldSpec::flag().or_default(0.0),
        weather_snow: f64 = FieldSpec::flag().or_default(0.0),
        weather_fog: f64 = FieldSpec::flag().or_default(0.0),
        weather_clouds: f64 = FieldSpec::flag().or_default(0.0),
        weather_thunderstorm: f64 = FieldSpec::flag().or_default(0.0),
        weather_unknown: f64 = FieldSpec::flag().or_default(0.0),

        reporters_at_target_stop: f64 = FieldSpec::int().at_least(0.0).or_default(0.0),
        avg_reporter_accuracy_target: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.5),
        recent_report_density: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
        report_consensus_strength: f64 = FieldSpec::float().between(0.0, 1.0).or_default(0.0),
        /// Any reporter above 90% accuracy present
        has_high_quality_reporter: f64 = FieldSpec::flag().or_default(0.0),
        reporter_cluster_tightness: f64 = FieldSpec::float().at_least(0.0).or_default(0.0),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::RawRecord;

    /// Only the required ETA fields; everything else defaults
    pub(crate) fn minimal_raw() -> RawRecord {
        RawRecord::new()
            .with("stops_remaining", 4.0)
            .with("hour_of_day", 8.0)
            .with("day_of_week", 1.0)
            .with("is_weekend", 0.0)
            .with("is_rush_hour", 1.0)
            .with("is_peak_period", 1.0)
    }

    #[test]
    fn test_defaults_applied() {
        let record = EtaFeatures::from_raw(&minimal_raw()).unwrap();
        assert_eq!(record.schedule_adherence_score, 0.5);
        assert_eq!(record.checkpoint_age_penalty, 2.0);
        assert_eq!(record.historical_completion_rate, 0.9);
        assert_eq!(record.temperature, 20.0);
        assert_eq!(record.visibility, 10_000.0);
        assert_eq!(record.humidity, 50.0);
        assert_eq!(record.minutes_since_last_checkpoint, None);
    }

    #[test]
    fn test_penalty_floor() {
        let raw = minimal_raw().with("checkpoint_age_penalty", 0.5);
        assert!(EtaFeatures::from_raw(&raw).is_err());
    }

    #[test]
    fn test_fractional_count_rejected() {
        let raw = minimal_raw().with("stops_remaining", 2.5);
        assert!(EtaFeatures::from_raw(&raw).is_err());
    }

    #[test]
    fn test_field_count() {
        assert_eq!(EtaFeatures::FIELDS.len(), 68);
        assert_eq!(ETA_TRAINABLE_FIELDS.len(), 65);
    }
}
