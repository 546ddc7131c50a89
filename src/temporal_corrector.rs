/// Stage 3: chronological ordering and duplicate-fix collapse.
///
/// Argos often delivers the same fix several times, or two fixes inside the
/// same minute from different satellite passes. Fixes are sorted, bucketed by
/// the timestamp floored to the bucket width (one minute by default) and each
/// bucket keeps its best-ranked fix. Interval statistics are then computed on
/// the corrected sequence; nothing is removed for being too close in time.

use chrono::{DateTime, Utc};

use crate::config::TemporalConfig;
use crate::error::{TrackError, TrackResult};
use crate::summary::{mean, median, round_to, SummaryRow};
use crate::telemetry::{TelemetryPoint, Trajectory};

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalStats {
    pub transmitter_id: String,
    pub original_count: usize,
    pub corrected_count: usize,
    pub duplicates_removed: usize,
    pub already_sorted: bool,
    /// Positive intervals shorter than the short-interval threshold.
    pub short_intervals: usize,
    pub mean_interval_h: f64,
    pub median_interval_h: f64,
    pub gaps_over_threshold: usize,
    pub max_gap_days: f64,
}

pub struct TemporalCorrector {
    bucket_secs: i64,
    short_interval_secs: f64,
    gap_threshold_secs: f64,
}

impl TemporalCorrector {
    pub fn new(config: &TemporalConfig) -> Self {
        Self {
            bucket_secs: config.dedup_bucket_secs.max(1),
            short_interval_secs: config.short_interval_secs,
            gap_threshold_secs: config.gap_threshold_hours * 3600.0,
        }
    }

    pub fn correct(&self, trajectory: Trajectory) -> TrackResult<(Trajectory, TemporalStats)> {
        if !trajectory.schema.has_timestamps() {
            return Err(TrackError::MissingRequiredField("timestamp".into()));
        }

        let original_count = trajectory.len();
        let mut timed = timed_points(&trajectory.points)?;

        let already_sorted = timed.windows(2).all(|w| w[0].0 <= w[1].0);

        // Stable: equal instants keep their input order.
        timed.sort_by_key(|(t, _)| *t);

        let kept = self.collapse_buckets(timed);
        let corrected: Vec<TelemetryPoint> = kept.iter().map(|(_, p)| (*p).clone()).collect();
        let times: Vec<DateTime<Utc>> = kept.iter().map(|(t, _)| *t).collect();

        let intervals: Vec<f64> = times
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();

        let short_intervals = intervals
            .iter()
            .filter(|&&dt| dt > 0.0 && dt < self.short_interval_secs)
            .count();

        let positive_hours: Vec<f64> = intervals
            .iter()
            .filter(|&&dt| dt > 0.0)
            .map(|dt| dt / 3600.0)
            .collect();

        let gaps: Vec<f64> = intervals
            .iter()
            .copied()
            .filter(|&dt| dt > self.gap_threshold_secs)
            .collect();
        let max_gap_days = gaps.iter().copied().fold(0.0, f64::max) / 86_400.0;

        let stats = TemporalStats {
            transmitter_id: trajectory.transmitter_id.clone(),
            original_count,
            corrected_count: corrected.len(),
            duplicates_removed: original_count - corrected.len(),
            already_sorted,
            short_intervals,
            mean_interval_h: mean(&positive_hours),
            median_interval_h: median(&positive_hours),
            gaps_over_threshold: gaps.len(),
            max_gap_days,
        };

        tracing::info!(
            transmitter = %stats.transmitter_id,
            original = stats.original_count,
            corrected = stats.corrected_count,
            duplicates = stats.duplicates_removed,
            sorted = stats.already_sorted,
            short_intervals = stats.short_intervals,
            gaps = stats.gaps_over_threshold,
            "temporal correction done"
        );

        Ok((trajectory.with_points(corrected), stats))
    }

    /// One fix per bucket: highest quality rank, first in time order on ties.
    /// Tracks without a quality column keep the first fix of each bucket.
    fn collapse_buckets<'a>(
        &self,
        timed: Vec<(DateTime<Utc>, &'a TelemetryPoint)>,
    ) -> Vec<(DateTime<Utc>, &'a TelemetryPoint)> {
        let mut kept: Vec<(DateTime<Utc>, &TelemetryPoint)> = Vec::with_capacity(timed.len());
        let mut current_bucket: Option<i64> = None;

        for (time, point) in timed {
            let bucket = time.timestamp().div_euclid(self.bucket_secs);

            if current_bucket == Some(bucket) {
                if let Some(last) = kept.last_mut() {
                    if rank_of(point) > rank_of(last.1) {
                        *last = (time, point);
                    }
                }
                continue;
            }

            current_bucket = Some(bucket);
            kept.push((time, point));
        }

        // Winners never leave their bucket, so this is a no-op on valid input.
        kept.sort_by_key(|(t, _)| *t);
        kept
    }
}

fn rank_of(point: &TelemetryPoint) -> u8 {
    point.quality.as_ref().map(|q| q.rank()).unwrap_or(0)
}

/// Pairs every fix with its instant; a fix without one cannot be ordered.
pub(crate) fn timed_points(points: &[TelemetryPoint]) -> TrackResult<Vec<(DateTime<Utc>, &TelemetryPoint)>> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            p.timestamp.map(|t| (t, p)).ok_or_else(|| TrackError::UnparseableValue {
                field: "timestamp".into(),
                value: String::new(),
                row: i + 2,
            })
        })
        .collect()
}

impl SummaryRow for TemporalStats {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "original_points", "corrected_points", "duplicates_removed",
            "already_sorted", "short_intervals", "mean_interval_h", "median_interval_h",
            "long_gaps", "max_gap_days",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.original_count.to_string(),
            self.corrected_count.to_string(),
            self.duplicates_removed.to_string(),
            if self.already_sorted { "yes" } else { "no" }.to_string(),
            self.short_intervals.to_string(),
            format!("{:.1}", self.mean_interval_h),
            format!("{:.1}", self.median_interval_h),
            self.gaps_over_threshold.to_string(),
            format!("{:.1}", self.max_gap_days),
        ]
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        // Means and medians aggregate over the rounded per-track values.
        let means: Vec<f64> = rows.iter().map(|r| round_to(r.mean_interval_h, 1)).collect();
        let medians: Vec<f64> = rows.iter().map(|r| round_to(r.median_interval_h, 1)).collect();

        Some(vec![
            "TOTAL".to_string(),
            rows.iter().map(|r| r.original_count).sum::<usize>().to_string(),
            rows.iter().map(|r| r.corrected_count).sum::<usize>().to_string(),
            rows.iter().map(|r| r.duplicates_removed).sum::<usize>().to_string(),
            "-".to_string(),
            rows.iter().map(|r| r.short_intervals).sum::<usize>().to_string(),
            format!("{:.1}", mean(&means)),
            format!("{:.1}", median(&medians)),
            rows.iter().map(|r| r.gaps_over_threshold).sum::<usize>().to_string(),
            "-".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{QualityClass, TrackSchema};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 10, 0, 0).unwrap()
    }

    fn schema(quality: bool) -> TrackSchema {
        TrackSchema {
            headers: vec!["Date".into(), "Latitude".into(), "Longitude".into(), "LocationQuality".into()],
            latitude: 1,
            longitude: 2,
            timestamp: Some(0),
            quality: quality.then_some(3),
        }
    }

    fn fix(offset_secs: i64, lat: f64, lon: f64, quality: Option<&str>) -> TelemetryPoint {
        let mut p = TelemetryPoint::new(lat, lon).with_timestamp(base() + Duration::seconds(offset_secs));
        p.quality = quality.and_then(QualityClass::parse);
        p
    }

    fn corrector() -> TemporalCorrector {
        TemporalCorrector::new(&TemporalConfig::default())
    }

    #[test]
    fn test_duplicate_minute_keeps_best_quality() {
        let track = Trajectory::new(
            "241136",
            schema(true),
            vec![
                fix(0, 8.0, -80.0, Some("3")),
                fix(0, 8.001, -80.001, Some("1")),
                fix(300, 8.5, -79.5, Some("2")),
            ],
        );

        let (out, stats) = corrector().correct(track).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(out.points[0].quality, Some(QualityClass::Lc3));
        assert_eq!(out.points[0].latitude, 8.0);
    }

    #[test]
    fn test_better_fix_later_in_same_minute_wins() {
        let track = Trajectory::new(
            "241136",
            schema(true),
            vec![fix(5, 8.0, -80.0, Some("B")), fix(40, 8.2, -80.2, Some("LC2")), fix(50, 8.3, -80.3, Some("2"))],
        );

        let (out, _) = corrector().correct(track).unwrap();
        assert_eq!(out.len(), 1);
        // Ties on rank keep the earliest fix.
        assert_eq!(out.points[0].latitude, 8.2);
    }

    #[test]
    fn test_without_quality_keeps_first() {
        let track = Trajectory::new(
            "x",
            schema(false),
            vec![fix(10, 8.0, -80.0, None), fix(20, 9.0, -81.0, None)],
        );
        let (out, stats) = corrector().correct(track).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.points[0].latitude, 8.0);
        assert_eq!(stats.duplicates_removed, 1);
    }

    #[test]
    fn test_sorts_and_reports_unsorted_input() {
        let track = Trajectory::new(
            "x",
            schema(true),
            vec![fix(7200, 9.0, -80.0, Some("1")), fix(0, 8.0, -80.0, Some("1")), fix(3600, 8.5, -80.0, Some("1"))],
        );
        let (out, stats) = corrector().correct(track).unwrap();
        assert!(!stats.already_sorted);
        let lats: Vec<f64> = out.points.iter().map(|p| p.latitude).collect();
        assert_eq!(lats, vec![8.0, 8.5, 9.0]);
        assert_eq!(stats.mean_interval_h, 1.0);
        assert_eq!(stats.median_interval_h, 1.0);
    }

    #[test]
    fn test_short_intervals_and_gaps() {
        // 20 s apart but across a minute boundary, then a 4-day gap.
        let track = Trajectory::new(
            "x",
            schema(true),
            vec![
                fix(50, 8.0, -80.0, Some("1")),
                fix(70, 8.0, -80.0, Some("1")),
                fix(70 + 4 * 86_400, 8.0, -80.0, Some("1")),
            ],
        );
        let (out, stats) = corrector().correct(track).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(stats.short_intervals, 1);
        assert_eq!(stats.gaps_over_threshold, 1);
        assert!((stats.max_gap_days - 4.0).abs() < 1e-9);
        assert!(stats.already_sorted);
    }

    #[test]
    fn test_missing_timestamp_column() {
        let mut s = schema(true);
        s.timestamp = None;
        let track = Trajectory::new("x", s, vec![TelemetryPoint::new(8.0, -80.0)]);
        let err = corrector().correct(track).unwrap_err();
        assert!(matches!(err, TrackError::MissingRequiredField(f) if f == "timestamp"));
    }

    #[test]
    fn test_empty_track_is_neutral() {
        let (out, stats) = corrector().correct(Trajectory::new("x", schema(true), vec![])).unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.mean_interval_h, 0.0);
        assert_eq!(stats.max_gap_days, 0.0);
    }

    fn arb_track() -> impl Strategy<Value = Trajectory> {
        prop::collection::vec((0i64..20_000, 0usize..4), 0..40).prop_map(|raw| {
            let classes = ["3", "2", "1", "B"];
            let points = raw
                .into_iter()
                .map(|(secs, q)| fix(secs * 7, 8.0, -80.0, Some(classes[q])))
                .collect();
            Trajectory::new("prop", schema(true), points)
        })
    }

    proptest! {
        #[test]
        fn prop_output_strictly_increasing_and_minute_unique(track in arb_track()) {
            let input_len = track.len();
            let (out, _) = corrector().correct(track).unwrap();
            prop_assert!(out.len() <= input_len);
            for w in out.points.windows(2) {
                let (a, b) = (w[0].timestamp.unwrap(), w[1].timestamp.unwrap());
                prop_assert!(a < b);
                prop_assert!(a.timestamp().div_euclid(60) != b.timestamp().div_euclid(60));
            }
        }

        #[test]
        fn prop_second_pass_is_idempotent(track in arb_track()) {
            let (once, _) = corrector().correct(track).unwrap();
            let (twice, stats) = corrector().correct(once.clone()).unwrap();
            prop_assert_eq!(stats.duplicates_removed, 0);
            prop_assert!(stats.already_sorted);
            prop_assert_eq!(twice.points, once.points);
        }
    }
}
