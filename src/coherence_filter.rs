/// Stage 4: biological coherence filter.
///
/// Removes fixes outside the coherence box, then fixes that imply a swim
/// speed no turtle can sustain. For every violating pair the neighbours
/// decide which end is the outlier:
///
/// 1. the earlier fix is also too fast from its predecessor → drop it;
/// 2. else the later fix is also too fast to its successor → drop that one;
/// 3. else drop the earlier fix.
///
/// All decisions use the speeds of the sequence as it entered the pass, and
/// marked fixes are removed together at the end. Removing a fix can create a
/// new fast pair; that pair is not re-examined.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use geo::GeodesicDistance;

use crate::config::CoherenceConfig;
use crate::error::{TrackError, TrackResult};
use crate::summary::{round_to, SummaryRow};
use crate::telemetry::{BoundingBox, TelemetryPoint, Trajectory};
use crate::temporal_corrector::timed_points;

#[derive(Debug, Clone, PartialEq)]
pub struct CoherenceStats {
    pub transmitter_id: String,
    pub initial_count: usize,
    pub out_of_range: usize,
    pub violating_segments: usize,
    pub removed_for_speed: usize,
    pub final_count: usize,
    /// Fastest step observed before any removal, km/h.
    pub max_speed_kmh: f64,
}

/// Which fix of a violating pair gets dropped, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedVerdict {
    /// Earlier fix is also too fast from its predecessor.
    EarlierAnomalous,
    /// Later fix is also too fast to its successor.
    LaterAnomalous,
    /// Neighbours look fine; drop the earlier fix.
    EarlierByDefault,
}

impl SpeedVerdict {
    /// Decides which end of the fast pair `index → index + 1` to drop.
    pub fn decide(speeds: &[f64], index: usize, max_speed_kmh: f64) -> Self {
        let before = if index > 0 { speeds[index - 1] } else { 0.0 };
        let after = speeds.get(index + 1).copied().unwrap_or(0.0);

        if before > max_speed_kmh {
            SpeedVerdict::EarlierAnomalous
        } else if after > max_speed_kmh {
            SpeedVerdict::LaterAnomalous
        } else {
            SpeedVerdict::EarlierByDefault
        }
    }

    pub fn dropped_index(self, index: usize) -> usize {
        match self {
            SpeedVerdict::EarlierAnomalous | SpeedVerdict::EarlierByDefault => index,
            SpeedVerdict::LaterAnomalous => index + 1,
        }
    }
}

/// Ground speed between two fixes in km/h over the WGS84 geodesic.
/// Non-positive elapsed time yields 0.
pub fn implied_speed_kmh(a: &TelemetryPoint, a_time: DateTime<Utc>, b: &TelemetryPoint, b_time: DateTime<Utc>) -> f64 {
    let hours = (b_time - a_time).num_milliseconds() as f64 / 3_600_000.0;
    if hours <= 0.0 {
        return 0.0;
    }

    let distance_km = a.geo_point().geodesic_distance(&b.geo_point()) / 1000.0;
    distance_km / hours
}

pub struct CoherenceFilter {
    max_speed_kmh: f64,
    area: BoundingBox,
}

impl CoherenceFilter {
    pub fn new(config: &CoherenceConfig) -> Self {
        Self {
            max_speed_kmh: config.max_speed_kmh,
            area: config.coherence_area,
        }
    }

    pub fn filter(&self, trajectory: Trajectory) -> TrackResult<(Trajectory, CoherenceStats)> {
        if !trajectory.schema.has_timestamps() {
            return Err(TrackError::MissingRequiredField("timestamp".into()));
        }

        let initial_count = trajectory.len();
        let mut timed = timed_points(&trajectory.points)?;
        timed.sort_by_key(|(t, _)| *t);

        let in_area: Vec<(DateTime<Utc>, &TelemetryPoint)> = timed
            .into_iter()
            .filter(|(_, p)| self.area.contains(p.latitude, p.longitude))
            .collect();
        let out_of_range = initial_count - in_area.len();

        if out_of_range > 0 {
            tracing::info!(
                transmitter = %trajectory.transmitter_id,
                out_of_range,
                "points outside coherence area ({})",
                self.area
            );
        }

        if in_area.len() < 2 {
            tracing::warn!(
                transmitter = %trajectory.transmitter_id,
                remaining = in_area.len(),
                "too few points after area check, speed test skipped"
            );
            let points: Vec<TelemetryPoint> = in_area.into_iter().map(|(_, p)| p.clone()).collect();
            let stats = CoherenceStats {
                transmitter_id: trajectory.transmitter_id.clone(),
                initial_count,
                out_of_range,
                violating_segments: 0,
                removed_for_speed: 0,
                final_count: points.len(),
                max_speed_kmh: 0.0,
            };
            return Ok((trajectory.with_points(points), stats));
        }

        let speeds: Vec<f64> = in_area
            .windows(2)
            .map(|w| implied_speed_kmh(w[0].1, w[0].0, w[1].1, w[1].0))
            .collect();

        let max_speed_kmh = speeds.iter().copied().fold(0.0, f64::max);
        let mut marked = BTreeSet::new();
        let mut violating_segments = 0;

        for (i, &speed) in speeds.iter().enumerate() {
            if speed <= self.max_speed_kmh {
                continue;
            }
            violating_segments += 1;

            let verdict = SpeedVerdict::decide(&speeds, i, self.max_speed_kmh);
            let dropped = verdict.dropped_index(i);
            marked.insert(dropped);

            tracing::debug!(
                transmitter = %trajectory.transmitter_id,
                pair = ?(i, i + 1),
                from = %in_area[i].0,
                to = %in_area[i + 1].0,
                speed_kmh = speed,
                ?verdict,
                dropped,
                "impossible speed"
            );
        }

        let kept: Vec<TelemetryPoint> = in_area
            .iter()
            .enumerate()
            .filter(|(i, _)| !marked.contains(i))
            .map(|(_, (_, p))| (*p).clone())
            .collect();

        let stats = CoherenceStats {
            transmitter_id: trajectory.transmitter_id.clone(),
            initial_count,
            out_of_range,
            violating_segments,
            removed_for_speed: marked.len(),
            final_count: kept.len(),
            max_speed_kmh,
        };

        tracing::info!(
            transmitter = %stats.transmitter_id,
            violating = stats.violating_segments,
            removed = stats.removed_for_speed,
            final_count = stats.final_count,
            "coherence filter done, max speed {:.2} km/h",
            stats.max_speed_kmh
        );

        Ok((trajectory.with_points(kept), stats))
    }
}

impl SummaryRow for CoherenceStats {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "initial_points", "out_of_range", "violating_segments",
            "removed_for_speed", "final_points", "max_speed_kmh",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.initial_count.to_string(),
            self.out_of_range.to_string(),
            self.violating_segments.to_string(),
            self.removed_for_speed.to_string(),
            self.final_count.to_string(),
            format!("{:.2}", round_to(self.max_speed_kmh, 2)),
        ]
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        let fastest = rows.iter().map(|r| r.max_speed_kmh).fold(0.0, f64::max);
        Some(vec![
            "TOTAL".to_string(),
            rows.iter().map(|r| r.initial_count).sum::<usize>().to_string(),
            rows.iter().map(|r| r.out_of_range).sum::<usize>().to_string(),
            rows.iter().map(|r| r.violating_segments).sum::<usize>().to_string(),
            rows.iter().map(|r| r.removed_for_speed).sum::<usize>().to_string(),
            rows.iter().map(|r| r.final_count).sum::<usize>().to_string(),
            format!("{:.2}", round_to(fastest, 2)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TrackSchema;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap()
    }

    fn schema() -> TrackSchema {
        TrackSchema {
            headers: vec!["Date".into(), "Latitude".into(), "Longitude".into()],
            latitude: 1,
            longitude: 2,
            timestamp: Some(0),
            quality: None,
        }
    }

    fn fix(hours: f64, lat: f64, lon: f64) -> TelemetryPoint {
        let offset = Duration::milliseconds((hours * 3_600_000.0) as i64);
        TelemetryPoint::new(lat, lon).with_timestamp(base() + offset)
    }

    fn track(points: Vec<TelemetryPoint>) -> Trajectory {
        Trajectory::new("241136", schema(), points)
    }

    fn filter() -> CoherenceFilter {
        CoherenceFilter::new(&CoherenceConfig::default())
    }

    fn lats(t: &Trajectory) -> Vec<f64> {
        t.points.iter().map(|p| p.latitude).collect()
    }

    #[test]
    fn test_geodesic_speed() {
        // One degree of latitude near 8°N is ~110.6 km on WGS84.
        let a = fix(0.0, 8.0, -80.0);
        let b = fix(1.0, 9.0, -80.0);
        let speed = implied_speed_kmh(&a, a.timestamp.unwrap(), &b, b.timestamp.unwrap());
        assert!((speed - 110.6).abs() < 0.5, "speed {speed}");
    }

    #[test]
    fn test_zero_or_negative_elapsed_is_zero_speed() {
        let a = fix(1.0, 8.0, -80.0);
        let b = fix(1.0, 9.0, -80.0);
        assert_eq!(implied_speed_kmh(&a, a.timestamp.unwrap(), &b, b.timestamp.unwrap()), 0.0);
        assert_eq!(implied_speed_kmh(&b, b.timestamp.unwrap(), &a, base()), 0.0);
    }

    #[test]
    fn test_fast_pair_with_calm_neighbours_drops_earlier() {
        // 8.0 → 8.1 slow, then ~200 km in one hour, then slow again.
        let input = track(vec![
            fix(0.0, 8.0, -80.0),
            fix(10.0, 8.1, -80.0),
            fix(11.0, 9.9, -80.0),
            fix(40.0, 10.0, -80.0),
        ]);

        let (out, stats) = filter().filter(input).unwrap();

        assert_eq!(stats.violating_segments, 1);
        assert_eq!(stats.removed_for_speed, 1);
        assert_eq!(lats(&out), vec![8.0, 9.9, 10.0]);
        assert!(stats.max_speed_kmh > 190.0);
    }

    #[test]
    fn test_isolated_spike_is_removed() {
        // Middle fix jumps ~110 km out and back within two hours.
        let input = track(vec![
            fix(0.0, 8.0, -80.0),
            fix(1.0, 9.0, -80.0),
            fix(2.0, 8.01, -80.0),
            fix(20.0, 8.2, -80.0),
        ]);

        let (out, stats) = filter().filter(input).unwrap();

        assert_eq!(stats.violating_segments, 2);
        assert_eq!(stats.removed_for_speed, 1);
        assert_eq!(lats(&out), vec![8.0, 8.01, 8.2]);
    }

    #[test]
    fn test_verdict_rules_in_order() {
        let max = 30.0;
        assert_eq!(SpeedVerdict::decide(&[50.0, 80.0, 5.0], 1, max), SpeedVerdict::EarlierAnomalous);
        assert_eq!(SpeedVerdict::decide(&[5.0, 80.0, 50.0], 1, max), SpeedVerdict::LaterAnomalous);
        assert_eq!(SpeedVerdict::decide(&[50.0, 80.0, 50.0], 1, max), SpeedVerdict::EarlierAnomalous);
        assert_eq!(SpeedVerdict::decide(&[5.0, 80.0, 5.0], 1, max), SpeedVerdict::EarlierByDefault);
        assert_eq!(SpeedVerdict::decide(&[80.0], 0, max), SpeedVerdict::EarlierByDefault);
        assert_eq!(SpeedVerdict::LaterAnomalous.dropped_index(3), 4);
        assert_eq!(SpeedVerdict::EarlierByDefault.dropped_index(3), 3);
    }

    #[test]
    fn test_single_pass_does_not_rescan() {
        let input = track(vec![
            fix(0.0, 8.0, -80.0),
            fix(1.0, 8.1, -80.0),
            fix(2.0, 9.5, -80.0),
            fix(3.0, 9.6, -80.0),
        ]);

        let (out, stats) = filter().filter(input).unwrap();

        // Pair (1,2) is the only violation; rule 3 drops fix 1, leaving 0→2
        // which is still too fast but is not re-examined.
        assert_eq!(stats.violating_segments, 1);
        assert_eq!(lats(&out), vec![8.0, 9.5, 9.6]);
    }

    #[test]
    fn test_out_of_area_points_removed_first() {
        let input = track(vec![fix(0.0, 8.0, -80.0), fix(5.0, 20.0, -80.0), fix(10.0, 8.1, -80.0)]);
        let (out, stats) = filter().filter(input).unwrap();
        assert_eq!(stats.out_of_range, 1);
        assert_eq!(stats.violating_segments, 0);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_fewer_than_two_points_is_neutral() {
        let input = track(vec![fix(0.0, 8.0, -80.0), fix(5.0, 40.0, -80.0)]);
        let (out, stats) = filter().filter(input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(stats.removed_for_speed, 0);
        assert_eq!(stats.max_speed_kmh, 0.0);
        assert_eq!(stats.final_count, 1);
    }

    #[test]
    fn test_missing_timestamps() {
        let mut s = schema();
        s.timestamp = None;
        let input = Trajectory::new("x", s, vec![TelemetryPoint::new(8.0, -80.0)]);
        assert!(matches!(filter().filter(input), Err(TrackError::MissingRequiredField(_))));
    }

    proptest! {
        #[test]
        fn prop_never_grows(steps in prop::collection::vec((0.1f64..5.0, -0.5f64..0.5), 0..30)) {
            let mut hours = 0.0;
            let mut lat = 10.0;
            let mut points = Vec::new();
            for (dt, dlat) in steps {
                hours += dt;
                lat = (lat + dlat).clamp(5.5, 14.5);
                points.push(fix(hours, lat, -85.0));
            }
            let n = points.len();
            let (out, stats) = filter().filter(track(points)).unwrap();
            prop_assert!(out.len() <= n);
            prop_assert_eq!(stats.final_count, out.len());
            prop_assert_eq!(stats.initial_count, n);
        }

        #[test]
        fn prop_single_spike_leaves_coherent_track(
            len in 4usize..20,
            spike_at in 1usize..18,
            offset in 1.0f64..3.0,
        ) {
            prop_assume!(spike_at < len - 1);
            // Calm track moving 0.01° every 2 h, one fix thrown far north.
            let mut points: Vec<_> = (0..len)
                .map(|i| fix(i as f64 * 2.0, 7.0 + i as f64 * 0.01, -85.0))
                .collect();
            points[spike_at].latitude += offset;

            let (out, _) = filter().filter(track(points)).unwrap();
            let timed: Vec<_> = out.points.iter().map(|p| (p.timestamp.unwrap(), p)).collect();
            for w in timed.windows(2) {
                let speed = implied_speed_kmh(w[0].1, w[0].0, w[1].1, w[1].0);
                prop_assert!(speed <= 30.0, "speed {} survived", speed);
            }
        }
    }
}
