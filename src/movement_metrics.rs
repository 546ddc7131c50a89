/// Movement metrics of simplified tracks.
///
/// Distances are haversine great-circle lengths in km. Step speeds at or
/// above the cruise ceiling are counted but left out of the speed summary,
/// since they are Argos position error rather than swimming.

use geo::HaversineDistance;

use crate::config::MetricsConfig;
use crate::error::TrackResult;
use crate::summary::{mean, median, round_to, SummaryRow};
use crate::telemetry::Trajectory;
use crate::temporal_corrector::timed_points;

const KM_PER_DEGREE: f64 = 111.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MovementMetrics {
    pub transmitter_id: String,
    pub point_count: usize,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration_days: i64,
    pub total_distance_km: f64,
    pub net_distance_km: f64,
    pub distance_per_day_km: f64,
    pub straightness_index: f64,
    pub mean_speed_kmh: f64,
    pub median_speed_kmh: f64,
    pub max_speed_kmh: f64,
    /// Step speeds excluded for reaching the cruise ceiling.
    pub discarded_speeds: usize,
    pub lat_range_deg: f64,
    pub lon_range_deg: f64,
    pub approx_area_km2: f64,
}

/// Returns `None` when the track has fewer than two fixes.
pub fn analyze_track(trajectory: &Trajectory, config: &MetricsConfig) -> TrackResult<Option<MovementMetrics>> {
    if trajectory.len() < 2 {
        tracing::warn!(transmitter = %trajectory.transmitter_id, points = trajectory.len(), "too few points for movement metrics");
        return Ok(None);
    }

    let mut points: Vec<_> = trajectory.points.iter().collect();
    let times = if trajectory.schema.has_timestamps() {
        let mut timed = timed_points(&trajectory.points)?;
        timed.sort_by_key(|(t, _)| *t);
        points = timed.iter().map(|(_, p)| *p).collect();
        Some(timed.into_iter().map(|(t, _)| t).collect::<Vec<_>>())
    } else {
        None
    };

    let steps_km: Vec<f64> = points
        .windows(2)
        .map(|w| w[0].geo_point().haversine_distance(&w[1].geo_point()) / 1000.0)
        .collect();
    let total_distance_km: f64 = steps_km.iter().sum();

    let (first, last) = (points[0], points[points.len() - 1]);
    let net_distance_km = first.geo_point().haversine_distance(&last.geo_point()) / 1000.0;
    let straightness_index = if total_distance_km > 0.0 { net_distance_km / total_distance_km } else { 0.0 };

    let span = |values: Vec<f64>| {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        max - min
    };
    let lat_range_deg = span(points.iter().map(|p| p.latitude).collect());
    let lon_range_deg = span(points.iter().map(|p| p.longitude).collect());

    let mut metrics = MovementMetrics {
        transmitter_id: trajectory.transmitter_id.clone(),
        point_count: points.len(),
        start_date: None,
        end_date: None,
        duration_days: 0,
        total_distance_km,
        net_distance_km,
        distance_per_day_km: 0.0,
        straightness_index,
        mean_speed_kmh: 0.0,
        median_speed_kmh: 0.0,
        max_speed_kmh: 0.0,
        discarded_speeds: 0,
        lat_range_deg,
        lon_range_deg,
        approx_area_km2: lat_range_deg * lon_range_deg * KM_PER_DEGREE * KM_PER_DEGREE,
    };

    if let Some(times) = times {
        let all_speeds: Vec<f64> = times
            .windows(2)
            .zip(&steps_km)
            .filter_map(|(w, km)| {
                let hours = (w[1] - w[0]).num_milliseconds() as f64 / 3_600_000.0;
                (hours > 0.0).then(|| km / hours)
            })
            .collect();
        let cruising: Vec<f64> = all_speeds
            .iter()
            .copied()
            .filter(|&s| s < config.cruise_speed_kmh)
            .collect();

        metrics.discarded_speeds = all_speeds.len() - cruising.len();
        metrics.mean_speed_kmh = mean(&cruising);
        metrics.median_speed_kmh = median(&cruising);
        metrics.max_speed_kmh = cruising.iter().copied().fold(0.0, f64::max);

        let (start, end) = (times[0], times[times.len() - 1]);
        metrics.duration_days = (end - start).num_days();
        metrics.start_date = Some(start.format("%Y-%m-%d").to_string());
        metrics.end_date = Some(end.format("%Y-%m-%d").to_string());
        if metrics.duration_days > 0 {
            metrics.distance_per_day_km = total_distance_km / metrics.duration_days as f64;
        }

        if metrics.discarded_speeds > 0 {
            tracing::info!(
                transmitter = %metrics.transmitter_id,
                discarded = metrics.discarded_speeds,
                "step speeds at or above {} km/h left out",
                config.cruise_speed_kmh
            );
        }
    }

    tracing::info!(
        transmitter = %metrics.transmitter_id,
        points = metrics.point_count,
        days = metrics.duration_days,
        "path {:.1} km, net {:.1} km, straightness {:.3}",
        metrics.total_distance_km,
        metrics.net_distance_km,
        metrics.straightness_index
    );

    Ok(Some(metrics))
}

impl SummaryRow for MovementMetrics {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "points", "start_date", "end_date", "duration_days",
            "total_distance_km", "net_distance_km", "distance_per_day_km", "straightness_index",
            "mean_speed_kmh", "median_speed_kmh", "max_speed_kmh", "discarded_speeds",
            "lat_range_deg", "lon_range_deg", "approx_area_km2",
        ]
    }

    fn row(&self) -> Vec<String> {
        let date = |d: &Option<String>| d.clone().unwrap_or_else(|| "N/A".to_string());
        vec![
            self.transmitter_id.clone(),
            self.point_count.to_string(),
            date(&self.start_date),
            date(&self.end_date),
            self.duration_days.to_string(),
            format!("{:.1}", round_to(self.total_distance_km, 1)),
            format!("{:.1}", round_to(self.net_distance_km, 1)),
            format!("{:.1}", round_to(self.distance_per_day_km, 1)),
            format!("{:.3}", round_to(self.straightness_index, 3)),
            format!("{:.2}", round_to(self.mean_speed_kmh, 2)),
            format!("{:.2}", round_to(self.median_speed_kmh, 2)),
            format!("{:.2}", round_to(self.max_speed_kmh, 2)),
            self.discarded_speeds.to_string(),
            format!("{:.3}", round_to(self.lat_range_deg, 3)),
            format!("{:.3}", round_to(self.lon_range_deg, 3)),
            format!("{:.1}", round_to(self.approx_area_km2, 1)),
        ]
    }
}
