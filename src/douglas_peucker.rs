/// Stage 5: Douglas-Peucker simplification of cleaned tracks.
///
/// Works on (longitude, latitude) in degree space. The metric tolerance is
/// turned into degrees with a fixed metres-per-degree scale, which holds in
/// the tropics and overstates the tolerance east-west at higher latitudes.

use crate::config::SimplifyConfig;
use crate::error::TrackResult;
use crate::summary::{percent, SummaryRow};
use crate::telemetry::{TelemetryPoint, Trajectory};
use crate::temporal_corrector::timed_points;

#[derive(Debug, Clone, PartialEq)]
pub struct SimplifyStats {
    pub transmitter_id: String,
    pub original_count: usize,
    pub simplified_count: usize,
    pub removed: usize,
    pub simplification_percent: f64,
    pub retention_percent: f64,
}

impl SimplifyStats {
    fn new(transmitter_id: &str, original_count: usize, simplified_count: usize) -> Self {
        Self {
            transmitter_id: transmitter_id.to_string(),
            original_count,
            simplified_count,
            removed: original_count - simplified_count,
            simplification_percent: percent(original_count - simplified_count, original_count),
            retention_percent: percent(simplified_count, original_count),
        }
    }
}

/// Distance from `p` to the infinite line through `a` and `b`, all `(x, y)`.
/// Falls back to the distance to `a` when the line degenerates to a point.
pub fn perpendicular_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-18 {
        return ((p.0 - a.0).powi(2) + (p.1 - a.1).powi(2)).sqrt();
    }

    ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / length_sq.sqrt()
}

/// Indices of the vertices kept by Douglas-Peucker at `epsilon`, ascending.
/// Both endpoints are always kept; inputs of two or fewer come back whole.
pub fn simplify_indices(coords: &[(f64, f64)], epsilon: f64) -> Vec<usize> {
    if coords.len() <= 2 {
        return (0..coords.len()).collect();
    }

    let mut keep = vec![false; coords.len()];
    keep[0] = true;
    keep[coords.len() - 1] = true;
    mark_spans(coords, epsilon, &mut keep);

    keep.iter()
        .enumerate()
        .filter_map(|(i, &k)| k.then_some(i))
        .collect()
}

/// Works through pending `(first, last)` spans on a heap stack, so depth is
/// bounded by memory rather than the thread's call stack.
fn mark_spans(coords: &[(f64, f64)], epsilon: f64, keep: &mut [bool]) {
    let mut spans = vec![(0, coords.len() - 1)];

    while let Some((first, last)) = spans.pop() {
        if last <= first + 1 {
            continue;
        }

        let (mut max_dist, mut split) = (0.0, first);
        for i in first + 1..last {
            let dist = perpendicular_distance(coords[i], coords[first], coords[last]);
            if dist > max_dist {
                max_dist = dist;
                split = i;
            }
        }

        if max_dist > epsilon {
            keep[split] = true;
            spans.push((split, last));
            spans.push((first, split));
        }
    }
}

pub struct Simplifier {
    epsilon_deg: f64,
}

impl Simplifier {
    pub fn new(config: &SimplifyConfig) -> Self {
        Self {
            epsilon_deg: config.tolerance_m / config.meters_per_degree,
        }
    }

    pub fn epsilon_deg(&self) -> f64 {
        self.epsilon_deg
    }

    pub fn simplify(&self, trajectory: Trajectory) -> TrackResult<(Trajectory, SimplifyStats)> {
        let original_count = trajectory.len();

        if original_count < 3 {
            tracing::debug!(transmitter = %trajectory.transmitter_id, original_count, "too few points to simplify");
            let stats = SimplifyStats::new(&trajectory.transmitter_id, original_count, original_count);
            return Ok((trajectory, stats));
        }

        let ordered: Vec<&TelemetryPoint> = if trajectory.schema.has_timestamps() {
            let mut timed = timed_points(&trajectory.points)?;
            timed.sort_by_key(|(t, _)| *t);
            timed.into_iter().map(|(_, p)| p).collect()
        } else {
            trajectory.points.iter().collect()
        };

        let coords: Vec<(f64, f64)> = ordered.iter().map(|p| (p.longitude, p.latitude)).collect();
        let kept: Vec<TelemetryPoint> = simplify_indices(&coords, self.epsilon_deg)
            .into_iter()
            .map(|i| ordered[i].clone())
            .collect();

        let stats = SimplifyStats::new(&trajectory.transmitter_id, original_count, kept.len());

        tracing::info!(
            transmitter = %stats.transmitter_id,
            original = stats.original_count,
            simplified = stats.simplified_count,
            "simplified, {:.1}% of points retained",
            stats.retention_percent
        );

        Ok((trajectory.with_points(kept), stats))
    }
}

impl SummaryRow for SimplifyStats {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "original_points", "simplified_points", "removed",
            "simplification_percent", "retention_percent",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.original_count.to_string(),
            self.simplified_count.to_string(),
            self.removed.to_string(),
            format!("{:.1}", self.simplification_percent),
            format!("{:.1}", self.retention_percent),
        ]
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        let original: usize = rows.iter().map(|r| r.original_count).sum();
        let simplified: usize = rows.iter().map(|r| r.simplified_count).sum();
        let total = SimplifyStats::new("TOTAL", original, simplified);
        Some(total.row())
    }
}
