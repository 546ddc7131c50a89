/// Crop simplified tracks to the focus area.

use crate::summary::{percent, SummaryRow};
use crate::telemetry::{BoundingBox, Trajectory};

#[derive(Debug, Clone, PartialEq)]
pub struct AreaStats {
    pub transmitter_id: String,
    pub original_count: usize,
    pub removed: usize,
    pub retained: usize,
    pub removed_percent: f64,
}

pub fn crop_to_area(trajectory: Trajectory, focus_area: &BoundingBox) -> (Trajectory, AreaStats) {
    let original_count = trajectory.len();
    let inside: Vec<_> = trajectory
        .points
        .iter()
        .filter(|p| focus_area.contains(p.latitude, p.longitude))
        .cloned()
        .collect();

    let removed = original_count - inside.len();
    let stats = AreaStats {
        transmitter_id: trajectory.transmitter_id.clone(),
        original_count,
        removed,
        retained: inside.len(),
        removed_percent: percent(removed, original_count),
    };

    if inside.is_empty() && original_count > 0 {
        tracing::warn!(transmitter = %stats.transmitter_id, "no points inside focus area {}", focus_area);
    } else {
        tracing::info!(transmitter = %stats.transmitter_id, removed, retained = stats.retained, "area crop done");
    }

    (trajectory.with_points(inside), stats)
}

impl SummaryRow for AreaStats {
    fn headers() -> Vec<&'static str> {
        vec!["transmitter_id", "original_points", "removed", "retained", "removed_percent"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.original_count.to_string(),
            self.removed.to_string(),
            self.retained.to_string(),
            format!("{:.1}", self.removed_percent),
        ]
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        let original: usize = rows.iter().map(|r| r.original_count).sum();
        let removed: usize = rows.iter().map(|r| r.removed).sum();
        Some(vec![
            "TOTAL".to_string(),
            original.to_string(),
            removed.to_string(),
            rows.iter().map(|r| r.retained).sum::<usize>().to_string(),
            format!("{:.1}", percent(removed, original)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FOCUS_AREA;
    use crate::telemetry::{TelemetryPoint, TrackSchema};

    #[test]
    fn test_crop_keeps_inclusive_edges() {
        let points = vec![
            TelemetryPoint::new(6.0, -87.0),
            TelemetryPoint::new(9.0, -80.0),
            TelemetryPoint::new(5.9, -80.0),
            TelemetryPoint::new(9.0, -75.5),
        ];
        let input = Trajectory::new("241136", TrackSchema::default(), points);

        let (out, stats) = crop_to_area(input, &FOCUS_AREA);

        assert_eq!(out.len(), 2);
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.removed_percent, 50.0);
    }

    #[test]
    fn test_empty_track() {
        let input = Trajectory::new("x", TrackSchema::default(), vec![]);
        let (out, stats) = crop_to_area(input, &FOCUS_AREA);
        assert!(out.is_empty());
        assert_eq!(stats.removed_percent, 0.0);
    }
}
