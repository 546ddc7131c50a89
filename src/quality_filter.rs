/// Stage 1: keep only fixes whose Argos location class is accepted.

use std::collections::HashMap;

use crate::error::{TrackError, TrackResult};
use crate::summary::{percent, SummaryRow};
use crate::telemetry::{QualityClass, Trajectory};

#[derive(Debug, Clone, PartialEq)]
pub struct QualityStats {
    pub transmitter_id: String,
    /// Input counts per reported class, in `QualityClass::REPORTED` order.
    pub class_counts: [usize; 7],
    pub total_original: usize,
    pub total_retained: usize,
    pub retention_percent: f64,
}

impl QualityStats {
    pub fn count_of(&self, class: &QualityClass) -> usize {
        QualityClass::REPORTED
            .iter()
            .position(|c| c == class)
            .map(|i| self.class_counts[i])
            .unwrap_or(0)
    }
}

pub fn filter_by_quality(trajectory: Trajectory, accepted: &[QualityClass]) -> TrackResult<(Trajectory, QualityStats)> {
    if !trajectory.schema.has_quality() {
        return Err(TrackError::MissingRequiredField("quality".into()));
    }

    // Rows without coordinates are graded too; the spatial stage drops them.
    let total_original = trajectory.len() + trajectory.blank_rows.len();
    let is_accepted = |quality: &Option<QualityClass>| quality.as_ref().is_some_and(|q| accepted.contains(q));

    let mut by_class: HashMap<&QualityClass, usize> = HashMap::new();
    let classes = trajectory
        .points
        .iter()
        .map(|p| &p.quality)
        .chain(trajectory.blank_rows.iter().map(|b| &b.quality));
    for class in classes.flatten() {
        *by_class.entry(class).or_insert(0) += 1;
    }
    let mut class_counts = [0usize; 7];
    for (i, class) in QualityClass::REPORTED.iter().enumerate() {
        class_counts[i] = by_class.get(class).copied().unwrap_or(0);
    }

    let retained: Vec<_> = trajectory
        .points
        .iter()
        .filter(|p| is_accepted(&p.quality))
        .cloned()
        .collect();
    let retained_blank: Vec<_> = trajectory
        .blank_rows
        .iter()
        .filter(|b| is_accepted(&b.quality))
        .cloned()
        .collect();
    let total_retained = retained.len() + retained_blank.len();

    let stats = QualityStats {
        transmitter_id: trajectory.transmitter_id.clone(),
        class_counts,
        total_original,
        total_retained,
        retention_percent: percent(total_retained, total_original),
    };

    tracing::info!(
        transmitter = %stats.transmitter_id,
        retained = stats.total_retained,
        original = stats.total_original,
        "quality filter: {:.1}% retained",
        stats.retention_percent
    );

    let mut filtered = trajectory.with_points(retained);
    filtered.blank_rows = retained_blank;
    Ok((filtered, stats))
}

impl SummaryRow for QualityStats {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "LC3", "LC2", "LC1", "LC0", "LCA", "LCB", "LCZ",
            "total_original", "total_retained", "retention_percent",
        ]
    }

    fn row(&self) -> Vec<String> {
        let mut row = vec![self.transmitter_id.clone()];
        row.extend(self.class_counts.iter().map(|c| c.to_string()));
        row.push(self.total_original.to_string());
        row.push(self.total_retained.to_string());
        row.push(format!("{:.1}", self.retention_percent));
        row
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        let mut class_totals = [0usize; 7];
        for stats in rows {
            for (total, count) in class_totals.iter_mut().zip(stats.class_counts) {
                *total += count;
            }
        }
        let original: usize = rows.iter().map(|r| r.total_original).sum();
        let retained: usize = rows.iter().map(|r| r.total_retained).sum();

        let mut row = vec!["TOTAL".to_string()];
        row.extend(class_totals.iter().map(|c| c.to_string()));
        row.push(original.to_string());
        row.push(retained.to_string());
        row.push(format!("{:.1}", percent(retained, original)));
        Some(row)
    }
}
