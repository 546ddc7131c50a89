/// Raw vs processed comparison per transmitter.
///
/// Counts how much of the raw Argos record survived the pipeline and writes
/// both versions as two GPX tracks (`raw`, `processed`) for side-by-side
/// viewing in any GPX viewer.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use geo::point;
use gpx::{write, Gpx, Time, Track, TrackSegment, Waypoint};
use time::OffsetDateTime;

use crate::error::TrackResult;
use crate::summary::{percent, SummaryRow};
use crate::telemetry::{TelemetryPoint, Trajectory};
use crate::track_io::{collect_track_files, pick_raw_files, transmitter_id_from_path};

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonStats {
    pub transmitter_id: String,
    pub raw_count: usize,
    pub processed_count: usize,
    pub retention_percent: f64,
}

pub fn compare_tracks(raw: &Trajectory, processed: &Trajectory) -> ComparisonStats {
    let stats = ComparisonStats {
        transmitter_id: processed.transmitter_id.clone(),
        raw_count: raw.len(),
        processed_count: processed.len(),
        retention_percent: percent(processed.len(), raw.len()),
    };

    tracing::info!(
        transmitter = %stats.transmitter_id,
        raw = stats.raw_count,
        processed = stats.processed_count,
        "{:.1}% of raw fixes retained",
        stats.retention_percent
    );
    stats
}

/// Raw Argos export for `transmitter_id`, chosen as the batch runner does:
/// `<id>-Argos.csv` when present, otherwise the first CSV carrying the id.
pub fn find_raw_file(raw_dir: &Path, transmitter_id: &str) -> TrackResult<Option<PathBuf>> {
    let candidates: Vec<PathBuf> = collect_track_files(raw_dir, "")?
        .into_iter()
        .filter(|p| transmitter_id_from_path(p) == transmitter_id)
        .collect();
    Ok(pick_raw_files(candidates).into_iter().next())
}

fn to_waypoint(point: &TelemetryPoint) -> Waypoint {
    let mut waypoint = Waypoint::new(point!(x: point.longitude, y: point.latitude));
    waypoint.time = point
        .timestamp
        .and_then(|t| OffsetDateTime::from_unix_timestamp(t.timestamp()).ok())
        .map(Time::from);
    if let Some(quality) = &point.quality {
        waypoint.type_ = Some(quality.label());
    }
    waypoint
}

fn to_track(name: &str, trajectory: &Trajectory) -> Track {
    let mut track = Track::new();
    track.name = Some(name.to_string());
    track.description = Some(format!("{} ({} fixes)", trajectory.transmitter_id, trajectory.len()));

    let mut segment = TrackSegment::new();
    segment.points.extend(trajectory.points.iter().map(to_waypoint));
    if !segment.points.is_empty() {
        track.segments.push(segment);
    }
    track
}

pub fn build_comparison_gpx(raw: &Trajectory, processed: &Trajectory) -> Gpx {
    let mut gpx = Gpx::default();
    gpx.version = gpx::GpxVersion::Gpx11;
    gpx.creator = Some("argos-track-cleaner".to_string());
    gpx.tracks.push(to_track("raw", raw));
    gpx.tracks.push(to_track("processed", processed));
    gpx
}

pub fn write_comparison_gpx(path: &Path, raw: &Trajectory, processed: &Trajectory) -> TrackResult<()> {
    let gpx = build_comparison_gpx(raw, processed);
    let writer = BufWriter::new(File::create(path)?);
    write(&gpx, writer)?;
    Ok(())
}

impl SummaryRow for ComparisonStats {
    fn headers() -> Vec<&'static str> {
        vec!["transmitter_id", "raw_points", "processed_points", "retention_percent"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.raw_count.to_string(),
            self.processed_count.to_string(),
            format!("{:.1}", self.retention_percent),
        ]
    }
}
