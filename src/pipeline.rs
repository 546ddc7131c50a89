/// Batch runner: every stage over a directory of per-transmitter CSVs.
///
/// Tracks are independent, so each stage fans them out on a rayon pool.
/// A track that fails is logged with its transmitter id and left out of the
/// stage output and summary; the rest of the batch carries on.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::area_filter::crop_to_area;
use crate::coherence_filter::CoherenceFilter;
use crate::comparison::{compare_tracks, find_raw_file, write_comparison_gpx};
use crate::config::PipelineConfig;
use crate::douglas_peucker::Simplifier;
use crate::error::{TrackError, TrackResult};
use crate::movement_metrics::analyze_track;
use crate::quality_filter::filter_by_quality;
use crate::spatial_filter::{filter_spatial, LandMask};
use crate::summary::{print_summary, write_summary, SummaryRow};
use crate::telemetry::Trajectory;
use crate::temporal_corrector::TemporalCorrector;
use crate::track_io::{collect_track_files, pick_raw_files, read_trajectory, transmitter_id_from_path, write_trajectory};

pub const METRICS_DIR: &str = "07_metrics";
pub const COMPARISON_DIR: &str = "08_comparison";

/// Track-to-track cleaning stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Quality,
    Spatial,
    Temporal,
    Coherence,
    Simplify,
    Area,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Quality,
        Stage::Spatial,
        Stage::Temporal,
        Stage::Coherence,
        Stage::Simplify,
        Stage::Area,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Quality => "quality",
            Stage::Spatial => "spatial",
            Stage::Temporal => "temporal",
            Stage::Coherence => "coherence",
            Stage::Simplify => "simplified",
            Stage::Area => "area",
        }
    }

    /// File stem suffix of the tracks this stage writes.
    pub fn suffix(self) -> String {
        format!("_{}", self.name())
    }

    /// File stem suffix of the tracks this stage reads; raw input takes any
    /// CSV, narrowed to one export per transmitter.
    pub fn input_suffix(self) -> String {
        match self.previous() {
            Some(prev) => prev.suffix(),
            None => String::new(),
        }
    }

    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Quality => None,
            Stage::Spatial => Some(Stage::Quality),
            Stage::Temporal => Some(Stage::Spatial),
            Stage::Coherence => Some(Stage::Temporal),
            Stage::Simplify => Some(Stage::Coherence),
            // The focus crop applies to the simplified tracks.
            Stage::Area => Some(Stage::Simplify),
        }
    }

    /// Sub-directory of the work dir holding this stage's output.
    pub fn dir_name(self) -> String {
        let index = Stage::ALL.iter().position(|s| *s == self).unwrap_or(0) + 1;
        format!("{:02}_{}", index, self.name())
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::Quality => "Quality filter",
            Stage::Spatial => "Spatial filter",
            Stage::Temporal => "Temporal correction",
            Stage::Coherence => "Coherence (speed) filter",
            Stage::Simplify => "Douglas-Peucker simplification",
            Stage::Area => "Focus area crop",
        }
    }
}

/// Outcome of one stage over a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub processed: usize,
    /// `(transmitter_id, reason)` for every track left out.
    pub skipped: Vec<(String, String)>,
}

fn build_pool(config: &PipelineConfig) -> TrackResult<ThreadPool> {
    let threads = config.worker_threads();
    println!("⚡ Using parallel processing on {} threads", threads);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| TrackError::Config(format!("cannot build worker pool: {}", e)))
}

/// Runs `task` on every file, returning rows and skips ordered by transmitter id.
/// `Ok(None)` marks a track with nothing to report; it is skipped with `empty_reason`.
fn map_tracks<T, F>(pool: &ThreadPool, files: &[PathBuf], empty_reason: &str, task: F) -> (Vec<T>, BatchReport)
where
    T: Send,
    F: Fn(&Path, &str) -> TrackResult<Option<T>> + Sync,
{
    let mut outcomes: Vec<(String, TrackResult<Option<T>>)> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let id = transmitter_id_from_path(path);
                let outcome = task(path, &id);
                (id, outcome)
            })
            .collect()
    });
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rows = Vec::with_capacity(outcomes.len());
    let mut report = BatchReport::default();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => report.skipped.push((id, empty_reason.to_string())),
            Err(e) => {
                tracing::warn!(transmitter = %id, error = %e, "track skipped");
                report.skipped.push((id, e.to_string()));
            }
        }
    }
    report.processed = rows.len();
    (rows, report)
}

fn finish<T: SummaryRow>(title: &str, rows: &[T], report: &BatchReport, summary_path: &Path, started: Instant) -> TrackResult<()> {
    write_summary(rows, summary_path)?;
    print_summary(title, rows);

    println!(
        "\n✅ {} track(s) processed in {:.2} seconds",
        report.processed,
        started.elapsed().as_secs_f64()
    );
    for (id, reason) in &report.skipped {
        println!("   ⚠️  {} skipped: {}", id, reason);
    }
    println!("📄 Summary CSV saved to: {}", summary_path.display());
    Ok(())
}

fn discover(input_dir: &Path, suffix: &str) -> TrackResult<Vec<PathBuf>> {
    let files = collect_track_files(input_dir, suffix)?;
    println!("📁 Found {} track files in {}", files.len(), input_dir.display());
    if files.is_empty() {
        tracing::warn!(dir = %input_dir.display(), suffix, "no track files found");
    }
    Ok(files)
}

/// Reads, cleans and rewrites every track of one stage.
fn run_cleaning<T, F>(
    stage: Stage,
    pool: &ThreadPool,
    files: &[PathBuf],
    output_dir: &Path,
    step: F,
) -> TrackResult<BatchReport>
where
    T: SummaryRow + Send,
    F: Fn(Trajectory) -> TrackResult<(Trajectory, T)> + Sync,
{
    let started = Instant::now();
    let suffix = stage.suffix();

    let (rows, report) = map_tracks(pool, files, "no output", |path, id| {
        let (cleaned, stats) = step(read_trajectory(path)?)?;
        write_trajectory(&output_dir.join(format!("{}{}.csv", id, suffix)), &cleaned)?;
        Ok(Some(stats))
    });

    let summary_path = output_dir.join(format!("{}_summary.csv", stage.name()));
    finish(stage.title(), &rows, &report, &summary_path, started)?;
    Ok(report)
}

pub fn run_stage(stage: Stage, input_dir: &Path, output_dir: &Path, config: &PipelineConfig) -> TrackResult<BatchReport> {
    println!("\n🐢 {}", stage.title().to_uppercase());
    println!("{}", "=".repeat(60));

    create_dir_all(output_dir)?;
    let mut files = discover(input_dir, &stage.input_suffix())?;
    if stage.previous().is_none() {
        files = pick_raw_files(files);
    }
    let pool = build_pool(config)?;

    match stage {
        Stage::Quality => {
            let accepted = &config.quality.accepted;
            run_cleaning(stage, &pool, &files, output_dir, |t| filter_by_quality(t, accepted))
        }
        Stage::Spatial => {
            let mask = match &config.spatial.land_polygons {
                Some(path) => Some(LandMask::load(path)?),
                None => None,
            };
            let area = config.spatial.study_area;
            run_cleaning(stage, &pool, &files, output_dir, |t| Ok(filter_spatial(t, &area, mask.as_ref())))
        }
        Stage::Temporal => {
            let corrector = TemporalCorrector::new(&config.temporal);
            run_cleaning(stage, &pool, &files, output_dir, |t| corrector.correct(t))
        }
        Stage::Coherence => {
            let filter = CoherenceFilter::new(&config.coherence);
            run_cleaning(stage, &pool, &files, output_dir, |t| filter.filter(t))
        }
        Stage::Simplify => {
            let simplifier = Simplifier::new(&config.simplify);
            tracing::info!(epsilon_deg = simplifier.epsilon_deg(), "tolerance {} m", config.simplify.tolerance_m);
            run_cleaning(stage, &pool, &files, output_dir, |t| simplifier.simplify(t))
        }
        Stage::Area => {
            let focus = config.area.focus_area;
            run_cleaning(stage, &pool, &files, output_dir, |t| Ok(crop_to_area(t, &focus)))
        }
    }
}

/// Movement metrics over the simplified tracks in `input_dir`.
pub fn run_metrics(input_dir: &Path, output_dir: &Path, config: &PipelineConfig) -> TrackResult<BatchReport> {
    println!("\n🐢 MOVEMENT METRICS");
    println!("{}", "=".repeat(60));

    create_dir_all(output_dir)?;
    let files = discover(input_dir, &Stage::Simplify.suffix())?;
    let pool = build_pool(config)?;
    let started = Instant::now();

    let (rows, report) = map_tracks(&pool, &files, "fewer than two points", |path, _| {
        analyze_track(&read_trajectory(path)?, &config.metrics)
    });

    finish("Movement metrics", &rows, &report, &output_dir.join("movement_metrics_summary.csv"), started)?;
    Ok(report)
}

/// Raw vs simplified counts and a two-track GPX per transmitter.
pub fn run_comparison(
    raw_dir: &Path,
    processed_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> TrackResult<BatchReport> {
    println!("\n🐢 RAW VS PROCESSED");
    println!("{}", "=".repeat(60));

    create_dir_all(output_dir)?;
    let files = discover(processed_dir, &Stage::Simplify.suffix())?;
    let pool = build_pool(config)?;
    let started = Instant::now();

    let (rows, report) = map_tracks(&pool, &files, "no output", |path, id| {
        let raw_path = find_raw_file(raw_dir, id)?.ok_or_else(|| {
            TrackError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no raw file for {} in {}", id, raw_dir.display()),
            ))
        })?;

        let raw = read_trajectory(&raw_path)?;
        let processed = read_trajectory(path)?;
        write_comparison_gpx(&output_dir.join(format!("{}_comparison.gpx", id)), &raw, &processed)?;
        Ok(Some(compare_tracks(&raw, &processed)))
    });

    finish("Raw vs processed", &rows, &report, &output_dir.join("comparison_summary.csv"), started)?;
    Ok(report)
}

/// Runs the whole chain from `raw_dir`, one sub-directory per step under `work_dir`.
pub fn run_all(raw_dir: &Path, work_dir: &Path, config: &PipelineConfig) -> TrackResult<Vec<(String, BatchReport)>> {
    let mut reports = Vec::new();

    for stage in Stage::ALL {
        let input_dir = match stage.previous() {
            Some(prev) => work_dir.join(prev.dir_name()),
            None => raw_dir.to_path_buf(),
        };
        let report = run_stage(stage, &input_dir, &work_dir.join(stage.dir_name()), config)?;
        reports.push((stage.name().to_string(), report));
    }

    let simplified_dir = work_dir.join(Stage::Simplify.dir_name());
    let metrics = run_metrics(&simplified_dir, &work_dir.join(METRICS_DIR), config)?;
    reports.push(("metrics".to_string(), metrics));

    let comparison = run_comparison(raw_dir, &simplified_dir, &work_dir.join(COMPARISON_DIR), config)?;
    reports.push(("comparison".to_string(), comparison));

    println!("\n🎉 PIPELINE COMPLETE");
    println!("{}", "=".repeat(60));
    for (name, report) in &reports {
        println!("  {:<12} {:>4} processed  {:>4} skipped", name, report.processed, report.skipped.len());
    }
    println!("📁 Output saved to: {}", work_dir.display());

    Ok(reports)
}
