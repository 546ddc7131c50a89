/// Pipeline configuration.
///
/// Every constant the stages use lives here so two stages can run with
/// different study boxes. `Default` reproduces the Eastern Tropical Pacific
/// green turtle setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{TrackError, TrackResult};
use crate::telemetry::{BoundingBox, QualityClass};

/// Eastern Tropical Pacific study area used by the land/area filter.
pub const STUDY_AREA: BoundingBox = BoundingBox::new(5.0, 15.0, -95.0, -75.0);
/// Box applied by the speed filter before checking velocities.
pub const COHERENCE_AREA: BoundingBox = BoundingBox::new(5.0, 15.0, -95.0, -75.0);
/// Narrower Panama Pacific box applied to simplified tracks.
pub const FOCUS_AREA: BoundingBox = BoundingBox::new(6.0, 12.0, -87.0, -76.0);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker threads for per-track parallelism (defaults to the core count).
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
    #[serde(default)]
    pub temporal: TemporalConfig,
    #[serde(default)]
    pub coherence: CoherenceConfig,
    #[serde(default)]
    pub simplify: SimplifyConfig,
    #[serde(default)]
    pub area: AreaConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub accepted: Vec<QualityClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    pub study_area: BoundingBox,
    /// Vertex CSV (`polygon_id,lon,lat`) of landmass polygons.
    #[serde(default)]
    pub land_polygons: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    /// Width of the duplicate bucket; fixes inside the same bucket collapse.
    pub dedup_bucket_secs: i64,
    pub short_interval_secs: f64,
    pub gap_threshold_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceConfig {
    /// Green turtle ceiling including predator-escape bursts.
    pub max_speed_kmh: f64,
    pub coherence_area: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplifyConfig {
    /// Comparable to the LC1 error radius.
    pub tolerance_m: f64,
    /// Degree length used to turn the metric tolerance into degrees (~8°N).
    pub meters_per_degree: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    pub focus_area: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Step speeds at or above this are left out of the speed summary.
    pub cruise_speed_kmh: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            accepted: vec![QualityClass::Lc3, QualityClass::Lc2, QualityClass::Lc1],
        }
    }
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            study_area: STUDY_AREA,
            land_polygons: None,
        }
    }
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            dedup_bucket_secs: 60,
            short_interval_secs: 30.0,
            gap_threshold_hours: 72.0,
        }
    }
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            max_speed_kmh: 30.0,
            coherence_area: COHERENCE_AREA,
        }
    }
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            tolerance_m: 500.0,
            meters_per_degree: 111_000.0,
        }
    }
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self { focus_area: FOCUS_AREA }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { cruise_speed_kmh: 10.0 }
    }
}

impl PipelineConfig {
    /// Returns the first invalid field found.
    pub fn validate(&self) -> TrackResult<()> {
        if self.quality.accepted.is_empty() {
            return Err(TrackError::Config("quality.accepted must list at least one class".into()));
        }
        for (name, area) in [
            ("spatial.study_area", &self.spatial.study_area),
            ("coherence.coherence_area", &self.coherence.coherence_area),
            ("area.focus_area", &self.area.focus_area),
        ] {
            if !area.is_valid() {
                return Err(TrackError::Config(format!("{} is not a valid box: {}", name, area)));
            }
        }
        if self.temporal.dedup_bucket_secs <= 0 {
            return Err(TrackError::Config(format!(
                "temporal.dedup_bucket_secs must be > 0, got {}",
                self.temporal.dedup_bucket_secs
            )));
        }
        if self.temporal.short_interval_secs < 0.0 || self.temporal.gap_threshold_hours <= 0.0 {
            return Err(TrackError::Config("temporal thresholds must be positive".into()));
        }
        if !(self.coherence.max_speed_kmh > 0.0) {
            return Err(TrackError::Config(format!(
                "coherence.max_speed_kmh must be > 0, got {}",
                self.coherence.max_speed_kmh
            )));
        }
        if self.simplify.tolerance_m < 0.0 || !(self.simplify.meters_per_degree > 0.0) {
            return Err(TrackError::Config(format!(
                "simplify tolerance {} m / {} m per degree out of range",
                self.simplify.tolerance_m, self.simplify.meters_per_degree
            )));
        }
        if !(self.metrics.cruise_speed_kmh > 0.0) {
            return Err(TrackError::Config("metrics.cruise_speed_kmh must be > 0".into()));
        }
        if self.threads == Some(0) {
            return Err(TrackError::Config("threads must be > 0".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> TrackResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| TrackError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Falls back to defaults when no file is given.
    pub fn load_or_default(path: Option<&Path>) -> TrackResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> TrackResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrackError::Config(e.to_string()))
    }

    pub fn worker_threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}
