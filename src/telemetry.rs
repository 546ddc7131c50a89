/// Typed telemetry records shared by every stage.
///
/// Rows are mapped onto `TelemetryPoint` once at ingestion; stages only see
/// coordinates, instants and quality classes, never column names.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Argos location class of a fix, best (LC3) to unverified (Z).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QualityClass {
    Lc3,
    Lc2,
    Lc1,
    Lc0,
    A,
    B,
    Z,
    Unknown(String),
}

impl QualityClass {
    /// Classes reported per track by the quality filter, in table order.
    pub const REPORTED: [QualityClass; 7] = [
        QualityClass::Lc3,
        QualityClass::Lc2,
        QualityClass::Lc1,
        QualityClass::Lc0,
        QualityClass::A,
        QualityClass::B,
        QualityClass::Z,
    ];

    /// Accepts both the bare Argos code ("3", "A") and the "LC" form ("LC3").
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let upper = trimmed.to_ascii_uppercase();
        let code = upper.strip_prefix("LC").unwrap_or(&upper);

        let class = match code {
            "3" => QualityClass::Lc3,
            "2" => QualityClass::Lc2,
            "1" => QualityClass::Lc1,
            "0" => QualityClass::Lc0,
            "A" => QualityClass::A,
            "B" => QualityClass::B,
            "Z" => QualityClass::Z,
            _ => QualityClass::Unknown(trimmed.to_string()),
        };
        Some(class)
    }

    /// Ordinal used to break duplicate-timestamp ties. Everything below LC1 ranks 0.
    pub fn rank(&self) -> u8 {
        match self {
            QualityClass::Lc3 => 3,
            QualityClass::Lc2 => 2,
            QualityClass::Lc1 => 1,
            _ => 0,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            QualityClass::Lc3 => "3",
            QualityClass::Lc2 => "2",
            QualityClass::Lc1 => "1",
            QualityClass::Lc0 => "0",
            QualityClass::A => "A",
            QualityClass::B => "B",
            QualityClass::Z => "Z",
            QualityClass::Unknown(raw) => raw,
        }
    }

    pub fn label(&self) -> String {
        format!("LC{}", self.code())
    }
}

impl fmt::Display for QualityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<String> for QualityClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        QualityClass::parse(&value).ok_or_else(|| "empty quality class".to_string())
    }
}

impl From<QualityClass> for String {
    fn from(class: QualityClass) -> Self {
        class.code().to_string()
    }
}

/// One Argos fix. `record` holds the source row untouched so it can be
/// written back verbatim by later stages.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub quality: Option<QualityClass>,
    pub record: Vec<String>,
}

impl TelemetryPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp: None,
            quality: None,
            record: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_quality(mut self, quality: QualityClass) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn geo_point(&self) -> geo::Point<f64> {
        geo::point!(x: self.longitude, y: self.latitude)
    }
}

/// Column layout resolved once per source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSchema {
    pub headers: Vec<String>,
    pub latitude: usize,
    pub longitude: usize,
    pub timestamp: Option<usize>,
    pub quality: Option<usize>,
}

impl TrackSchema {
    pub fn has_timestamps(&self) -> bool {
        self.timestamp.is_some()
    }

    pub fn has_quality(&self) -> bool {
        self.quality.is_some()
    }
}

/// Source row whose latitude or longitude cell is empty. It still counts
/// towards the quality stage and is removed by the spatial stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BlankRow {
    pub quality: Option<QualityClass>,
    pub record: Vec<String>,
}

/// Fixes of one tagged individual, in processing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub transmitter_id: String,
    pub schema: TrackSchema,
    pub points: Vec<TelemetryPoint>,
    /// Rows without coordinates, kept aside from `points`.
    pub blank_rows: Vec<BlankRow>,
}

impl Trajectory {
    pub fn new(transmitter_id: impl Into<String>, schema: TrackSchema, points: Vec<TelemetryPoint>) -> Self {
        Self {
            transmitter_id: transmitter_id.into(),
            schema,
            points,
            blank_rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Same track identity and schema, different points. Blank rows are
    /// not carried over.
    pub fn with_points(&self, points: Vec<TelemetryPoint>) -> Self {
        Self {
            transmitter_id: self.transmitter_id.clone(),
            schema: self.schema.clone(),
            points,
            blank_rows: Vec::new(),
        }
    }
}

/// Geographic box with inclusive edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub const fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self { lat_min, lat_max, lon_min, lon_max }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }

    pub fn is_valid(&self) -> bool {
        self.lat_min <= self.lat_max
            && self.lon_min <= self.lon_max
            && (-90.0..=90.0).contains(&self.lat_min)
            && (-90.0..=90.0).contains(&self.lat_max)
            && (-180.0..=180.0).contains(&self.lon_min)
            && (-180.0..=180.0).contains(&self.lon_max)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat {}°..{}°, lon {}°..{}°",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}
