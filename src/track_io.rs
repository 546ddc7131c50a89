/// Track file ingestion and persistence.
///
/// Column names are resolved here, once, into a `TrackSchema`. Everything
/// downstream works on typed `TelemetryPoint`s and writes the original rows
/// back untouched.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{Reader, Writer};
use walkdir::WalkDir;

use crate::error::{TrackError, TrackResult};
use crate::telemetry::{BlankRow, QualityClass, TelemetryPoint, TrackSchema, Trajectory};

/// Stem suffix of the per-transmitter Argos export.
pub const RAW_SUFFIX: &str = "-Argos";

const NAIVE_FORMATS: [&str; 9] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%:z",
];

impl TrackSchema {
    /// Resolves the coordinate, timestamp and quality columns by
    /// case-insensitive substring match. A header starting with the needle
    /// beats one merely containing it ("Latitude" over "Platform ID");
    /// otherwise the first match wins.
    pub fn detect(headers: &[String]) -> TrackResult<Self> {
        let headers: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        let find = |needles: &[&str]| {
            lowered
                .iter()
                .position(|h| needles.iter().any(|needle| h.starts_with(needle)))
                .or_else(|| lowered.iter().position(|h| needles.iter().any(|needle| h.contains(needle))))
        };

        let latitude = find(&["lat"]).ok_or_else(|| TrackError::MissingRequiredField("latitude".into()))?;
        let longitude = find(&["lon", "long"]).ok_or_else(|| TrackError::MissingRequiredField("longitude".into()))?;
        let timestamp = find(&["date", "time"]);
        let quality = find(&["quality", "class"]);

        Ok(Self {
            headers,
            latitude,
            longitude,
            timestamp,
            quality,
        })
    }
}

/// Parses an Argos timestamp; naive values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if format.ends_with("%:z") {
            if let Ok(dt) = DateTime::parse_from_str(value, format) {
                return Some(dt.with_timezone(&Utc));
            }
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

/// Transmitter id encoded in a track file name: the stem up to the first
/// `_` or `-` (`241136-Argos.csv`, `241136_temporal.csv` → `241136`).
pub fn transmitter_id_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    stem.split(|c| c == '_' || c == '-')
        .next()
        .filter(|id| !id.is_empty())
        .unwrap_or(stem)
        .to_string()
}

pub fn read_trajectory(path: &Path) -> TrackResult<Trajectory> {
    let file = File::open(path)?;
    read_trajectory_from(BufReader::new(file), transmitter_id_from_path(path))
}

pub fn read_trajectory_from<R: std::io::Read>(reader: R, transmitter_id: String) -> TrackResult<Trajectory> {
    let mut rdr = Reader::from_reader(reader);
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let schema = TrackSchema::detect(&headers)?;

    let mut points = Vec::new();
    let mut blank_rows = Vec::new();

    for (index, result) in rdr.records().enumerate() {
        let record = result?;
        // Header is line 1.
        let row = index + 2;

        let lat_raw = record.get(schema.latitude).unwrap_or("").trim();
        let lon_raw = record.get(schema.longitude).unwrap_or("").trim();
        if lat_raw.is_empty() || lon_raw.is_empty() {
            blank_rows.push(BlankRow {
                quality: schema.quality.and_then(|col| record.get(col)).and_then(QualityClass::parse),
                record: record.iter().map(|f| f.to_string()).collect(),
            });
            continue;
        }

        let latitude = parse_coordinate(lat_raw, &schema.headers[schema.latitude], row)?;
        let longitude = parse_coordinate(lon_raw, &schema.headers[schema.longitude], row)?;

        let timestamp = match schema.timestamp {
            Some(col) => {
                let raw = record.get(col).unwrap_or("");
                let parsed = parse_timestamp(raw).ok_or_else(|| TrackError::UnparseableValue {
                    field: schema.headers[col].clone(),
                    value: raw.to_string(),
                    row,
                })?;
                Some(parsed)
            }
            None => None,
        };

        let quality = schema
            .quality
            .and_then(|col| record.get(col))
            .and_then(QualityClass::parse);

        points.push(TelemetryPoint {
            latitude,
            longitude,
            timestamp,
            quality,
            record: record.iter().map(|f| f.to_string()).collect(),
        });
    }

    if !blank_rows.is_empty() {
        tracing::warn!(transmitter = %transmitter_id, blank_rows = blank_rows.len(), "rows with empty coordinates");
    }

    let mut trajectory = Trajectory::new(transmitter_id, schema, points);
    trajectory.blank_rows = blank_rows;
    Ok(trajectory)
}

fn parse_coordinate(raw: &str, field: &str, row: usize) -> TrackResult<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TrackError::UnparseableValue {
            field: field.to_string(),
            value: raw.to_string(),
            row,
        })
}

/// Writes the original header and the passthrough rows in processing order,
/// followed by any blank-coordinate rows still attached to the track.
pub fn write_trajectory(path: &Path, trajectory: &Trajectory) -> TrackResult<()> {
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(&trajectory.schema.headers)?;
    for point in &trajectory.points {
        wtr.write_record(&point.record)?;
    }
    for blank in &trajectory.blank_rows {
        wtr.write_record(&blank.record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// CSV track files directly inside `folder` whose stem ends with `suffix`,
/// sorted by file name. Summary tables are never picked up.
pub fn collect_track_files(folder: &Path, suffix: &str) -> TrackResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| TrackError::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("csv") {
            continue;
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if stem.ends_with(crate::summary::SUMMARY_SUFFIX) {
            continue;
        }
        if stem.ends_with(suffix) {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Narrows raw exports to one file per transmitter: `<id>-Argos.csv` when
/// present, otherwise the first by name. Output is ordered by transmitter id.
pub fn pick_raw_files(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut by_id: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        by_id.entry(transmitter_id_from_path(&file)).or_default().push(file);
    }

    by_id
        .into_iter()
        .filter_map(|(id, mut candidates)| {
            candidates.sort();
            let argos = format!("{}{}", id, RAW_SUFFIX);
            let chosen = candidates
                .iter()
                .position(|p| p.file_stem().and_then(|s| s.to_str()) == Some(argos.as_str()))
                .unwrap_or(0);

            if candidates.len() > 1 {
                tracing::warn!(
                    transmitter = %id,
                    chosen = %candidates[chosen].display(),
                    ignored = candidates.len() - 1,
                    "several raw files for one transmitter"
                );
            }
            (chosen < candidates.len()).then(|| candidates.swap_remove(chosen))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use tempfile::TempDir;

    const ARGOS_CSV: &str = "\
Platform ID,Date,Latitude,Longitude,LocationQuality,Comment
241136,2023-03-01 10:00:00,8.0,-80.0,3,first
241136,2023-03-01 10:00:40,8.001,-80.001,1,dup
241136,2023-03-01 10:05:00,8.5,-79.5,B,
241136,2023-03-01 11:00:00,,-79.0,2,blank
";

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detect_schema() {
        let schema = TrackSchema::detect(&headers(&[" Date ", "Latitude", "Longitude", "LocationQuality"])).unwrap();
        assert_eq!(schema.timestamp, Some(0));
        assert_eq!(schema.latitude, 1);
        assert_eq!(schema.longitude, 2);
        assert_eq!(schema.quality, Some(3));
        assert_eq!(schema.headers[0], "Date");
    }

    #[test]
    fn test_detect_schema_missing_latitude() {
        let err = TrackSchema::detect(&headers(&["Date", "Longitude"])).unwrap_err();
        assert!(matches!(err, TrackError::MissingRequiredField(f) if f == "latitude"));
    }

    #[test]
    fn test_detect_schema_prefers_prefix_match() {
        let schema = TrackSchema::detect(&headers(&["Platform ID", "Date", "Latitude", "Longitude"])).unwrap();
        assert_eq!(schema.latitude, 2);
        assert_eq!(schema.longitude, 3);
    }

    #[test]
    fn test_detect_schema_optional_columns() {
        let schema = TrackSchema::detect(&headers(&["lat", "long"])).unwrap();
        assert!(!schema.has_timestamps());
        assert!(!schema.has_quality());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2023, 3, 1, 10, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2023-03-01 10:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-03-01T10:05:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2023-03-01 10:05"), Some(expected));
        assert_eq!(parse_timestamp("03/01/2023 10:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-03-01 05:05:00-05:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2023-03-01 10:05:00.250").map(|t| t.nanosecond()),
            Some(250_000_000)
        );
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_transmitter_id_from_path() {
        assert_eq!(transmitter_id_from_path(Path::new("raw/241136-Argos.csv")), "241136");
        assert_eq!(transmitter_id_from_path(Path::new("241137_temporal.csv")), "241137");
        assert_eq!(transmitter_id_from_path(Path::new("plain.csv")), "plain");
    }

    #[test]
    fn test_read_typed_points() {
        let track = read_trajectory_from(ARGOS_CSV.as_bytes(), "241136".into()).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.blank_rows.len(), 1);
        assert_eq!(track.blank_rows[0].quality, Some(QualityClass::Lc2));
        assert_eq!(track.blank_rows[0].record[5], "blank");
        assert_eq!(track.points[0].quality, Some(QualityClass::Lc3));
        assert_eq!(track.points[2].quality, Some(QualityClass::B));
        assert_eq!(track.points[1].latitude, 8.001);
        assert_eq!(track.points[0].record[5], "first");
        assert!(track.points.iter().all(|p| p.timestamp.is_some()));
    }

    #[test]
    fn test_unparseable_timestamp_names_row() {
        let csv = "Date,Latitude,Longitude\n2023-03-01 10:00:00,8.0,-80.0\nyesterday,8.1,-80.1\n";
        let err = read_trajectory_from(csv.as_bytes(), "x".into()).unwrap_err();
        match err {
            TrackError::UnparseableValue { field, value, row } => {
                assert_eq!(field, "Date");
                assert_eq!(value, "yesterday");
                assert_eq!(row, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unparseable_coordinate() {
        let csv = "Latitude,Longitude\nnorth,-80.0\n";
        let err = read_trajectory_from(csv.as_bytes(), "x".into()).unwrap_err();
        assert!(matches!(err, TrackError::UnparseableValue { .. }));
    }

    #[test]
    fn test_write_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let track = read_trajectory_from(ARGOS_CSV.as_bytes(), "241136".into()).unwrap();
        let path = dir.path().join("241136_quality.csv");

        write_trajectory(&path, &track).unwrap();
        let back = read_trajectory(&path).unwrap();

        assert_eq!(back.transmitter_id, "241136");
        assert_eq!(back.points, track.points);
        assert_eq!(back.blank_rows, track.blank_rows);
        assert_eq!(back.schema.headers, track.schema.headers);
    }

    #[test]
    fn test_collect_track_files_filters_suffix_and_summaries() {
        let dir = TempDir::new().unwrap();
        for name in ["241137_temporal.csv", "241136_temporal.csv", "temporal_summary.csv", "241136_spatial.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "lat,lon\n").unwrap();
        }

        let files = collect_track_files(dir.path(), "_temporal").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["241136_temporal.csv", "241137_temporal.csv"]);
    }

    #[test]
    fn test_pick_raw_files_one_per_transmitter() {
        let files = vec![
            PathBuf::from("raw/241136-Locations.csv"),
            PathBuf::from("raw/241137_export.csv"),
            PathBuf::from("raw/241136-Argos.csv"),
            PathBuf::from("raw/241137_backup.csv"),
        ];

        assert_eq!(
            pick_raw_files(files),
            vec![PathBuf::from("raw/241136-Argos.csv"), PathBuf::from("raw/241137_backup.csv")]
        );
    }
}
