/// Stage 2: drop fixes outside the study area or on land.

use std::fs::File;
use std::path::Path;

use csv::Reader;
use geo::{Contains, Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;

use crate::error::{TrackError, TrackResult};
use crate::summary::{percent, SummaryRow};
use crate::telemetry::{BoundingBox, Trajectory};

#[derive(Debug, Deserialize)]
struct VertexRecord {
    polygon_id: String,
    lon: f64,
    lat: f64,
}

/// Landmass polygons used for the point-in-polygon land test.
#[derive(Debug, Clone)]
pub struct LandMask {
    polygons: MultiPolygon<f64>,
}

impl LandMask {
    pub fn new(polygons: MultiPolygon<f64>) -> TrackResult<Self> {
        if polygons.0.is_empty() {
            return Err(TrackError::GeometryUnavailable("no land polygons".into()));
        }
        Ok(Self { polygons })
    }

    /// Loads exterior rings from a `polygon_id,lon,lat` vertex CSV.
    /// Consecutive rows with the same id form one ring.
    pub fn load(path: &Path) -> TrackResult<Self> {
        let file = File::open(path).map_err(|e| {
            TrackError::GeometryUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let mut rdr = Reader::from_reader(file);

        let mut polygons = Vec::new();
        let mut current_id: Option<String> = None;
        let mut ring: Vec<Coord<f64>> = Vec::new();

        for result in rdr.deserialize::<VertexRecord>() {
            let vertex = result.map_err(|e| {
                TrackError::GeometryUnavailable(format!("{}: {}", path.display(), e))
            })?;

            if current_id.as_deref() != Some(vertex.polygon_id.as_str()) {
                push_ring(&mut polygons, std::mem::take(&mut ring));
                current_id = Some(vertex.polygon_id);
            }
            ring.push(Coord { x: vertex.lon, y: vertex.lat });
        }
        push_ring(&mut polygons, ring);

        let mask = Self::new(MultiPolygon(polygons))?;
        tracing::info!(polygons = mask.polygon_count(), path = %path.display(), "loaded land polygons");
        Ok(mask)
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.0.len()
    }

    pub fn is_on_land(&self, latitude: f64, longitude: f64) -> bool {
        self.polygons.contains(&geo::point!(x: longitude, y: latitude))
    }
}

fn push_ring(polygons: &mut Vec<Polygon<f64>>, ring: Vec<Coord<f64>>) {
    // A closed ring needs at least three distinct vertices.
    if ring.len() >= 3 {
        polygons.push(Polygon::new(LineString::from(ring), vec![]));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpatialStats {
    pub transmitter_id: String,
    pub post_quality: usize,
    pub blank_coordinates: usize,
    pub out_of_range: usize,
    pub on_land: usize,
    pub at_sea: usize,
    pub land_percent: f64,
}

pub fn filter_spatial(
    trajectory: Trajectory,
    study_area: &BoundingBox,
    land: Option<&LandMask>,
) -> (Trajectory, SpatialStats) {
    let blank_coordinates = trajectory.blank_rows.len();
    let post_quality = trajectory.len() + blank_coordinates;

    let in_range: Vec<_> = trajectory
        .points
        .iter()
        .filter(|p| study_area.contains(p.latitude, p.longitude))
        .cloned()
        .collect();
    let out_of_range = trajectory.len() - in_range.len();

    if out_of_range > 0 {
        tracing::info!(
            transmitter = %trajectory.transmitter_id,
            out_of_range,
            "points outside study area ({})",
            study_area
        );
    }

    let at_sea: Vec<_> = match land {
        Some(mask) => in_range
            .into_iter()
            .filter(|p| !mask.is_on_land(p.latitude, p.longitude))
            .collect(),
        None => {
            tracing::warn!(transmitter = %trajectory.transmitter_id, "no land polygons, land test skipped");
            in_range
        }
    };
    let on_land = trajectory.len() - out_of_range - at_sea.len();

    let stats = SpatialStats {
        transmitter_id: trajectory.transmitter_id.clone(),
        post_quality,
        blank_coordinates,
        out_of_range,
        on_land,
        at_sea: at_sea.len(),
        land_percent: percent(on_land, post_quality),
    };

    tracing::info!(
        transmitter = %stats.transmitter_id,
        on_land = stats.on_land,
        at_sea = stats.at_sea,
        "spatial filter done"
    );

    (trajectory.with_points(at_sea), stats)
}

impl SummaryRow for SpatialStats {
    fn headers() -> Vec<&'static str> {
        vec![
            "transmitter_id", "post_quality", "blank_coordinates", "out_of_range",
            "on_land", "at_sea", "land_percent",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.transmitter_id.clone(),
            self.post_quality.to_string(),
            self.blank_coordinates.to_string(),
            self.out_of_range.to_string(),
            self.on_land.to_string(),
            self.at_sea.to_string(),
            format!("{:.1}", self.land_percent),
        ]
    }

    fn totals(rows: &[Self]) -> Option<Vec<String>> {
        let post_quality: usize = rows.iter().map(|r| r.post_quality).sum();
        let on_land: usize = rows.iter().map(|r| r.on_land).sum();
        Some(vec![
            "TOTAL".to_string(),
            post_quality.to_string(),
            rows.iter().map(|r| r.blank_coordinates).sum::<usize>().to_string(),
            rows.iter().map(|r| r.out_of_range).sum::<usize>().to_string(),
            on_land.to_string(),
            rows.iter().map(|r| r.at_sea).sum::<usize>().to_string(),
            format!("{:.1}", percent(on_land, post_quality)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STUDY_AREA;
    use crate::telemetry::{BlankRow, QualityClass, TelemetryPoint, TrackSchema};
    use tempfile::TempDir;

    // Rough Azuero peninsula block, lon -81..-80, lat 7..8.
    const ISLAND_CSV: &str = "\
polygon_id,lon,lat
azuero,-81.0,7.0
azuero,-80.0,7.0
azuero,-80.0,8.0
azuero,-81.0,8.0
azuero,-81.0,7.0
sliver,-70.0,1.0
sliver,-69.0,1.0
";

    fn track(coords: &[(f64, f64)]) -> Trajectory {
        let points = coords.iter().map(|&(lat, lon)| TelemetryPoint::new(lat, lon)).collect();
        Trajectory::new("241136", TrackSchema::default(), points)
    }

    fn load_mask(dir: &TempDir) -> LandMask {
        let path = dir.path().join("land.csv");
        std::fs::write(&path, ISLAND_CSV).unwrap();
        LandMask::load(&path).unwrap()
    }

    #[test]
    fn test_load_skips_degenerate_rings() {
        let dir = TempDir::new().unwrap();
        let mask = load_mask(&dir);
        assert_eq!(mask.polygon_count(), 1);
        assert!(mask.is_on_land(7.5, -80.5));
        assert!(!mask.is_on_land(7.5, -79.5));
    }

    #[test]
    fn test_missing_geometry_file() {
        let err = LandMask::load(Path::new("/nonexistent/land.csv")).unwrap_err();
        assert!(matches!(err, TrackError::GeometryUnavailable(_)));
    }

    #[test]
    fn test_empty_mask_is_unavailable() {
        assert!(matches!(
            LandMask::new(MultiPolygon(vec![])),
            Err(TrackError::GeometryUnavailable(_))
        ));
    }

    #[test]
    fn test_drops_out_of_range_and_land() {
        let dir = TempDir::new().unwrap();
        let mask = load_mask(&dir);
        let input = track(&[(7.5, -80.5), (7.5, -79.5), (20.0, -80.0), (5.0, -95.0)]);

        let (filtered, stats) = filter_spatial(input, &STUDY_AREA, Some(&mask));

        assert_eq!(filtered.len(), 2);
        assert_eq!(stats.out_of_range, 1);
        assert_eq!(stats.on_land, 1);
        assert_eq!(stats.at_sea, 2);
        assert_eq!(stats.land_percent, 25.0);
        assert_eq!(filtered.points[0].longitude, -79.5);
    }

    #[test]
    fn test_blank_coordinate_rows_counted_and_removed() {
        let mut input = track(&[(7.5, -79.5), (8.0, -79.0)]);
        input.blank_rows = vec![BlankRow { quality: Some(QualityClass::Lc3), record: vec![] }];

        let (filtered, stats) = filter_spatial(input, &STUDY_AREA, None);

        assert_eq!(stats.post_quality, 3);
        assert_eq!(stats.blank_coordinates, 1);
        assert_eq!(stats.at_sea, 2);
        assert!(filtered.blank_rows.is_empty());
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_without_mask_only_box_applies() {
        let input = track(&[(7.5, -80.5), (30.0, -80.0)]);
        let (filtered, stats) = filter_spatial(input, &STUDY_AREA, None);
        assert_eq!(filtered.len(), 1);
        assert_eq!(stats.on_land, 0);
        assert_eq!(stats.out_of_range, 1);
    }
}
