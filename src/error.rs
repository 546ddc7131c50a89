/// Errors raised while loading, cleaning or writing telemetry tracks.
///
/// A `TrackError` is always scoped to one trajectory (or to the stage setup);
/// the batch runner logs it against the transmitter id and moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("required field '{0}' not found in track header")]
    MissingRequiredField(String),

    #[error("cannot parse {field} value '{value}' (row {row})")]
    UnparseableValue {
        field: String,
        value: String,
        row: usize,
    },

    #[error("land geometry unavailable: {0}")]
    GeometryUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GPX error: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
}

pub type TrackResult<T> = Result<T, TrackError>;
