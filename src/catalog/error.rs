#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read static data file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("failed to parse static data file {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },

    #[error("station {station_id} referenced by line {line_id} does not exist")]
    UnknownStation { line_id: String, station_id: String },

    #[error("station {station_id} coordinate ({lon}, {lat}) lies outside the configured bounding box")]
    StationOutOfBounds { station_id: String, lon: f64, lat: f64 },

    #[error("line {line_id} not found")]
    LineUnknown { line_id: String },

    #[error("station {station_id} not found")]
    StationUnknown { station_id: String },
}
