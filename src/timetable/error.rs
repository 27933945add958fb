#[derive(Debug, thiserror::Error)]
pub enum TimetableError {
    #[error("failed to read timetable file {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("failed to parse timetable file {path}: {source}")]
    Parse { path: String, #[source] source: serde_json::Error },
}
