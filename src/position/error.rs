#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("line {line_id} not found")]
    LineUnknown { line_id: String },

    #[error("query canceled: deadline elapsed")]
    Canceled,
}
