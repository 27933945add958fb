#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("feed transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed transport error: upstream returned HTTP {0}")]
    HttpStatus(u16),

    #[error("feed parse error: {0}")]
    Parse(#[from] prost::DecodeError),
}
