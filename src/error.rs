use thiserror::Error;

/// Everything a poll cycle can fail with. The Display string of each variant
/// is exactly what the per-cycle ERROR line prints.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Auth(String),
    #[error("account has no energy site")]
    SiteNotFound,
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid live status timestamp {raw:?}: {source}")]
    BadTimestamp {
        raw: String,
        source: chrono::ParseError,
    },
    #[error("warehouse connection failed: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("warehouse write failed: {0}")]
    Write(#[source] sqlx::Error),
}
