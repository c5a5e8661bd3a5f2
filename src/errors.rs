use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("failed to parse input: {0}")]
    Parse(String),
    #[error("rate limited by remote service")]
    RateLimited,
    #[error("remote service error: {0}")]
    Api(String),
    #[error("no pricing entry for model: {0}")]
    UnknownModel(String),
}
