//! Error taxonomy for the pipeline
//!
//! Variants map to recovery policy: `Config` and `Storage` surface to the
//! operator (exit codes 1 and 2), while `Source`, `Record` and `AlertSink`
//! are contained locally - logged, counted, and the cycle continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Alert sink error: {0}")]
    AlertSink(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Storage(format!("connection pool: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(format!("io: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
