//! Daemon error types

use thiserror::Error;

/// Errors that can occur inside the feedback daemon
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgs(String),

    #[error("Theme parse error: {0}")]
    ThemeParse(String),

    #[error("Theme expand error: {0}")]
    ThemeExpand(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Device I/O error: {0}")]
    DeviceIo(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::DeviceIo(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ThemeParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
