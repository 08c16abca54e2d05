//! Error types for GaganFusion

use thiserror::Error;

/// GaganFusion error type
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("not found: {what} at {time}s (key {key})")]
    NotFound {
        key: String,
        time: f64,
        what: &'static str,
    },

    #[error("state kind conflict for '{name}' at {time}s: have {existing}, requested {requested}")]
    KindConflict {
        name: String,
        time: f64,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FusionError>;
