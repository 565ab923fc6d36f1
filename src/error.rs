use std::path::PathBuf;

use thiserror::Error;

use crate::sync::Field;

/// Failures raised by the local question store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be created, read or decoded.
    #[error("question store unavailable at `{path}`: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("a question with id `{0}` already exists")]
    DuplicateKey(String),

    #[error("no question with id `{0}`")]
    NotFound(String),

    #[error("invalid question: {0}")]
    InvalidRecord(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding failure: {0}")]
    Encode(#[from] bincode::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures that abort a spreadsheet sync before the store is touched
/// (everything except `Store`, which can only happen while replacing).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not read sheet data: {0}")]
    FetchFailed(String),

    /// The endpoint answered with an in-band `Error:` body.
    #[error("sheet endpoint reported: {0}")]
    Remote(String),

    #[error("sheet data is empty")]
    EmptyPayload,

    #[error("header validation failed, missing required columns: {}", join_fields(.missing))]
    SchemaInvalid { missing: Vec<Field> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn join_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type SyncResult<T> = Result<T, SyncError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_names_missing_fields() {
        let err = SyncError::SchemaInvalid {
            missing: vec![Field::Examination, Field::Id],
        };
        assert_eq!(
            err.to_string(),
            "header validation failed, missing required columns: examination, id"
        );
    }

    #[test]
    fn store_errors_convert_into_sync_errors() {
        let err: SyncError = StoreError::DuplicateKey("Q1".into()).into();
        assert_eq!(err.to_string(), "a question with id `Q1` already exists");
    }
}
