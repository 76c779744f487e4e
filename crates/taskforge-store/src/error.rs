//! Store-local error type, composed into `taskforge_core::Error::Store` at
//! the trait boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("seed data at {path} is malformed: {source}")]
    SeedMalformed { path: String, #[source] source: serde_json::Error },

    #[error("failed to read seed file {path}: {source}")]
    SeedIo { path: String, #[source] source: std::io::Error },
}

impl From<StoreError> for taskforge_core::Error {
    fn from(err: StoreError) -> Self {
        taskforge_core::Error::Store(err.to_string())
    }
}
