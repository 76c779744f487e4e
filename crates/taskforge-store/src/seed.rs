//! Bootstraps agents and context documents from a JSON file on disk, so a
//! deployment can ship its agent roster and knowledge base as data rather
//! than code.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use taskforge_core::task::{Agent, ContextDocument};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub documents: Vec<ContextDocument>,
}

pub fn load_seed(path: &std::path::Path) -> Result<SeedData, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::SeedIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StoreError::SeedMalformed {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_seed_io_error() {
        let err = load_seed(std::path::Path::new("/nonexistent/seed.json")).unwrap_err();
        assert!(matches!(err, StoreError::SeedIo { .. }));
    }

    #[test]
    fn empty_object_deserializes_to_empty_seed() {
        let data: SeedData = serde_json::from_str("{}").unwrap();
        assert!(data.agents.is_empty());
        assert!(data.documents.is_empty());
    }
}
