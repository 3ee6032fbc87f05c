//! Error types for wikibridge-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{EntityKey, WikiTitle};

/// All errors that can arise from loading or querying the mapping registry.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse mapping at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The mapping file did not exist at the expected path.
    #[error("mapping file not found at {path}")]
    NotFound { path: PathBuf },

    /// Two entries claim the same wiki title.
    #[error("duplicate wiki title in mapping: {title}")]
    DuplicateWikiTitle { title: WikiTitle },

    /// Two entries claim the same git path.
    #[error("duplicate git path in mapping: {key}")]
    DuplicateGitPath { key: EntityKey },
}
