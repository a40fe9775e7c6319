//! Error types for indexing, configuration and the retrieval pipeline

use std::path::PathBuf;

/// Failures of a [`crate::index::VectorIndex`] backend.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A vector whose length differs from the index dimension
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Parallel inputs of different lengths
    #[error("{what} length mismatch: {left} vs {right}")]
    LengthMismatch {
        what: &'static str,
        left: usize,
        right: usize,
    },

    /// A NaN or infinite component in an input vector
    #[error("{what} {position} has a non-finite component")]
    NonFinite { what: &'static str, position: usize },

    /// A transient backend failure that kept failing until the retry ceiling
    #[error("{operation} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: usize,
        message: String,
    },

    /// Non-retryable response from a remote backend
    #[error("{operation} rejected with status {status}: {body}")]
    Backend {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// A persisted artifact that exists but cannot be decoded
    #[error("corrupt index artifact {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl IndexError {
    pub fn dimension(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}

/// Startup configuration problems. All of these are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A credential or URL required by the selected backend is absent
    #[error("missing {what}: set `{key}` in the config file or the {env} environment variable")]
    Missing {
        what: &'static str,
        key: &'static str,
        env: &'static str,
    },

    #[error("invalid configuration value for `{key}`: {message}")]
    Invalid { key: String, message: String },

    /// The loaded embedding model disagrees with the configured vector dimension
    #[error("embedding model produces {actual}-dimensional vectors but vector_dimension is {configured}")]
    DimensionMismatch { configured: usize, actual: usize },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Chunking(#[from] lexis_context::ChunkError),

    #[error(transparent)]
    Model(#[from] lexis_embed::EmbedError),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Anything that can fail in an ingest or query call.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chunking(#[from] lexis_context::ChunkError),

    #[error(transparent)]
    Model(#[from] lexis_embed::EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_env_var() {
        let err = ConfigError::Missing {
            what: "Qdrant URL",
            key: "index.qdrant_url",
            env: "QDRANT_URL",
        };
        let message = err.to_string();
        assert!(message.contains("index.qdrant_url"));
        assert!(message.contains("QDRANT_URL"));
    }

    #[test]
    fn test_index_error_converts_into_pipeline_error() {
        let err: PipelineError = IndexError::dimension(384, 768).into();
        assert!(matches!(
            err,
            PipelineError::Index(IndexError::DimensionMismatch {
                expected: 384,
                actual: 768
            })
        ));
        assert_eq!(
            err.to_string(),
            "vector dimension mismatch: expected 384, got 768"
        );
    }
}
