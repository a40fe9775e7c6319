//! Configuration for embedding and relevance-scoring models

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default multilingual embedding model (384 dimensions).
pub const DEFAULT_EMBEDDING_MODEL: &str = "intfloat/multilingual-e5-small";

/// Default multilingual cross-encoder.
pub const DEFAULT_RERANK_MODEL: &str = "jinaai/jina-reranker-v2-base-multilingual";

/// Prefix the e5 family expects on indexed passages.
pub const DEFAULT_PASSAGE_PREFIX: &str = "passage: ";

/// Prefix the e5 family expects on search queries.
pub const DEFAULT_QUERY_PREFIX: &str = "query: ";

fn default_cache_dir() -> PathBuf {
    PathBuf::from("models")
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Model identifier as published on the HuggingFace hub
    pub model_name: String,
    /// Directory where downloaded model files are cached
    pub cache_dir: PathBuf,
    /// Maximum batch size for embedding generation
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    pub normalize: bool,
    /// Prepended to every indexed passage
    pub passage_prefix: String,
    /// Prepended to every query
    pub query_prefix: String,
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_EMBEDDING_MODEL.to_string(),
            cache_dir: default_cache_dir(),
            batch_size: 32,
            normalize: true,
            passage_prefix: DEFAULT_PASSAGE_PREFIX.to_string(),
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
            show_download_progress: true,
        }
    }
}

impl EmbedConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Default model cached under `cache_dir`
    pub fn default_with_path<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self::default().with_cache_dir(cache_dir)
    }

    /// Set the cache directory (builder style)
    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..self
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the asymmetric passage/query prefixes (builder style)
    pub fn with_prefixes(self, passage: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            passage_prefix: passage.into(),
            query_prefix: query.into(),
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch_size must be greater than zero",
            ));
        }
        if self.passage_prefix == self.query_prefix && !self.passage_prefix.is_empty() {
            tracing::warn!(
                "Passage and query prefixes are identical ({:?}); retrieval quality may suffer",
                self.passage_prefix
            );
        }
        Ok(())
    }
}

/// Configuration for cross-encoder relevance models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// Model identifier as published on the HuggingFace hub
    pub model_name: String,
    /// Directory where downloaded model files are cached
    pub cache_dir: PathBuf,
    /// Pairs scored per model call
    pub batch_size: usize,
    pub show_download_progress: bool,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_RERANK_MODEL.to_string(),
            cache_dir: default_cache_dir(),
            batch_size: 32,
            show_download_progress: true,
        }
    }
}

impl RerankConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..self
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config(
                "batch_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_creation() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::default_with_path(temp_dir.path());

        assert_eq!(config.model_name(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.cache_dir, temp_dir.path());
        assert_eq!(config.batch_size, 32);
        assert!(config.normalize);
        assert_eq!(config.passage_prefix, "passage: ");
        assert_eq!(config.query_prefix, "query: ");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = EmbedConfig::new("BAAI/bge-small-en-v1.5")
            .with_batch_size(8)
            .with_normalize(false)
            .with_prefixes("", "Represent this sentence for searching relevant passages: ");

        assert_eq!(config.model_name(), "BAAI/bge-small-en-v1.5");
        assert_eq!(config.batch_size, 8);
        assert!(!config.normalize);
        assert!(config.passage_prefix.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(EmbedConfig::default().with_batch_size(0).validate().is_err());
        assert!(EmbedConfig::new("  ").validate().is_err());
        assert!(RerankConfig::default().with_batch_size(0).validate().is_err());
        assert!(RerankConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: EmbedConfig = serde_json::from_str(r#"{"batch_size": 4}"#).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.model_name, DEFAULT_EMBEDDING_MODEL);

        let config: RerankConfig =
            serde_json::from_str(r#"{"model_name": "BAAI/bge-reranker-base"}"#).unwrap();
        assert_eq!(config.model_name, "BAAI/bge-reranker-base");
        assert_eq!(config.batch_size, 32);
    }
}
