//! Retriever configuration
//!
//! One immutable [`RetrieverConfig`] is built at startup, validated, wrapped in
//! an `Arc` and handed to the chunker and the pipeline. It is read from a TOML
//! file in which every key is optional; secrets may come from the environment
//! instead and override file values.
//!
//! ```toml
//! vector_dimension = 384
//!
//! [embedding]
//! model_name = "intfloat/multilingual-e5-small"
//! batch_size = 32
//!
//! [chunking]
//! chunk_size = 200
//! chunk_overlap = 50
//!
//! [reranking]
//! enabled = true
//! candidate_pool = 15
//! final_top_k = 5
//! alpha = 0.7
//!
//! [index]
//! backend = "qdrant"
//! collection = "snake_knowledge"
//!
//! [generator]
//! backend = "gemini"
//! ```

use lexis_context::ChunkingConfig;
use lexis_embed::{EmbedConfig, RerankConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const QDRANT_URL_ENV: &str = "QDRANT_URL";
pub const QDRANT_API_KEY_ENV: &str = "QDRANT_API_KEY";
pub const GOOGLE_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Which [`crate::index::VectorIndex`] implementation to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// In-process exact search persisted to local files
    #[default]
    Flat,
    /// Remote Qdrant collection over its REST API
    Qdrant,
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexBackend::Flat => write!(f, "flat"),
            IndexBackend::Qdrant => write!(f, "qdrant"),
        }
    }
}

impl std::str::FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(IndexBackend::Flat),
            "qdrant" => Ok(IndexBackend::Qdrant),
            _ => Err(format!("Invalid index backend: {s}")),
        }
    }
}

/// Which [`crate::generator::AnswerGenerator`] to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    #[default]
    Gemini,
    /// Returns the retrieved passages verbatim
    Extractive,
}

impl std::fmt::Display for GeneratorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorBackend::Gemini => write!(f, "gemini"),
            GeneratorBackend::Extractive => write!(f, "extractive"),
        }
    }
}

/// Second-stage ranking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankingConfig {
    pub enabled: bool,
    /// Candidates fetched from the index when reranking
    pub candidate_pool: usize,
    /// Passages handed to the answer generator
    pub final_top_k: usize,
    /// Weight of the cross-encoder score in the fused score
    pub alpha: f32,
    #[serde(flatten)]
    pub model: RerankConfig,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate_pool: 15,
            final_top_k: 5,
            alpha: 0.7,
            model: RerankConfig::default(),
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Flat backend artifact path; `<path>.index` and `<path>_texts.json` are written
    pub path: PathBuf,
    /// Qdrant collection name
    pub collection: String,
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    /// Points per Qdrant upsert request
    pub upload_batch_size: usize,
    /// Attempts per upload batch, including the first
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further attempt
    pub retry_base_delay_ms: u64,
    /// Pause between consecutive upload batches
    pub batch_pause_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Flat,
            path: PathBuf::from("lexis_index"),
            collection: "lexis_chunks".to_string(),
            qdrant_url: None,
            qdrant_api_key: None,
            upload_batch_size: 50,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            batch_pause_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl IndexConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Answer generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    pub model: String,
    pub api_key: Option<String>,
    /// Expert role the model is asked to answer as
    pub persona: String,
    /// Base URL of the Generative Language API
    pub endpoint: String,
    /// Minimum time between two requests
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Gemini,
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            persona: "a snake expert".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            // Free tier allows about 10 requests per minute.
            min_interval_ms: 7000,
            request_timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Complete configuration of the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Dimension every stored and query vector must have
    pub vector_dimension: usize,
    pub embedding: EmbedConfig,
    pub chunking: ChunkingConfig,
    pub reranking: RerankingConfig,
    pub index: IndexConfig,
    pub generator: GeneratorConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            vector_dimension: 384,
            embedding: EmbedConfig::default(),
            chunking: ChunkingConfig::default(),
            reranking: RerankingConfig::default(),
            index: IndexConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl RetrieverConfig {
    /// Read `path` when given (defaults otherwise) and apply environment overrides.
    /// The result is not validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override secrets and endpoints from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override secrets and endpoints from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get(QDRANT_URL_ENV) {
            self.index.qdrant_url = Some(url);
        }
        if let Some(key) = get(QDRANT_API_KEY_ENV) {
            self.index.qdrant_api_key = Some(key);
        }
        if let Some(key) = get(GOOGLE_API_KEY_ENV) {
            self.generator.api_key = Some(key);
        }
    }

    pub fn with_index_backend(mut self, backend: IndexBackend) -> Self {
        self.index.backend = backend;
        self
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index.path = path.into();
        self
    }

    pub fn with_generator_backend(mut self, backend: GeneratorBackend) -> Self {
        self.generator.backend = backend;
        self
    }

    pub fn with_reranking(mut self, enabled: bool) -> Self {
        self.reranking.enabled = enabled;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_vector_dimension(mut self, vector_dimension: usize) -> Self {
        self.vector_dimension = vector_dimension;
        self
    }

    /// Fail fast on anything that would only break later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.chunking.validate()?;

        if self.vector_dimension == 0 {
            return Err(ConfigError::invalid("vector_dimension", "must be greater than zero"));
        }

        let reranking = &self.reranking;
        if !(0.0..=1.0).contains(&reranking.alpha) {
            return Err(ConfigError::invalid(
                "reranking.alpha",
                format!("{} is outside [0, 1]", reranking.alpha),
            ));
        }
        if reranking.final_top_k == 0 {
            return Err(ConfigError::invalid("reranking.final_top_k", "must be greater than zero"));
        }
        if reranking.candidate_pool == 0 {
            return Err(ConfigError::invalid("reranking.candidate_pool", "must be greater than zero"));
        }
        if reranking.enabled {
            reranking.model.validate()?;
            if reranking.candidate_pool < reranking.final_top_k {
                return Err(ConfigError::invalid(
                    "reranking.candidate_pool",
                    format!(
                        "{} is smaller than final_top_k {}",
                        reranking.candidate_pool, reranking.final_top_k
                    ),
                ));
            }
        }

        let index = &self.index;
        if index.upload_batch_size == 0 {
            return Err(ConfigError::invalid("index.upload_batch_size", "must be greater than zero"));
        }
        if index.max_retries == 0 {
            return Err(ConfigError::invalid("index.max_retries", "must be at least 1"));
        }
        match index.backend {
            IndexBackend::Flat => {
                if index.path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid("index.path", "must not be empty"));
                }
            }
            IndexBackend::Qdrant => {
                let url = index.qdrant_url.as_deref().unwrap_or_default();
                if url.trim().is_empty() {
                    return Err(ConfigError::Missing {
                        what: "Qdrant URL",
                        key: "index.qdrant_url",
                        env: QDRANT_URL_ENV,
                    });
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::invalid("index.qdrant_url", "must be an http(s) URL"));
                }
                if index.collection.trim().is_empty() {
                    return Err(ConfigError::invalid("index.collection", "must not be empty"));
                }
                if index.qdrant_api_key.is_none() {
                    tracing::warn!("No Qdrant API key configured; requests are sent unauthenticated");
                }
            }
        }

        if self.generator.backend == GeneratorBackend::Gemini
            && self
                .generator
                .api_key
                .as_deref()
                .is_none_or(|key| key.trim().is_empty())
        {
            return Err(ConfigError::Missing {
                what: "Gemini API key",
                key: "generator.api_key",
                env: GOOGLE_API_KEY_ENV,
            });
        }

        Ok(())
    }

    /// Compare the loaded model's output dimension with `vector_dimension`.
    pub fn check_dimension(&self, actual: usize) -> Result<(), ConfigError> {
        if actual != self.vector_dimension {
            return Err(ConfigError::DimensionMismatch {
                configured: self.vector_dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> RetrieverConfig {
        let mut config = RetrieverConfig::default();
        config.generator.api_key = Some("test-key".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = RetrieverConfig::default();
        assert_eq!(config.vector_dimension, 384);
        assert_eq!(config.reranking.candidate_pool, 15);
        assert_eq!(config.reranking.final_top_k, 5);
        assert!((config.reranking.alpha - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.index.backend, IndexBackend::Flat);
        assert_eq!(config.index.upload_batch_size, 50);
        assert_eq!(config.index.max_retries, 3);
        assert_eq!(config.index.retry_base_delay(), Duration::from_secs(2));
        assert_eq!(config.embedding.batch_size, 32);
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = RetrieverConfig::from_toml_str(
            r#"
            vector_dimension = 768

            [reranking]
            enabled = false
            final_top_k = 3
            model_name = "BAAI/bge-reranker-base"

            [index]
            backend = "qdrant"
            collection = "snakes"

            [chunking.field_policies."Độc tính"]
            unit = "words"
            size = 100
            overlap = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.vector_dimension, 768);
        assert!(!config.reranking.enabled);
        assert_eq!(config.reranking.final_top_k, 3);
        assert_eq!(config.reranking.candidate_pool, 15);
        assert_eq!(config.reranking.model.model_name, "BAAI/bge-reranker-base");
        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.index.collection, "snakes");
        assert_eq!(
            config.chunking.policy_for(Some("Độc tính")),
            lexis_context::FieldChunkPolicy::words(100, 20)
        );
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (QDRANT_URL_ENV, "https://qdrant.example:6333"),
            (QDRANT_API_KEY_ENV, "secret"),
            (GOOGLE_API_KEY_ENV, ""),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.index.qdrant_url = Some("http://localhost:6333".to_string());
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.index.qdrant_url.as_deref(), Some("https://qdrant.example:6333"));
        assert_eq!(config.index.qdrant_api_key.as_deref(), Some("secret"));
        // Empty values do not clobber
        assert_eq!(config.generator.api_key.as_deref(), Some("test-key"));
    }

    #[test]
    fn test_validate_missing_credentials() {
        let config = RetrieverConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { env: GOOGLE_API_KEY_ENV, .. })
        ));

        let config = valid_config().with_index_backend(IndexBackend::Qdrant);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { env: QDRANT_URL_ENV, .. })
        ));

        let config = RetrieverConfig::default().with_generator_backend(GeneratorBackend::Extractive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = valid_config();
        config.reranking.alpha = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = valid_config();
        config.reranking.candidate_pool = 3;
        assert!(config.validate().is_err());
        // The pool only matters when reranking
        config.reranking.enabled = false;
        assert!(config.validate().is_ok());

        let config = valid_config().with_chunking(ChunkingConfig::plain(50, 50));
        assert!(matches!(config.validate(), Err(ConfigError::Chunking(_))));
    }

    #[test]
    fn test_check_dimension() {
        let config = RetrieverConfig::default();
        assert!(config.check_dimension(384).is_ok());
        assert!(matches!(
            config.check_dimension(1024),
            Err(ConfigError::DimensionMismatch {
                configured: 384,
                actual: 1024
            })
        ));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexis.toml");
        std::fs::write(&path, "[index]\npath = \"data/snakes\"\n").unwrap();

        let config = RetrieverConfig::load(Some(&path)).unwrap();
        assert_eq!(config.index.path, PathBuf::from("data/snakes"));

        std::fs::write(&path, "vector_dimension = \"many\"").unwrap();
        assert!(matches!(
            RetrieverConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            RetrieverConfig::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }
}
