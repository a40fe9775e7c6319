//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone, Default)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// The dimension is inferred from the first vector, or 0 when there are none.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    // The map stays consistent even if a holder panicked.
    get_model_cache()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_model(model: &Mutex<TextEmbedding>) -> Result<MutexGuard<'_, TextEmbedding>> {
    model
        .lock()
        .map_err(|_| EmbedError::invalid_config("embedding model lock poisoned"))
}

/// Trait for embedding providers with asymmetric passage/query encoding.
///
/// Passages and queries go through different fixed preprocessing. Mixing the
/// two does not fail, it silently degrades retrieval, so callers must use the
/// matching method for each side.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed texts that will be stored in the index
    async fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Resolve a HuggingFace model identifier to a built-in fastembed model.
pub fn resolve_embedding_model(model_name: &str) -> Result<EmbeddingModel> {
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(model_name))
        .map(|info| info.model)
        .ok_or_else(|| EmbedError::unsupported_model(model_name))
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`FastEmbedProvider::initialize`] before use.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 384, // multilingual-e5-small
        }
    }

    /// Downloads (on first use) and loads the embedding model, reusing a cached
    /// instance when another provider already loaded the same configuration.
    pub async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );

        let cache_key = self.create_cache_key()?;

        let cached_data = {
            let cache = lock_cache();
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        let embedding_model = resolve_embedding_model(self.config.model_name())?;
        tokio::fs::create_dir_all(&self.config.cache_dir).await?;

        // Load model in a blocking task
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let init_options = InitOptions::new(embedding_model)
                    .with_cache_dir(config.cache_dir.clone())
                    .with_show_download_progress(config.show_download_progress);

                let mut model = TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // Get dimension by generating a test embedding
                let test_embeddings = model
                    .embed(vec![format!("{}test", config.passage_prefix)], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = test_embeddings
                    .first()
                    .map(|emb| emb.len())
                    .ok_or_else(|| EmbedError::invalid_config("model produced no sample embedding"))?;

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        let model_arc = Arc::new(Mutex::new(model));
        lock_cache().insert(cache_key, (Arc::clone(&model_arc), dimension));

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Cache key: FNV hash of the serialized configuration.
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)
            .map_err(|e| EmbedError::External { source: e.into() })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let embedding = self.embed_query("validation test").await?;

        if embedding.is_empty() {
            return Err(EmbedError::invalid_config(
                "Model validation failed: empty embedding",
            ));
        }

        if embedding.len() != self.dimension {
            return Err(EmbedError::invalid_config(format!(
                "Model validation failed: expected dimension {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        lock_cache().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        lock_cache().len()
    }

    /// Embed already-prefixed texts in batches of `config.batch_size`.
    async fn embed_prefixed(&self, texts: Vec<String>) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::default());
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model_clone = Arc::clone(model);

            let batch_embeddings =
                tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                    tracing::debug!("Processing batch of {} texts", batch.len());

                    let mut model_guard = lock_model(&model_clone)?;
                    model_guard
                        .embed(batch, None)
                        .map_err(EmbedError::embedding_gen)
                })
                .await??;

            all_embeddings.extend(batch_embeddings);
        }

        if self.config.normalize {
            for embedding in &mut all_embeddings {
                normalize_l2(embedding);
            }
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_passages(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let prefixed = texts
            .iter()
            .map(|text| format!("{}{}", self.config.passage_prefix, text))
            .collect();
        self.embed_prefixed(prefixed).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = vec![format!("{}{}", self.config.query_prefix, text)];
        self.embed_prefixed(prefixed)
            .await?
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for query"))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}
