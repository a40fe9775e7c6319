//! Cross-encoder relevance scoring

use crate::config::RerankConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::{Arc, Mutex};

/// Scores (query, passage) pairs with a pairwise relevance model.
///
/// The returned vector corresponds position by position to `passages`. Raw
/// scores are only comparable within one call.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;

    /// Get the name/identifier of this scorer
    fn scorer_name(&self) -> &str;
}

/// Resolve a HuggingFace model identifier to a built-in fastembed reranker.
pub fn resolve_rerank_model(model_name: &str) -> Result<RerankerModel> {
    TextRerank::list_supported_models()
        .into_iter()
        .find(|info| info.model_code.eq_ignore_ascii_case(model_name))
        .map(|info| info.model)
        .ok_or_else(|| EmbedError::unsupported_model(model_name))
}

/// FastEmbed `TextRerank` cross-encoder
#[derive(Clone)]
pub struct FastEmbedReranker {
    config: RerankConfig,
    model: Arc<Mutex<TextRerank>>,
}

impl std::fmt::Debug for FastEmbedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedReranker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FastEmbedReranker {
    /// Downloads (on first use) and loads the cross-encoder.
    pub async fn create(config: RerankConfig) -> Result<Self> {
        config.validate()?;
        let reranker_model = resolve_rerank_model(&config.model_name)?;
        tokio::fs::create_dir_all(&config.cache_dir).await?;

        tracing::info!("Loading reranker model: {}", config.model_name);

        let init_config = config.clone();
        let model = tokio::task::spawn_blocking(move || -> Result<TextRerank> {
            let options = RerankInitOptions::new(reranker_model)
                .with_cache_dir(init_config.cache_dir.clone())
                .with_show_download_progress(init_config.show_download_progress);
            TextRerank::try_new(options).map_err(EmbedError::model_init)
        })
        .await??;

        tracing::info!("Reranker loaded: {}", config.model_name);
        Ok(Self {
            config,
            model: Arc::new(Mutex::new(model)),
        })
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }
}

#[async_trait]
impl RelevanceScorer for FastEmbedReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let query = query.to_string();
        let passages = passages.to_vec();
        let batch_size = self.config.batch_size;
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            tracing::debug!("Scoring {} passages", passages.len());

            let mut model_guard = model
                .lock()
                .map_err(|_| EmbedError::invalid_config("reranker model lock poisoned"))?;
            let documents: Vec<&str> = passages.iter().map(String::as_str).collect();
            let results = model_guard
                .rerank(query.as_str(), documents, false, Some(batch_size))
                .map_err(EmbedError::scoring)?;

            // Results come back sorted by score; put them back in input order.
            let mut scores = vec![f32::NAN; passages.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            if scores.iter().any(|s| s.is_nan()) {
                return Err(EmbedError::scoring(anyhow::anyhow!(
                    "reranker returned fewer scores than passages"
                )));
            }
            Ok(scores)
        })
        .await?
    }

    fn scorer_name(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rerank_model() {
        assert!(resolve_rerank_model("jinaai/jina-reranker-v2-base-multilingual").is_ok());
        assert!(resolve_rerank_model("BAAI/bge-reranker-base").is_ok());
        assert!(matches!(
            resolve_rerank_model("cross-encoder/none"),
            Err(EmbedError::UnsupportedModel { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_model() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = RerankConfig::new("cross-encoder/none").with_cache_dir(temp_dir.path());
        let err = FastEmbedReranker::create(config).await.unwrap_err();
        assert!(matches!(err, EmbedError::UnsupportedModel { .. }));
    }

    #[tokio::test]
    #[ignore] // Downloads the jina multilingual reranker - run with: cargo test -p lexis-embed -- --ignored
    async fn test_scores_follow_input_order() -> Result<()> {
        let cache_dir = tempfile::tempdir()?;
        let scorer =
            FastEmbedReranker::create(RerankConfig::default().with_cache_dir(cache_dir.path()))
                .await?;

        let passages = vec![
            "Trăn gấm dài tới 7 mét.".to_string(),
            "Rắn hổ mang chúa có nọc độc thần kinh.".to_string(),
        ];
        let scores = scorer.score("Rắn nào có nọc độc thần kinh?", &passages).await?;
        assert_eq!(scores.len(), 2);
        assert!(scores[1] > scores[0]);
        Ok(())
    }
}
