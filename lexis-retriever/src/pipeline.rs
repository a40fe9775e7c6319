//! Retrieval pipeline: ingestion, query and the indexed/not-indexed state.
//!
//! ```text
//! ingest:  documents → Chunker → EmbeddingProvider (passages) → VectorIndex.add → persist → READY
//! query:   question → EmbeddingProvider (query) → VectorIndex.search(pool)
//!                   → Reranker.fuse (or truncate) → AnswerGenerator
//! ```
//!
//! The pipeline starts `UNINDEXED` and becomes `READY` after a successful
//! ingestion or after loading a non-empty persisted index. A query in the
//! `UNINDEXED` state returns a [`QueryStatus::NotIndexed`] response without
//! touching any model. Errors from chunking, embedding, the index and the
//! reranker propagate; only answer generation is converted into a readable
//! message.

use chrono::{DateTime, Utc};
use lexis_context::{Chunk, ChunkStats, Chunker, Document};
use lexis_embed::{EmbeddingProvider, FastEmbedProvider, FastEmbedReranker, RelevanceScorer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::RetrieverConfig;
use crate::error::{ConfigError, IndexError, Result};
use crate::generator::{AnswerGenerator, build_generator};
use crate::index::{ChunkMetadata, IndexStats, VectorIndex, build_index};
use crate::rerank::{Candidate, Reranker};

pub const NOT_INDEXED_MESSAGE: &str =
    "No documents have been indexed yet. Please ingest documents before asking questions.";
pub const NO_CONTEXT_MESSAGE: &str =
    "I couldn't find any relevant information to answer your question.";
pub const GENERATION_ERROR_PREFIX: &str =
    "Sorry, I encountered an error while generating the response: ";

/// Whether the index currently holds embeddings that queries can use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Unindexed,
    Ready,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Unindexed => write!(f, "UNINDEXED"),
            PipelineState::Ready => write!(f, "READY"),
        }
    }
}

/// Per-query switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Rerank when a reranker is configured and enabled
    pub rerank: bool,
    /// Overrides the configured final result count
    pub top_k: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            rerank: true,
            top_k: None,
        }
    }
}

impl QueryOptions {
    pub fn without_reranking() -> Self {
        Self {
            rerank: false,
            top_k: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    /// Nothing has been ingested or loaded
    NotIndexed,
    /// The index is populated but returned no candidates
    NoRelevantContext,
}

/// One passage handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub rank: usize,
    pub text: String,
    /// Similarity score from the index
    pub similarity: f32,
    /// Normalized cross-encoder score, when reranked
    pub reranker_score: Option<f32>,
    /// Fused score, when reranked
    pub combined_score: Option<f32>,
}

/// Which path a query took and how many passages survived each stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDiagnostics {
    pub reranking_used: bool,
    pub candidates_requested: usize,
    pub candidates_retrieved: usize,
    pub passages_returned: usize,
    pub alpha: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub status: QueryStatus,
    pub answer: String,
    pub passages: Vec<RetrievedPassage>,
    pub diagnostics: QueryDiagnostics,
    /// The answer is an error message from a failed generation
    pub degraded: bool,
    pub answered_at: DateTime<Utc>,
}

impl QueryResponse {
    fn without_context(question: &str, status: QueryStatus, message: &str) -> Self {
        Self {
            question: question.to_string(),
            status,
            answer: message.to_string(),
            passages: Vec::new(),
            diagnostics: QueryDiagnostics::default(),
            degraded: false,
            answered_at: Utc::now(),
        }
    }

    pub fn passage_texts(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Sentence-aware character chunks, no prefix
    Plain,
    /// Per-field policies with entity/field prefixes
    Fields,
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub mode: IngestMode,
    pub documents: usize,
    pub chunks: usize,
    pub embeddings: usize,
    /// Fields chunked, in order (empty for plain ingestion)
    pub fields: Vec<String>,
    pub chunk_stats: Option<ChunkStats>,
    pub index: IndexStats,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub index: IndexStats,
    pub vector_dimension: usize,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub reranking_enabled: bool,
    pub reranker: Option<String>,
    pub candidate_pool: usize,
    pub final_top_k: usize,
    pub alpha: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub field_specific: bool,
    pub generator: String,
}

/// Result of probing each component once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub embedder: bool,
    pub chunker: bool,
    pub index: bool,
    /// `None` when no reranker is configured
    pub reranker: Option<bool>,
    pub generator: bool,
}

impl ComponentCheck {
    pub fn all_ok(&self) -> bool {
        self.embedder && self.chunker && self.index && self.reranker.unwrap_or(true) && self.generator
    }
}

/// Number of candidates to fetch from the index.
pub fn candidate_pool_size(reranking: bool, candidate_pool: usize, final_top_k: usize) -> usize {
    if reranking {
        candidate_pool.max(final_top_k)
    } else {
        final_top_k
    }
}

/// Composes chunker, embedder, index, reranker and generator.
pub struct RagPipeline {
    config: Arc<RetrieverConfig>,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Reranker>,
    generator: Arc<dyn AnswerGenerator>,
    state: RwLock<PipelineState>,
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("embedder", &self.embedder.provider_name())
            .field("index", &self.index.backend_name())
            .field("reranker", &self.reranker)
            .field("generator", &self.generator.generator_name())
            .finish_non_exhaustive()
    }
}

impl RagPipeline {
    /// Assemble a pipeline from ready components. Fails when the chunking
    /// policies are invalid or the embedder's dimension differs from
    /// `vector_dimension`. Starts without a reranker; see [`RagPipeline::with_scorer`].
    pub fn new(
        config: Arc<RetrieverConfig>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Self> {
        config.check_dimension(embedder.embedding_dimension())?;
        let chunker = Chunker::new(config.chunking.clone()).map_err(ConfigError::from)?;

        Ok(Self {
            config,
            chunker,
            embedder,
            index,
            reranker: None,
            generator,
            state: RwLock::new(PipelineState::Unindexed),
        })
    }

    /// Rerank with `scorer` using the configured alpha. Fails when alpha is outside `[0, 1]`.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Result<Self> {
        self.reranker = Some(Reranker::new(scorer, self.config.reranking.alpha)?);
        Ok(self)
    }

    /// Validate `config`, load the models and build the selected backends.
    pub async fn from_config(config: RetrieverConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let embedder = FastEmbedProvider::create(config.embedding.clone()).await?;
        let index = build_index(&config)?;
        let generator = build_generator(&config.generator)?;
        let mut pipeline = Self::new(Arc::clone(&config), Arc::new(embedder), index, generator)?;

        if config.reranking.enabled {
            let scorer = FastEmbedReranker::create(config.reranking.model.clone()).await?;
            pipeline = pipeline.with_scorer(Arc::new(scorer))?;
        }

        tracing::info!("Pipeline ready to ingest or load: {:?}", pipeline);
        Ok(pipeline)
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub async fn state(&self) -> PipelineState {
        *self.state.read().await
    }

    pub async fn is_indexed(&self) -> bool {
        self.state().await == PipelineState::Ready
    }

    async fn set_state(&self, state: PipelineState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::info!("Pipeline state {} -> {}", *current, state);
        }
        *current = state;
    }

    /// Plain ingestion: each text is chunked on its own with the default size and overlap.
    pub async fn ingest_texts(&self, texts: &[String]) -> Result<IngestReport> {
        let chunks: Vec<Chunk> = texts
            .iter()
            .flat_map(|text| self.chunker.chunk_text(text))
            .collect();
        tracing::info!("Chunked {} texts into {} chunks", texts.len(), chunks.len());

        self.index_chunks(chunks, IngestMode::Plain, texts.len(), Vec::new())
            .await
    }

    /// Field-aware ingestion of knowledge-base records.
    pub async fn ingest_documents(&self, documents: &[Document]) -> Result<IngestReport> {
        let chunks = self.chunker.chunk_documents(documents)?;

        let mut per_field: BTreeMap<&str, usize> = BTreeMap::new();
        for chunk in &chunks {
            *per_field
                .entry(chunk.field.as_deref().unwrap_or("<none>"))
                .or_default() += 1;
        }
        for (field, count) in &per_field {
            tracing::debug!("Field {}: {} chunks", field, count);
        }
        tracing::info!(
            "Chunked {} documents into {} chunks across {} fields",
            documents.len(),
            chunks.len(),
            per_field.len()
        );

        let fields = self.config.chunking.fields.clone();
        self.index_chunks(chunks, IngestMode::Fields, documents.len(), fields)
            .await
    }

    async fn index_chunks(
        &self,
        chunks: Vec<Chunk>,
        mode: IngestMode,
        documents: usize,
        fields: Vec<String>,
    ) -> Result<IngestReport> {
        let chunk_stats = ChunkStats::from_chunks(&chunks);
        if let Some(stats) = &chunk_stats {
            tracing::info!(
                "Chunk lengths: avg {:.1}, max {}, min {} chars",
                stats.average_chars,
                stats.max_chars,
                stats.min_chars
            );
        }

        if chunks.is_empty() {
            tracing::warn!("Ingestion produced no chunks; index left unchanged");
            return Ok(IngestReport {
                mode,
                documents,
                chunks: 0,
                embeddings: 0,
                fields,
                chunk_stats,
                index: self.index.stats().await?,
                completed_at: Utc::now(),
            });
        }

        let (texts, metadata): (Vec<String>, Vec<ChunkMetadata>) = chunks
            .into_iter()
            .map(|chunk| {
                let metadata = ChunkMetadata {
                    entity: chunk.entity,
                    field: chunk.field,
                    sequence: chunk.sequence,
                };
                (chunk.text, metadata)
            })
            .unzip();

        let result = self.embed_and_store(texts, metadata).await;
        let embeddings = match result {
            Ok(embeddings) => embeddings,
            Err(err) => {
                tracing::error!("Ingestion failed: {}", err);
                return Err(err);
            }
        };

        self.set_state(PipelineState::Ready).await;
        let index = self.index.stats().await?;
        tracing::info!(
            "Ingested {} chunks; {} index now holds {} vectors",
            embeddings,
            index.backend,
            index.total
        );

        Ok(IngestReport {
            mode,
            documents,
            chunks: embeddings,
            embeddings,
            fields,
            chunk_stats,
            index,
            completed_at: Utc::now(),
        })
    }

    /// Embed every chunk, then add them in one call and persist.
    async fn embed_and_store(&self, texts: Vec<String>, metadata: Vec<ChunkMetadata>) -> Result<usize> {
        let batch_size = self.config.embedding.batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let result = self.embedder.embed_passages(batch).await?;
            if result.len() != batch.len() {
                return Err(IndexError::LengthMismatch {
                    what: "embeddings/chunks",
                    left: result.len(),
                    right: batch.len(),
                }
                .into());
            }
            vectors.extend(result.embeddings);
            tracing::debug!("Embedded batch {}/{}", batch_no + 1, total_batches);
        }

        let count = vectors.len();
        self.index.add(vectors, texts, Some(metadata)).await?;
        self.index.persist().await?;
        Ok(count)
    }

    /// Adopt a persisted index. Returns whether the pipeline is now `READY`.
    pub async fn load_existing_index(&self) -> Result<bool> {
        if !self.index.load().await? {
            tracing::info!("No existing index to load");
            return Ok(false);
        }

        let stats = self.index.stats().await?;
        if stats.total == 0 {
            tracing::info!("Existing index at {} is empty", stats.location);
            return Ok(false);
        }

        self.set_state(PipelineState::Ready).await;
        tracing::info!("Loaded existing index with {} vectors", stats.total);
        Ok(true)
    }

    /// Answer `question` from the index.
    pub async fn query(&self, question: &str, options: QueryOptions) -> Result<QueryResponse> {
        if !self.is_indexed().await {
            tracing::warn!("Query received before any index was ingested or loaded");
            return Ok(QueryResponse::without_context(
                question,
                QueryStatus::NotIndexed,
                NOT_INDEXED_MESSAGE,
            ));
        }

        let reranking = &self.config.reranking;
        let reranker = self
            .reranker
            .as_ref()
            .filter(|_| options.rerank && reranking.enabled);
        let final_top_k = options.top_k.unwrap_or(reranking.final_top_k);
        let pool = candidate_pool_size(reranker.is_some(), reranking.candidate_pool, final_top_k);

        let query_vector = self.embedder.embed_query(question).await?;
        if query_vector.len() != self.config.vector_dimension {
            return Err(IndexError::dimension(self.config.vector_dimension, query_vector.len()).into());
        }

        let hits = self.index.search(&query_vector, pool).await?;
        if hits.is_empty() {
            tracing::info!("No candidates found for query");
            return Ok(QueryResponse::without_context(
                question,
                QueryStatus::NoRelevantContext,
                NO_CONTEXT_MESSAGE,
            ));
        }
        let candidates: Vec<Candidate> = hits
            .into_iter()
            .map(|hit| Candidate {
                text: hit.text,
                score: hit.score,
            })
            .collect();

        let passages: Vec<RetrievedPassage> = match reranker {
            Some(reranker) => reranker
                .fuse(question, &candidates, Some(final_top_k))
                .await?
                .into_iter()
                .enumerate()
                .map(|(rank, ranked)| RetrievedPassage {
                    rank,
                    text: ranked.text,
                    similarity: ranked.original_score,
                    reranker_score: Some(ranked.reranker_score),
                    combined_score: Some(ranked.combined_score),
                })
                .collect(),
            None => candidates
                .iter()
                .take(final_top_k)
                .enumerate()
                .map(|(rank, candidate)| RetrievedPassage {
                    rank,
                    text: candidate.text.clone(),
                    similarity: candidate.score,
                    reranker_score: None,
                    combined_score: None,
                })
                .collect(),
        };

        let diagnostics = QueryDiagnostics {
            reranking_used: reranker.is_some(),
            candidates_requested: pool,
            candidates_retrieved: candidates.len(),
            passages_returned: passages.len(),
            alpha: reranker.map(Reranker::alpha),
        };
        tracing::info!(
            "Query path: {} ({} requested, {} retrieved, {} returned)",
            if diagnostics.reranking_used { "fusion" } else { "similarity" },
            diagnostics.candidates_requested,
            diagnostics.candidates_retrieved,
            diagnostics.passages_returned
        );

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let (answer, degraded) = match self.generator.generate(question, &texts).await {
            Ok(answer) => (answer, false),
            Err(err) => {
                tracing::warn!("Answer generation failed: {}", err);
                (format!("{GENERATION_ERROR_PREFIX}{err}"), true)
            }
        };

        Ok(QueryResponse {
            question: question.to_string(),
            status: QueryStatus::Answered,
            answer,
            passages,
            diagnostics,
            degraded,
            answered_at: Utc::now(),
        })
    }

    /// Empty the index and return to `UNINDEXED`.
    pub async fn reset(&self) -> Result<()> {
        self.index.reset().await?;
        self.index.persist().await?;
        self.set_state(PipelineState::Unindexed).await;
        Ok(())
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        let config = &self.config;
        Ok(PipelineStats {
            state: self.state().await,
            index: self.index.stats().await?,
            vector_dimension: config.vector_dimension,
            embedding_provider: self.embedder.provider_name().to_string(),
            embedding_model: config.embedding.model_name.clone(),
            reranking_enabled: config.reranking.enabled && self.reranker.is_some(),
            reranker: self.reranker.as_ref().map(|r| r.scorer_name().to_string()),
            candidate_pool: config.reranking.candidate_pool,
            final_top_k: config.reranking.final_top_k,
            alpha: config.reranking.alpha,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            field_specific: config.chunking.field_specific,
            generator: self.generator.generator_name().to_string(),
        })
    }

    /// Exercise every component once. Never fails; failures are logged and reported as `false`.
    pub async fn check_components(&self) -> ComponentCheck {
        let embedder = match self.embedder.embed_query("component check").await {
            Ok(vector) if vector.len() == self.config.vector_dimension => true,
            Ok(vector) => {
                tracing::warn!(
                    "Embedder check: got {} dimensions, expected {}",
                    vector.len(),
                    self.config.vector_dimension
                );
                false
            }
            Err(err) => {
                tracing::warn!("Embedder check failed: {}", err);
                false
            }
        };

        let sample = Document::new()
            .with_field(self.config.chunking.name_field.clone(), "Sample")
            .with_field("Sample field", "This is a sample sentence. It has two sentences.");
        let chunker = match self
            .chunker
            .chunk_documents_with_fields(&[sample], &["Sample field".to_string()])
        {
            Ok(chunks) => !chunks.is_empty(),
            Err(err) => {
                tracing::warn!("Chunker check failed: {}", err);
                false
            }
        };

        let index = match self.index.stats().await {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("Index check failed: {}", err);
                false
            }
        };

        let reranker = match &self.reranker {
            Some(reranker) => Some(
                match reranker
                    .score("component check", &["sample passage".to_string()])
                    .await
                {
                    Ok(scores) => scores.len() == 1,
                    Err(err) => {
                        tracing::warn!("Reranker check failed: {}", err);
                        false
                    }
                },
            ),
            None => None,
        };

        let generator = match self
            .generator
            .generate("Reply with OK.", &["OK".to_string()])
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!("Generator check failed: {}", err);
                false
            }
        };

        let check = ComponentCheck {
            embedder,
            chunker,
            index,
            reranker,
            generator,
        };
        tracing::info!("Component check: {:?}", check);
        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_pool_size() {
        assert_eq!(candidate_pool_size(true, 15, 5), 15);
        assert_eq!(candidate_pool_size(false, 15, 5), 5);
        assert_eq!(candidate_pool_size(true, 15, 20), 20);
    }

    #[test]
    fn test_component_check_all_ok() {
        let mut check = ComponentCheck {
            embedder: true,
            chunker: true,
            index: true,
            reranker: None,
            generator: true,
        };
        assert!(check.all_ok());
        check.reranker = Some(false);
        assert!(!check.all_ok());
    }

    #[test]
    fn test_empty_responses_carry_status() {
        let response =
            QueryResponse::without_context("q", QueryStatus::NotIndexed, NOT_INDEXED_MESSAGE);
        assert_eq!(response.status, QueryStatus::NotIndexed);
        assert!(response.passages.is_empty());
        assert!(!response.degraded);
        assert!(!response.diagnostics.reranking_used);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "not_indexed");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Unindexed.to_string(), "UNINDEXED");
        assert_eq!(PipelineState::Ready.to_string(), "READY");
    }
}
