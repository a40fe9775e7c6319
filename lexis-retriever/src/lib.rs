//! lexis-retriever: retrieval-augmented question answering over a field-structured knowledge base
//!
//! Records are chunked per field, embedded, stored in a vector index (local flat
//! file or a Qdrant collection), retrieved by similarity, optionally reranked by
//! a cross-encoder, and handed to an answer generator.
//!
//! ## Key Modules
//!
//! - **[`pipeline`]**: The orchestrator with its `UNINDEXED` / `READY` state
//! - **[`index`]**: The [`index::VectorIndex`] contract with flat and Qdrant backends
//! - **[`rerank`]**: Min-max score fusion of cross-encoder and similarity scores
//! - **[`generator`]**: The answer generation seam (Gemini or extractive)
//! - **[`config`]**: TOML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lexis_retriever::{QueryOptions, RagPipeline, RetrieverConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RetrieverConfig::load(None)?;
//! let pipeline = RagPipeline::from_config(config).await?;
//! if !pipeline.load_existing_index().await? {
//!     pipeline.ingest_texts(&["Rắn hổ mang chúa là loài rắn độc dài nhất.".to_string()]).await?;
//! }
//! let response = pipeline.query("Loài rắn độc nào dài nhất?", QueryOptions::default()).await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Documents → Chunker → Embedder → VectorIndex (flat | Qdrant)
//!                                        ↓
//! Question  → Embedder → search(pool) → Reranker (fusion) → AnswerGenerator
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod rerank;

pub use config::{GeneratorBackend, IndexBackend, RetrieverConfig};
pub use error::{ConfigError, IndexError, PipelineError, Result};
pub use generator::{AnswerGenerator, GenerationError};
pub use index::{ChunkMetadata, IndexStats, SearchHit, VectorIndex};
pub use pipeline::{
    ComponentCheck, IngestReport, PipelineState, PipelineStats, QueryOptions, QueryResponse,
    QueryStatus, RagPipeline, RetrievedPassage,
};
pub use rerank::{Candidate, RankedPassage, Reranker};
