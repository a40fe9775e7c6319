//! # lexis-embed
//!
//! Model adapters for retrieval: a text embedding provider and a cross-encoder
//! relevance scorer, both running local ONNX models through FastEmbed. The
//! rest of the workspace only sees the [`EmbeddingProvider`] and
//! [`RelevanceScorer`] traits, so tests and alternative backends can swap the
//! models out.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lexis_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default_with_path("/tmp/models")).await?;
//!
//! // Passages and queries are encoded with different prefixes.
//! let passages = vec!["Rắn lục đuôi đỏ sống trên cây.".to_string()];
//! let stored = provider.embed_passages(&passages).await?;
//! let query = provider.embed_query("Rắn lục sống ở đâu?").await?;
//!
//! assert_eq!(stored.dimension, query.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Asymmetric encoding
//!
//! The e5 family is trained with `"passage: "` and `"query: "` prefixes.
//! [`FastEmbedProvider`] applies them from [`EmbedConfig`]; using the wrong
//! side does not fail, it just ranks worse.
//!
//! ## Model caching
//!
//! Embedding models are cached process-wide, keyed by a hash of their
//! configuration, so several providers with the same configuration share one
//! loaded model.

pub mod config;
pub mod error;
pub mod provider;
pub mod rerank;

// Re-export main types for easy access
pub use config::{DEFAULT_EMBEDDING_MODEL, DEFAULT_RERANK_MODEL, EmbedConfig, RerankConfig};
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, normalize_l2};
pub use rerank::{FastEmbedReranker, RelevanceScorer};
