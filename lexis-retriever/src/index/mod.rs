//! Vector index abstraction
//!
//! The pipeline depends only on [`VectorIndex`]. Two backends implement it with
//! identical observable behavior:
//!
//! - [`flat::FlatIndex`]: exact in-process search, persisted to two local files
//! - [`qdrant::QdrantIndex`]: a remote Qdrant collection over REST
//!
//! Every backend stores (vector, text, metadata) records, assigns sequence ids
//! continuing from the current count, L2-normalizes vectors on the way in and
//! on the way out, and answers searches with cosine similarity in `[-1, 1]`.
//!
//! ```text
//!                 ┌─ FlatIndex ── <path>.index + <path>_texts.json
//! VectorIndex ────┤
//!                 └─ QdrantIndex ── HTTP ── Qdrant collection
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{IndexBackend, RetrieverConfig};
use crate::error::{ConfigError, IndexError};

pub mod flat;
pub mod qdrant;
pub mod retry;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Where a stored text came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub entity: Option<String>,
    pub field: Option<String>,
    /// Position of the chunk within its source field
    pub sequence: usize,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub text: String,
    /// Cosine similarity with the query
    pub score: f32,
    /// 0-based position in the result list
    pub rank: usize,
    pub metadata: Option<ChunkMetadata>,
}

/// Diagnostics about a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total: usize,
    pub dimension: usize,
    pub backend: String,
    /// Collection name or artifact path
    pub location: String,
}

/// Storage and nearest-neighbor search of embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Discard every stored record. Calling it twice is the same as calling it once.
    async fn reset(&self) -> Result<()>;

    /// Store one batch. `vectors` and `texts` (and `metadata`, when given) must
    /// have equal length and every vector the index dimension. Either the whole
    /// batch becomes visible to searches or an error is returned.
    async fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        texts: Vec<String>,
        metadata: Option<Vec<ChunkMetadata>>,
    ) -> Result<()>;

    /// Up to `k` hits ordered by descending similarity; empty when the index is.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    async fn stats(&self) -> Result<IndexStats>;

    /// Write pending state to durable storage.
    async fn persist(&self) -> Result<()>;

    /// Adopt previously persisted state. `Ok(false)` when there is nothing
    /// complete to load; the index is then left untouched.
    async fn load(&self) -> Result<bool>;

    fn backend_name(&self) -> &str;
}

/// Build the backend selected in `config`.
pub fn build_index(config: &RetrieverConfig) -> std::result::Result<Arc<dyn VectorIndex>, ConfigError> {
    let index: Arc<dyn VectorIndex> = match config.index.backend {
        IndexBackend::Flat => Arc::new(flat::FlatIndex::new(
            config.vector_dimension,
            config.index.path.clone(),
        )),
        IndexBackend::Qdrant => Arc::new(qdrant::QdrantIndex::from_config(
            &config.index,
            config.vector_dimension,
        )?),
    };
    tracing::info!("Using {} vector index", index.backend_name());
    Ok(index)
}

/// Check the parallel inputs of an `add` call.
pub(crate) fn check_batch(
    dimension: usize,
    vectors: &[Vec<f32>],
    texts: &[String],
    metadata: Option<&[ChunkMetadata]>,
) -> Result<()> {
    if vectors.len() != texts.len() {
        return Err(IndexError::LengthMismatch {
            what: "vectors/texts",
            left: vectors.len(),
            right: texts.len(),
        });
    }
    if let Some(metadata) = metadata.filter(|m| m.len() != texts.len()) {
        return Err(IndexError::LengthMismatch {
            what: "metadata/texts",
            left: metadata.len(),
            right: texts.len(),
        });
    }
    check_dimensions(dimension, vectors)?;
    match vectors.iter().position(|v| !is_finite(v)) {
        Some(position) => Err(IndexError::NonFinite {
            what: "vector",
            position,
        }),
        None => Ok(()),
    }
}

/// Check a search vector before it is scored against stored rows.
pub(crate) fn check_query(dimension: usize, query: &[f32]) -> Result<()> {
    if query.len() != dimension {
        return Err(IndexError::dimension(dimension, query.len()));
    }
    if !is_finite(query) {
        return Err(IndexError::NonFinite {
            what: "query",
            position: 0,
        });
    }
    Ok(())
}

fn is_finite(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

pub(crate) fn check_dimensions(dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    match vectors.iter().find(|v| v.len() != dimension) {
        Some(bad) => Err(IndexError::dimension(dimension, bad.len())),
        None => Ok(()),
    }
}

/// Unit-length copy of `vector`.
pub(crate) fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    lexis_embed::normalize_l2(&mut copy);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(check_batch(2, &vectors, &texts, None).is_ok());

        assert!(matches!(
            check_batch(2, &vectors, &texts[..1], None),
            Err(IndexError::LengthMismatch { left: 2, right: 1, .. })
        ));
        assert!(matches!(
            check_batch(3, &vectors, &texts, None),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        let metadata = vec![ChunkMetadata::default()];
        assert!(check_batch(2, &vectors, &texts, Some(&metadata)).is_err());
    }

    #[test]
    fn test_non_finite_vectors_are_rejected() {
        let vectors = vec![vec![1.0, 0.0], vec![f32::NAN, 1.0]];
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            check_batch(2, &vectors, &texts, None),
            Err(IndexError::NonFinite { what: "vector", position: 1 })
        ));

        assert!(check_query(2, &[0.5, 0.5]).is_ok());
        assert!(matches!(
            check_query(2, &[f32::INFINITY, 0.0]),
            Err(IndexError::NonFinite { what: "query", .. })
        ));
        assert!(matches!(
            check_query(3, &[0.5, 0.5]),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_build_index_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = RetrieverConfig::default().with_index_path(dir.path().join("idx"));
        assert_eq!(build_index(&config).unwrap().backend_name(), "flat");

        let mut config = config.with_index_backend(IndexBackend::Qdrant);
        assert!(build_index(&config).is_err());
        config.index.qdrant_url = Some("http://localhost:6333".to_string());
        assert_eq!(build_index(&config).unwrap().backend_name(), "qdrant");
    }
}
