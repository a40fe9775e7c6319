//! Exact in-process vector index.
//!
//! Vectors are kept row-major in one `Vec<f32>` and searched by brute-force
//! inner product, which equals cosine similarity because every row is stored
//! at unit length. The whole state sits behind one `RwLock`; `add` holds the
//! write lock for the full batch, so a concurrent search sees either none or
//! all of it.
//!
//! Persistence writes two files next to each other:
//!
//! - `<path>.index`: magic, count and dimension as little-endian `u64`, then
//!   the raw `f32` rows
//! - `<path>_texts.json`: the texts and their metadata, in row order
//!
//! Each file is written to a temporary sibling and renamed into place.
//! `persist` and `load` hold one file lock for the snapshot and both files, so
//! the pair on disk always comes from the same snapshot and a later snapshot
//! is never overwritten by an earlier one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use super::{
    ChunkMetadata, IndexStats, Result, SearchHit, VectorIndex, check_batch, check_query, normalized,
};
use crate::error::IndexError;

const MAGIC: &[u8; 8] = b"LEXFLAT1";
const HEADER_LEN: usize = MAGIC.len() + 16;

#[derive(Debug, Default)]
struct FlatState {
    vectors: Vec<f32>,
    texts: Vec<String>,
    metadata: Vec<Option<ChunkMetadata>>,
}

impl FlatState {
    fn len(&self) -> usize {
        self.texts.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TextsFile {
    texts: Vec<String>,
    metadata: Vec<Option<ChunkMetadata>>,
}

/// Exact search over unit vectors, persisted to local files.
#[derive(Debug)]
pub struct FlatIndex {
    dimension: usize,
    path: PathBuf,
    state: RwLock<FlatState>,
    /// Orders snapshot-and-write sequences against each other and against loads
    files: Mutex<()>,
}

impl FlatIndex {
    pub fn new(dimension: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            path: path.into(),
            state: RwLock::new(FlatState::default()),
            files: Mutex::new(()),
        }
    }

    /// `<path>.index`
    pub fn index_path(&self) -> PathBuf {
        suffixed(&self.path, ".index")
    }

    /// `<path>_texts.json`
    pub fn texts_path(&self) -> PathBuf {
        suffixed(&self.path, "_texts.json")
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `bytes` to `target` through a temporary file in the same directory.
fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn encode_vectors(vectors: &[f32], count: usize, dimension: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + vectors.len() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(count as u64).to_le_bytes());
    bytes.extend_from_slice(&(dimension as u64).to_le_bytes());
    for value in vectors {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Returns (count, dimension, rows).
fn decode_vectors(path: &Path, bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    let corrupt = |message: &str| IndexError::Corrupt {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(corrupt("missing header"));
    }
    let read_u64 = |offset: usize| -> Result<usize> {
        let raw: [u8; 8] = bytes[offset..offset + 8]
            .try_into()
            .map_err(|_| corrupt("truncated header"))?;
        usize::try_from(u64::from_le_bytes(raw)).map_err(|_| corrupt("count overflows usize"))
    };
    let count = read_u64(MAGIC.len())?;
    let dimension = read_u64(MAGIC.len() + 8)?;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt("size overflows usize"))?;
    if body.len() != expected {
        return Err(corrupt("body length does not match header"));
    }

    let mut rows: Vec<f32> = bytemuck::pod_collect_to_vec(body);
    if cfg!(target_endian = "big") {
        for value in &mut rows {
            *value = f32::from_bits(value.to_bits().swap_bytes());
        }
    }
    Ok((count, dimension, rows))
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = FlatState::default();
        tracing::info!("Flat index reset");
        Ok(())
    }

    async fn add(
        &self,
        vectors: Vec<Vec<f32>>,
        texts: Vec<String>,
        metadata: Option<Vec<ChunkMetadata>>,
    ) -> Result<()> {
        check_batch(self.dimension, &vectors, &texts, metadata.as_deref())?;
        if vectors.is_empty() {
            return Ok(());
        }

        let batch_len = vectors.len();
        let mut rows = Vec::with_capacity(batch_len * self.dimension);
        for vector in &vectors {
            rows.extend(normalized(vector));
        }
        let metadata: Vec<Option<ChunkMetadata>> = match metadata {
            Some(metadata) => metadata.into_iter().map(Some).collect(),
            None => vec![None; batch_len],
        };

        let mut state = self.state.write().await;
        let first_id = state.len();
        state.vectors.extend(rows);
        state.texts.extend(texts);
        state.metadata.extend(metadata);

        tracing::debug!(
            "Added {} vectors to flat index (ids {}..{})",
            batch_len,
            first_id,
            state.len()
        );
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_query(self.dimension, query)?;

        let state = self.state.read().await;
        if state.len() == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(query);
        let mut scored: Vec<(usize, f32)> = state
            .vectors
            .chunks_exact(self.dimension)
            .map(|row| row.iter().zip(&query).map(|(a, b)| a * b).sum())
            .enumerate()
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (id, score))| SearchHit {
                text: state.texts[id].clone(),
                score,
                rank,
                metadata: state.metadata[id].clone(),
            })
            .collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            total: self.len().await,
            dimension: self.dimension,
            backend: self.backend_name().to_string(),
            location: self.path.display().to_string(),
        })
    }

    async fn persist(&self) -> Result<()> {
        let _files = self.files.lock().await;
        let (vector_bytes, texts_bytes, count) = {
            let state = self.state.read().await;
            let texts_file = TextsFile {
                texts: state.texts.clone(),
                metadata: state.metadata.clone(),
            };
            (
                encode_vectors(&state.vectors, state.len(), self.dimension),
                serde_json::to_vec(&texts_file)?,
                state.len(),
            )
        };

        let index_path = self.index_path();
        let texts_path = self.texts_path();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            write_atomic(&index_path, &vector_bytes)?;
            write_atomic(&texts_path, &texts_bytes)
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::info!("Persisted {} vectors to {}", count, self.path.display());
        Ok(())
    }

    async fn load(&self) -> Result<bool> {
        let _files = self.files.lock().await;
        let index_path = self.index_path();
        let texts_path = self.texts_path();

        let index_exists = tokio::fs::try_exists(&index_path).await?;
        let texts_exists = tokio::fs::try_exists(&texts_path).await?;
        if !index_exists || !texts_exists {
            if index_exists != texts_exists {
                tracing::warn!(
                    "Incomplete index at {}: {} present, {} missing",
                    self.path.display(),
                    if index_exists { "vectors" } else { "texts" },
                    if index_exists { "texts" } else { "vectors" },
                );
            } else {
                tracing::info!("No persisted index at {}", self.path.display());
            }
            return Ok(false);
        }

        let vector_bytes = tokio::fs::read(&index_path).await?;
        let (count, dimension, vectors) = decode_vectors(&index_path, &vector_bytes)?;
        if dimension != self.dimension {
            return Err(IndexError::dimension(self.dimension, dimension));
        }

        let texts_bytes = tokio::fs::read(&texts_path).await?;
        let texts_file: TextsFile =
            serde_json::from_slice(&texts_bytes).map_err(|e| IndexError::Corrupt {
                path: texts_path.clone(),
                message: e.to_string(),
            })?;

        if texts_file.texts.len() != count || texts_file.metadata.len() != count {
            tracing::warn!(
                "Index files at {} disagree: {} vectors, {} texts, {} metadata entries",
                self.path.display(),
                count,
                texts_file.texts.len(),
                texts_file.metadata.len()
            );
            return Ok(false);
        }

        let mut state = self.state.write().await;
        *state = FlatState {
            vectors,
            texts: texts_file.texts,
            metadata: texts_file.metadata,
        };
        tracing::info!("Loaded {} vectors from {}", count, self.path.display());
        Ok(true)
    }

    fn backend_name(&self) -> &str {
        "flat"
    }
}
