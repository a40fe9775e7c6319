//! Deterministic stand-ins for the embedding model, cross-encoder and answer model.

#![allow(dead_code)]

use async_trait::async_trait;
use lexis_embed::{EmbedError, EmbeddingProvider, EmbeddingResult, RelevanceScorer, normalize_l2};
use lexis_retriever::generator::{AnswerGenerator, GenerationError};
use lexis_retriever::index::flat::FlatIndex;
use lexis_retriever::{GeneratorBackend, RagPipeline, RetrieverConfig};
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const DIM: usize = 64;

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Hashed bag of words. Texts sharing words get similar vectors.
pub fn bag_of_words(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimension];
    vector[0] = 0.01;
    for token in tokens(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() % dimension as u64) as usize] += 1.0;
    }
    normalize_l2(&mut vector);
    vector
}

#[derive(Debug, Default)]
pub struct HashEmbedder {
    pub dimension: usize,
    pub passage_batches: AtomicUsize,
    pub queries: AtomicUsize,
    /// Fail every passage batch after this many have succeeded
    pub fail_after_batches: Option<usize>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DIM,
            ..Self::default()
        }
    }

    pub fn failing_after(batches: usize) -> Self {
        Self {
            fail_after_batches: Some(batches),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.passage_batches.load(Ordering::SeqCst) + self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_passages(&self, texts: &[String]) -> lexis_embed::Result<EmbeddingResult> {
        let done = self.passage_batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_batches.is_some_and(|limit| done >= limit) {
            return Err(EmbedError::embedding_gen(anyhow::anyhow!("backend overloaded")));
        }
        Ok(EmbeddingResult::new(
            texts
                .iter()
                .map(|t| bag_of_words(t, self.dimension))
                .collect(),
        ))
    }

    async fn embed_query(&self, text: &str) -> lexis_embed::Result<Vec<f32>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(bag_of_words(text, self.dimension))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

/// Counts query words present in the passage.
#[derive(Debug, Default)]
pub struct KeywordScorer {
    pub calls: AtomicUsize,
}

impl KeywordScorer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelevanceScorer for KeywordScorer {
    async fn score(&self, query: &str, passages: &[String]) -> lexis_embed::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query: HashSet<String> = tokens(query).collect();
        Ok(passages
            .iter()
            .map(|p| tokens(p).filter(|t| query.contains(t)).count() as f32)
            .collect())
    }

    fn scorer_name(&self) -> &str {
        "keyword"
    }
}

/// Records the passages it receives and answers with their count.
#[derive(Debug, Default)]
pub struct RecordingGenerator {
    pub seen: Mutex<Vec<Vec<String>>>,
}

impl RecordingGenerator {
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn generate(&self, _question: &str, passages: &[String]) -> Result<String, GenerationError> {
        self.seen.lock().unwrap().push(passages.to_vec());
        Ok(format!("answer from {} passages", passages.len()))
    }

    fn generator_name(&self) -> &str {
        "recording"
    }
}

#[derive(Debug, Default)]
pub struct FailingGenerator;

#[async_trait]
impl AnswerGenerator for FailingGenerator {
    async fn generate(&self, _question: &str, _passages: &[String]) -> Result<String, GenerationError> {
        Err(GenerationError::Status {
            status: 503,
            body: "model overloaded".to_string(),
        })
    }

    fn generator_name(&self) -> &str {
        "failing"
    }
}

pub fn test_config(dir: &Path) -> RetrieverConfig {
    RetrieverConfig::default()
        .with_vector_dimension(DIM)
        .with_index_path(dir.join("index"))
        .with_generator_backend(GeneratorBackend::Extractive)
}

pub struct Harness {
    pub pipeline: RagPipeline,
    pub embedder: Arc<HashEmbedder>,
    pub scorer: Arc<KeywordScorer>,
    pub index: Arc<FlatIndex>,
}

/// A pipeline over a flat index in `dir`, with a keyword scorer attached.
pub fn harness(
    config: RetrieverConfig,
    embedder: HashEmbedder,
    generator: Arc<dyn AnswerGenerator>,
) -> Harness {
    let embedder = Arc::new(embedder);
    let scorer = Arc::new(KeywordScorer::default());
    let index = Arc::new(FlatIndex::new(config.vector_dimension, config.index.path.clone()));
    let pipeline = RagPipeline::new(
        Arc::new(config),
        embedder.clone(),
        index.clone(),
        generator,
    )
    .unwrap()
    .with_scorer(scorer.clone())
    .unwrap();

    Harness {
        pipeline,
        embedder,
        scorer,
        index,
    }
}

/// Snake facts, one topic each.
pub fn snake_texts() -> Vec<String> {
    [
        "Rắn hổ mang chúa là loài rắn độc dài nhất thế giới. Nọc độc của nó tấn công hệ thần kinh.",
        "Trăn gấm không có nọc độc. Trăn siết chặt con mồi cho đến khi ngạt thở.",
        "Rắn lục đuôi đỏ sống trên cây ở rừng nhiệt đới. Nọc độc gây chảy máu và sưng tấy.",
        "Rắn ráo trâu chạy rất nhanh và ăn chuột đồng. Loài này không có nọc độc.",
        "Rắn cạp nia hoạt động về đêm. Nọc độc thần kinh của cạp nia rất mạnh.",
        "Rắn biển sống ở vùng nước mặn ven bờ. Chúng thở bằng phổi và phải ngoi lên mặt nước.",
        "Rắn nước thường sống gần ao hồ và ăn ếch nhái. Rắn nước không nguy hiểm cho người.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `count` distinct words, `w0 w1 ...`.
pub fn numbered_words(count: usize) -> String {
    (0..count)
        .map(|i| format!("w{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
