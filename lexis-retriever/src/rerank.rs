//! Second-stage ranking: cross-encoder scores fused with vector similarity.
//!
//! Raw cross-encoder scores are only comparable within one call, so both the
//! relevance scores and the original similarity scores are min-max normalized
//! over the candidate set before they are combined:
//!
//! ```text
//! combined = alpha * norm(relevance) + (1 - alpha) * norm(similarity)
//! ```
//!
//! A score list whose values are all equal is left as it is rather than
//! normalized, so the other term alone decides the order.

use lexis_embed::RelevanceScorer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ConfigError;

/// A passage coming out of vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    /// Similarity score from the index
    pub score: f32,
}

/// A passage after fusion. All four values are kept for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPassage {
    pub text: String,
    pub combined_score: f32,
    /// Min-max normalized cross-encoder score
    pub reranker_score: f32,
    /// Untouched similarity score from the index
    pub original_score: f32,
}

/// Scale `scores` to `[0, 1]`. Returns the input unchanged when every value is equal.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if scores.is_empty() || range <= 0.0 || !range.is_finite() {
        return scores.to_vec();
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

/// Fuse precomputed relevance scores with the candidates' similarity scores.
///
/// `relevance[i]` belongs to `candidates[i]`. Sorting is stable, so ties keep
/// the candidates' original order. A NaN combined score ranks last.
/// `top_k` of `None` keeps everything.
pub fn fuse_scores(
    candidates: &[Candidate],
    relevance: &[f32],
    alpha: f32,
    top_k: Option<usize>,
) -> Vec<RankedPassage> {
    debug_assert_eq!(candidates.len(), relevance.len());

    let original: Vec<f32> = candidates.iter().map(|c| c.score).collect();
    let norm_relevance = min_max_normalize(relevance);
    let norm_original = min_max_normalize(&original);

    let mut ranked: Vec<RankedPassage> = candidates
        .iter()
        .zip(norm_relevance.iter().zip(&norm_original))
        .map(|(candidate, (&ce, &orig))| RankedPassage {
            text: candidate.text.clone(),
            combined_score: alpha * ce + (1.0 - alpha) * orig,
            reranker_score: ce,
            original_score: candidate.score,
        })
        .collect();

    ranked.sort_by(|a, b| sort_key(b.combined_score).total_cmp(&sort_key(a.combined_score)));
    if let Some(k) = top_k {
        ranked.truncate(k);
    }
    ranked
}

fn sort_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

/// Runs a [`RelevanceScorer`] over the candidate pool and fuses the result.
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    alpha: f32,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("scorer", &self.scorer.scorer_name())
            .field("alpha", &self.alpha)
            .finish()
    }
}

impl Reranker {
    /// Fails when `alpha` is not a number in `[0, 1]`.
    pub fn new(scorer: Arc<dyn RelevanceScorer>, alpha: f32) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(ConfigError::invalid(
                "reranking.alpha",
                format!("{alpha} is outside [0, 1]"),
            ));
        }
        Ok(Self { scorer, alpha })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.scorer_name()
    }

    /// Raw scores, one per passage, in input order.
    pub async fn score(&self, query: &str, passages: &[String]) -> lexis_embed::Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        self.scorer.score(query, passages).await
    }

    /// Score, normalize, fuse, sort and truncate. An empty pool never reaches the model.
    pub async fn fuse(
        &self,
        query: &str,
        candidates: &[Candidate],
        top_k: Option<usize>,
    ) -> lexis_embed::Result<Vec<RankedPassage>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let passages: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let relevance = self.score(query, &passages).await?;
        if relevance.len() != candidates.len() {
            return Err(lexis_embed::EmbedError::scoring(anyhow::anyhow!(
                "scorer returned {} scores for {} passages",
                relevance.len(),
                candidates.len()
            )));
        }
        if let Some(position) = relevance.iter().position(|s| !s.is_finite()) {
            return Err(lexis_embed::EmbedError::scoring(anyhow::anyhow!(
                "scorer returned {} for passage {}",
                relevance[position],
                position
            )));
        }

        let ranked = fuse_scores(candidates, &relevance, self.alpha, top_k);
        tracing::debug!(
            "Fused {} candidates into {} passages (alpha {})",
            candidates.len(),
            ranked.len(),
            self.alpha
        );
        Ok(ranked)
    }
}
