//! Behaviour every `VectorIndex` backend must share, exercised on the flat index
//!
//! The Qdrant backend is covered by the ignored live test in `src/index/qdrant.rs`.

use anyhow::Result;
use lexis_retriever::index::flat::FlatIndex;
use lexis_retriever::{ChunkMetadata, IndexError, VectorIndex};
use std::sync::Arc;
use tempfile::tempdir;

const DIM: usize = 8;

/// Unit-ish vectors pointing mostly along axis `i`.
fn vector(i: usize) -> Vec<f32> {
    let mut v = vec![0.1; DIM];
    v[i % DIM] = 1.0 + i as f32 * 0.01;
    v
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("chunk {i}")).collect()
}

async fn filled(dir: &std::path::Path, n: usize) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = Arc::new(FlatIndex::new(DIM, dir.join("contract")));
    index
        .add((0..n).map(vector).collect(), texts(n), None)
        .await?;
    Ok(index)
}

#[tokio::test]
async fn test_added_vector_is_its_own_nearest_neighbour() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 6).await?;

    for i in 0..6 {
        let hits = index.search(&vector(i), 3).await?;
        assert_eq!(hits[0].text, format!("chunk {i}"));
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].rank, 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_scores_are_cosine_regardless_of_magnitude() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 4).await?;

    let scaled: Vec<f32> = vector(2).iter().map(|x| x * 40.0).collect();
    let hits = index.search(&scaled, 4).await?;
    assert_eq!(hits[0].text, "chunk 2");
    for hit in &hits {
        assert!((-1.0..=1.0 + 1e-5).contains(&hit.score));
    }
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    Ok(())
}

#[tokio::test]
async fn test_k_larger_than_count_returns_everything() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 3).await?;

    let hits = index.search(&vector(0), 50).await?;
    assert_eq!(hits.len(), 3);
    assert_eq!(
        hits.iter().map(|h| h.rank).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_index_and_reset() -> Result<()> {
    let dir = tempdir()?;
    let index: Arc<dyn VectorIndex> = Arc::new(FlatIndex::new(DIM, dir.path().join("empty")));
    assert!(index.search(&vector(0), 5).await?.is_empty());

    let index = filled(dir.path(), 3).await?;
    index.reset().await?;
    index.reset().await?;
    assert!(index.search(&vector(0), 5).await?.is_empty());
    assert_eq!(index.stats().await?.total, 0);
    Ok(())
}

#[tokio::test]
async fn test_ids_continue_across_batches() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 2).await?;
    index
        .add(
            vec![vector(5)],
            vec!["late".to_string()],
            Some(vec![ChunkMetadata {
                entity: Some("Rắn lục".to_string()),
                field: Some("Độc tính".to_string()),
                sequence: 0,
            }]),
        )
        .await?;

    assert_eq!(index.stats().await?.total, 3);
    let hits = index.search(&vector(5), 1).await?;
    assert_eq!(hits[0].text, "late");
    assert_eq!(
        hits[0].metadata.as_ref().and_then(|m| m.field.as_deref()),
        Some("Độc tính")
    );
    Ok(())
}

#[tokio::test]
async fn test_malformed_batches_are_rejected_whole() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 2).await?;

    let err = index
        .add(vec![vector(0), vec![1.0; DIM + 1]], texts(2), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));

    let err = index.add(vec![vector(0)], texts(2), None).await.unwrap_err();
    assert!(matches!(err, IndexError::LengthMismatch { .. }));

    assert_eq!(index.stats().await?.total, 2);
    Ok(())
}

#[tokio::test]
async fn test_persist_then_load_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 5).await?;
    index.persist().await?;
    let query = vector(3);
    let before: Vec<_> = index.search(&query, 3).await?;

    let reloaded = FlatIndex::new(DIM, dir.path().join("contract"));
    assert!(reloaded.load().await?);
    assert_eq!(reloaded.stats().await?.total, 5);
    assert_eq!(reloaded.search(&query, 3).await?, before);

    // Loading twice changes nothing
    assert!(reloaded.load().await?);
    assert_eq!(reloaded.search(&query, 3).await?, before);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_search_never_sees_a_partial_batch() -> Result<()> {
    let dir = tempdir()?;
    let index: Arc<dyn VectorIndex> = Arc::new(FlatIndex::new(DIM, dir.path().join("busy")));
    const BATCH: usize = 16;

    let writer = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..20 {
                index
                    .add((0..BATCH).map(vector).collect(), texts(BATCH), None)
                    .await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, IndexError>(())
        })
    };

    let reader = {
        let index = Arc::clone(&index);
        tokio::spawn(async move {
            for _ in 0..50 {
                let total = index.search(&vector(0), usize::MAX).await?.len();
                assert_eq!(total % BATCH, 0, "observed {total} vectors");
                tokio::task::yield_now().await;
            }
            Ok::<_, IndexError>(())
        })
    };

    writer.await??;
    reader.await??;
    assert_eq!(index.stats().await?.total, 20 * BATCH);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_persists_leave_the_latest_consistent_pair() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("racing");

    for round in 0..5 {
        let index = Arc::new(FlatIndex::new(DIM, path.clone()));
        let writers: Vec<_> = (1..=8)
            .map(|n| {
                let index = Arc::clone(&index);
                tokio::spawn(async move {
                    index.add((0..n).map(vector).collect(), texts(n), None).await?;
                    index.persist().await
                })
            })
            .collect();
        for writer in writers {
            writer.await??;
        }

        let live = index.stats().await?.total;
        assert_eq!(live, (1..=8).sum::<usize>());

        let reloaded = FlatIndex::new(DIM, path.clone());
        assert!(reloaded.load().await?, "round {round}: nothing to load");
        assert_eq!(reloaded.stats().await?.total, live, "round {round}");
        assert_eq!(
            reloaded.search(&vector(0), usize::MAX).await?.len(),
            live,
            "round {round}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_non_finite_input_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let index = filled(dir.path(), 3).await?;

    let mut poisoned = vector(1);
    poisoned[2] = f32::NAN;
    let err = index
        .add(vec![vector(0), poisoned], texts(2), None)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NonFinite { position: 1, .. }));
    assert_eq!(index.stats().await?.total, 3);

    let mut query = vector(0);
    query[0] = f32::INFINITY;
    assert!(matches!(
        index.search(&query, 2).await,
        Err(IndexError::NonFinite { .. })
    ));
    Ok(())
}
