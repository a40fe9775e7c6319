//! Qdrant-backed vector index over the REST API.
//!
//! One collection holds every chunk; the chunk text and metadata travel in the
//! point payload. Every point gets a random UUID id, so concurrent writers
//! and other processes never overwrite each other's points. The payload also
//! records an insertion `position` continuing from the collection's exact
//! point count. Uploads are split into batches of
//! `upload_batch_size` points, each sent with `wait=true` so it is committed
//! as a whole before the call returns, and retried with exponential backoff on
//! transient failures.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use super::retry::{AttemptError, RetryPolicy};
use super::{
    ChunkMetadata, IndexStats, Result, SearchHit, VectorIndex, check_batch, check_query, normalized,
};
use crate::config::IndexConfig;
use crate::error::{ConfigError, IndexError};

/// Remote index stored in one Qdrant collection.
#[derive(Debug)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    dimension: usize,
    upload_batch_size: usize,
    batch_pause: Duration,
    retry: RetryPolicy,
    /// Serializes writers in this process so positions stay contiguous
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PointPayload {
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Serialize)]
struct UpsertPoints<'a> {
    points: &'a [Point],
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Serialize)]
struct CountRequest {
    exact: bool,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
    #[serde(default)]
    config: Option<CollectionConfig>,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    // Named vector configurations are not used here and fail to match.
    #[serde(default)]
    vectors: Option<serde_json::Value>,
}

impl CollectionInfo {
    fn vector_size(&self) -> Option<usize> {
        let vectors = self.config.as_ref()?.params.vectors.as_ref()?;
        let params: VectorParams = serde_json::from_value(vectors.clone()).ok()?;
        Some(params.size)
    }
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        AttemptError::Transient(err.to_string())
    } else {
        AttemptError::Fatal(err.into())
    }
}

/// Turn a failed single-shot attempt into an index error.
fn single_attempt(operation: &str, err: AttemptError) -> IndexError {
    match err {
        AttemptError::Fatal(err) => err,
        AttemptError::Transient(message) => IndexError::RetriesExhausted {
            operation: operation.to_string(),
            attempts: 1,
            message,
        },
    }
}

fn build_points(
    first_position: u64,
    vectors: &[Vec<f32>],
    texts: &[String],
    metadata: Option<&[ChunkMetadata]>,
) -> Vec<Point> {
    vectors
        .iter()
        .zip(texts)
        .enumerate()
        .map(|(i, (vector, text))| {
            let meta = metadata.and_then(|m| m.get(i));
            Point {
                id: uuid::Uuid::new_v4().to_string(),
                vector: normalized(vector),
                payload: PointPayload {
                    text: text.clone(),
                    entity: meta.and_then(|m| m.entity.clone()),
                    field: meta.and_then(|m| m.field.clone()),
                    sequence: meta.map(|m| m.sequence),
                    position: Some(first_position + i as u64),
                },
            }
        })
        .collect()
}

fn into_hits(points: Vec<ScoredPoint>) -> Vec<SearchHit> {
    points
        .into_iter()
        .filter_map(|point| point.payload.map(|payload| (point.score, payload)))
        .enumerate()
        .map(|(rank, (score, payload))| {
            let metadata = (payload.entity.is_some()
                || payload.field.is_some()
                || payload.sequence.is_some())
            .then(|| ChunkMetadata {
                entity: payload.entity,
                field: payload.field,
                sequence: payload.sequence.unwrap_or(0),
            });
            SearchHit {
                text: payload.text,
                score,
                rank,
                metadata,
            }
        })
        .collect()
}

impl QdrantIndex {
    pub fn from_config(config: &IndexConfig, dimension: usize) -> std::result::Result<Self, ConfigError> {
        let url = config
            .qdrant_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing {
                what: "Qdrant URL",
                key: "index.qdrant_url",
                env: crate::config::QDRANT_URL_ENV,
            })?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = config.qdrant_api_key.as_deref() {
            let value = HeaderValue::from_str(api_key.trim())
                .map_err(|e| ConfigError::invalid("index.qdrant_api_key", e.to_string()))?;
            headers.insert("api-key", value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::invalid("index.qdrant_url", e.to_string()))?;

        Ok(Self {
            client,
            base_url: url.trim().trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dimension,
            upload_batch_size: config.upload_batch_size.max(1),
            batch_pause: config.batch_pause(),
            retry: RetryPolicy::new(config.max_retries, config.retry_base_delay()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send once and classify the outcome.
    async fn execute(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> std::result::Result<Response, AttemptError> {
        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        if should_retry(status) {
            Err(AttemptError::Transient(format!("{status}: {body}")))
        } else {
            Err(AttemptError::Fatal(IndexError::Backend {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            }))
        }
    }

    /// `None` when the collection does not exist.
    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let operation = "get collection";
        let request = self.request(Method::GET, self.collection_url());
        match self.execute(operation, request).await {
            Ok(response) => {
                let info: QdrantResponse<CollectionInfo> = response.json().await?;
                Ok(Some(info.result))
            }
            Err(AttemptError::Fatal(IndexError::Backend { status: 404, .. })) => Ok(None),
            Err(err) => Err(single_attempt(operation, err)),
        }
    }

    /// Exact number of stored points, `None` when the collection does not exist.
    async fn exact_count(&self) -> Result<Option<u64>> {
        let operation = "count points";
        let request = self
            .request(Method::POST, format!("{}/points/count", self.collection_url()))
            .json(&CountRequest { exact: true });
        match self.execute(operation, request).await {
            Ok(response) => {
                let counted: QdrantResponse<CountResult> = response.json().await?;
                Ok(Some(counted.result.count))
            }
            Err(AttemptError::Fatal(IndexError::Backend { status: 404, .. })) => Ok(None),
            Err(err) => Err(single_attempt(operation, err)),
        }
    }

    async fn create_collection(&self) -> Result<()> {
        let body = CreateCollection {
            vectors: VectorParams {
                size: self.dimension,
                distance: "Cosine".to_string(),
            },
        };
        let body = &body;
        self.retry
            .run("create collection", || async move {
                let request = self.request(Method::PUT, self.collection_url()).json(body);
                self.execute("create collection", request).await.map(|_| ())
            })
            .await?;
        tracing::info!(
            "Created Qdrant collection {} (dimension {})",
            self.collection,
            self.dimension
        );
        Ok(())
    }

    /// Make sure the collection exists and return its exact point count.
    async fn ensure_collection(&self) -> Result<u64> {
        match self.collection_info().await? {
            Some(info) => {
                if let Some(size) = info.vector_size() {
                    if size != self.dimension {
                        return Err(IndexError::dimension(self.dimension, size));
                    }
                }
                Ok(self.exact_count().await?.unwrap_or(0))
            }
            None => {
                self.create_collection().await?;
                Ok(0)
            }
        }
    }

    async fn upsert_batch(&self, batch_no: usize, points: &[Point]) -> Result<()> {
        let operation_name = format!("upsert batch {batch_no}");
        let operation = operation_name.as_str();
        let url = format!("{}/points?wait=true", self.collection_url());
        let url = url.as_str();
        let body = &UpsertPoints { points };
        self.retry
            .run(operation, || async move {
                let request = self.request(Method::PUT, url.to_string()).json(body);
                self.execute(operation, request).await.map(|_| ())
            })
            .await
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let operation = "delete collection";
        let request = self.request(Method::DELETE, self.collection_url());
        match self.execute(operation, request).await {
            Ok(_) => tracing::info!("Deleted Qdrant collection {}", self.collection),
            Err(AttemptError::Fatal(IndexError::Backend { status: 404, .. })) => {
                tracing::debug!("Qdrant collection {} did not exist", self.collection)
            }
            Err(err) => return Err(single_attempt(operation, err)),
        }

        self.create_collection().await
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

        let _guard = self.write_lock.lock().await;
        let first_position = self.ensure_collection().await?;
        let points = build_points(first_position, &vectors, &texts, metadata.as_deref());
        let total_batches = points.len().div_ceil(self.upload_batch_size);

        tracing::info!(
            "Uploading {} points to {} in {} batches",
            points.len(),
            self.collection,
            total_batches
        );

        for (batch_no, batch) in points.chunks(self.upload_batch_size).enumerate() {
            if batch_no > 0 && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
            self.upsert_batch(batch_no + 1, batch).await?;
            tracing::debug!(
                "Uploaded batch {}/{} ({} points)",
                batch_no + 1,
                total_batches,
                batch.len()
            );
        }

        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        check_query(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let operation = "search";
        let query = normalized(query);
        let body = SearchRequest {
            vector: &query,
            limit: k,
            with_payload: true,
        };
        let request = self
            .request(Method::POST, format!("{}/points/search", self.collection_url()))
            .json(&body);

        match self.execute(operation, request).await {
            Ok(response) => {
                let points: QdrantResponse<Vec<ScoredPoint>> = response.json().await?;
                Ok(into_hits(points.result))
            }
            // A collection that was never created holds zero vectors.
            Err(AttemptError::Fatal(IndexError::Backend { status: 404, .. })) => Ok(Vec::new()),
            Err(err) => Err(single_attempt(operation, err)),
        }
    }

    async fn stats(&self) -> Result<IndexStats> {
        let total = self.exact_count().await?.unwrap_or(0);
        Ok(IndexStats {
            total: total as usize,
            dimension: self.dimension,
            backend: self.backend_name().to_string(),
            location: self.collection.clone(),
        })
    }

    async fn persist(&self) -> Result<()> {
        // Upserts are committed with wait=true.
        Ok(())
    }

    async fn load(&self) -> Result<bool> {
        match self.collection_info().await? {
            Some(info) => {
                if let Some(size) = info.vector_size() {
                    if size != self.dimension {
                        return Err(IndexError::dimension(self.dimension, size));
                    }
                }
                let count = info.points_count.unwrap_or(0);
                tracing::info!("Qdrant collection {} holds {} points", self.collection, count);
                Ok(count > 0)
            }
            None => {
                tracing::info!("Qdrant collection {} does not exist", self.collection);
                Ok(false)
            }
        }
    }

    fn backend_name(&self) -> &str {
        "qdrant"
    }
}
