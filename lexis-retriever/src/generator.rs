//! Answer generation from ranked passages.
//!
//! The pipeline treats the generator as a black box: a question and an ordered
//! passage list go in, text comes out. Failures are turned into a readable
//! message by the pipeline instead of being propagated.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{GeneratorBackend, GeneratorConfig, GOOGLE_API_KEY_ENV};
use crate::error::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation request rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no text")]
    EmptyResponse,
}

/// Produces an answer to `question` from `passages`, best first.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str, passages: &[String]) -> Result<String, GenerationError>;

    fn generator_name(&self) -> &str;
}

/// Build the generator selected in `config`.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn AnswerGenerator>, ConfigError> {
    let generator: Arc<dyn AnswerGenerator> = match config.backend {
        GeneratorBackend::Gemini => Arc::new(GeminiGenerator::from_config(config)?),
        GeneratorBackend::Extractive => Arc::new(ExtractiveGenerator),
    };
    Ok(generator)
}

/// Number the passages as `Context 1: ...`, separated by blank lines.
pub fn format_context(passages: &[String]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, text)| format!("Context {}: {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt asking the model to answer as `persona` without mentioning its sources.
pub fn build_prompt(persona: &str, question: &str, passages: &[String]) -> String {
    format!(
        "You are {persona}. Answer with the confidence of a professional in the field and do not \
         say that your answer comes from provided information, even though it must be grounded in it.\n\n\
         Use the context below to answer the question accurately and completely.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Give a detailed answer. If the context does not hold enough information to answer, say so.\n\n\
         Finish by suggesting a few related follow-up questions the user could ask next.",
        context = format_context(passages),
    )
}

/// Enforces a minimum interval between consecutive calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Wait until the interval since the previous call has passed, then record this call.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!("Rate limiting generator for {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, concatenated.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` over HTTP with thinking disabled.
#[derive(Debug)]
pub struct GeminiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    persona: String,
    limiter: RateLimiter,
}

impl GeminiGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing {
                what: "Gemini API key",
                key: "generator.api_key",
                env: GOOGLE_API_KEY_ENV,
            })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::invalid("generator.endpoint", e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            persona: config.persona.clone(),
            limiter: RateLimiter::new(config.min_interval()),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    /// Send one prompt and return the model's text.
    pub async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        self.limiter.acquire().await;

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed.into_text().ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    async fn generate(&self, question: &str, passages: &[String]) -> Result<String, GenerationError> {
        let prompt = build_prompt(&self.persona, question, passages);
        tracing::debug!(
            "Generating answer with {} from {} passages",
            self.model,
            passages.len()
        );
        self.complete(&prompt).await
    }

    fn generator_name(&self) -> &str {
        &self.model
    }
}

/// Returns the passages themselves, numbered, instead of a generated answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator;

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    async fn generate(&self, _question: &str, passages: &[String]) -> Result<String, GenerationError> {
        Ok(format_context(passages))
    }

    fn generator_name(&self) -> &str {
        "extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_context_numbers_passages() {
        let passages = vec!["a".to_string(), "b".to_string()];
        assert_eq!(format_context(&passages), "Context 1: a\n\nContext 2: b");
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_prompt_contains_question_and_context() {
        let prompt = build_prompt(
            "a snake expert",
            "Rắn lục có độc không?",
            &["Rắn lục có nọc độc.".to_string()],
        );
        assert!(prompt.starts_with("You are a snake expert."));
        assert!(prompt.contains("Context 1: Rắn lục có nọc độc."));
        assert!(prompt.contains("Question: Rắn lục có độc không?"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn test_response_text_extraction() {
        let response: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "Có, "}, {"text": "rất độc."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response.into_text().as_deref(), Some("Có, rất độc."));

        let empty: GenerateContentResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(empty.into_text().is_none());
    }

    #[test]
    fn test_gemini_requires_api_key() {
        let err = GeminiGenerator::from_config(&GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));

        let config = GeneratorConfig {
            api_key: Some("k".to_string()),
            model: "gemini-2.5-flash".to_string(),
            ..GeneratorConfig::default()
        };
        let generator = GeminiGenerator::from_config(&config).unwrap();
        assert_eq!(
            generator.url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_extractive_generator() {
        let generator = build_generator(&GeneratorConfig {
            backend: GeneratorBackend::Extractive,
            ..GeneratorConfig::default()
        })
        .unwrap();
        let answer = generator
            .generate("q", &["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(answer, "Context 1: first\n\nContext 2: second");
        assert_eq!(generator.generator_name(), "extractive");
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
