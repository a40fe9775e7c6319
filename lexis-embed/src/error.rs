//! Error types for the embedding and scoring adapters

/// Result type for embedding and scoring operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all model-backed operations.
///
/// Covers configuration problems detected before a model is loaded, failures
/// while loading a model, and failures while embedding or scoring text.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The model identifier is not one of the models the backend can load
    #[error("Unsupported model: {model}")]
    UnsupportedModel { model: String },

    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during relevance scoring
    #[error("Relevance scoring failed: {source}")]
    Scoring {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO errors when preparing the model cache directory
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Wrap a failure that happened while loading a model.
    pub fn model_init(source: anyhow::Error) -> Self {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    /// Wrap a failure that happened while embedding text.
    pub fn embedding_gen(source: anyhow::Error) -> Self {
        Self::EmbeddingGeneration {
            source: source.into(),
        }
    }

    /// Wrap a failure that happened while scoring query/passage pairs.
    pub fn scoring(source: anyhow::Error) -> Self {
        Self::Scoring {
            source: source.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn unsupported_model<S: Into<String>>(model: S) -> Self {
        Self::UnsupportedModel {
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EmbedError::unsupported_model("acme/none");
        assert_eq!(err.to_string(), "Unsupported model: acme/none");

        let err = EmbedError::embedding_gen(anyhow::anyhow!("onnx exploded"));
        assert_eq!(err.to_string(), "Embedding generation failed: onnx exploded");
        assert!(std::error::Error::source(&err).is_some());
    }
}
