//! Error types for chunking

/// Result type for chunking operations.
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Invalid chunking configuration, detected before any text is cut.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    /// A policy with `size == 0`
    #[error("chunk size must be greater than zero (policy: {field})")]
    ZeroSize { field: String },

    /// A policy whose overlap would stall the window
    #[error("chunk overlap {overlap} must be smaller than chunk size {size} (policy: {field})")]
    OverlapTooLarge {
        field: String,
        size: usize,
        overlap: usize,
    },

    /// The `"<entity> - <field>: "` prefix alone fills a character-unit chunk
    #[error("context prefix {prefix:?} leaves no room in a {size}-character chunk")]
    PrefixTooLong { prefix: String, size: usize },
}
