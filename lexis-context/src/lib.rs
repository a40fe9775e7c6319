pub mod chunker;
pub mod document;
pub mod error;
pub mod policy;
pub mod text;

// Re-export the chunking entry points for external use
pub use chunker::{Chunk, ChunkStats, Chunker};
pub use document::Document;
pub use error::{ChunkError, Result};
pub use policy::{ChunkUnit, ChunkingConfig, DEFAULT_FIELDS, FieldChunkPolicy};
pub use text::normalize_text;
