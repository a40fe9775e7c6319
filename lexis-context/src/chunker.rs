//! Field-aware chunking of knowledge-base records.
//!
//! The chunker turns normalised text into bounded passages that are embedded
//! and stored one vector per chunk. It has two independent entry points:
//!
//! - [`Chunker::chunk_text`]: plain sentence-aware character chunking using the
//!   default size and overlap, with no context prefix.
//! - [`Chunker::chunk_field`]: chunking of one field of one record, using the
//!   field's [`FieldChunkPolicy`] and prefixing every chunk with
//!   `"<entity> - <field>: "` so a passage still names its subject once it is
//!   retrieved out of context.
//!
//! [`Chunker::chunk_documents`] walks records in input order, fields in the
//! configured order and emits chunks in generation order. That order is
//! reproducible and becomes the index sequence downstream.
//!
//! # Character unit
//!
//! Sentences (split after `.`, `!` or `?` followed by whitespace) are packed
//! greedily into a buffer. When the next sentence does not fit, the buffer is
//! closed and the next one is seeded with the last `overlap` characters of the
//! closed chunk. A sentence that is longer than the budget on its own is cut
//! on word boundaries without overlap; a single word longer than the budget is
//! cut on character boundaries. With a prefix, the budget shrinks by the
//! prefix length, so `prefix + body` never exceeds `size` characters.
//!
//! # Word unit
//!
//! A window of `size` words slides forward by `size - overlap` words, so
//! consecutive chunks share exactly `overlap` words. The prefix is not counted.
//!
//! ```
//! use lexis_context::{Chunker, ChunkingConfig, Document, FieldChunkPolicy};
//!
//! let config = ChunkingConfig::plain(200, 50)
//!     .with_field_policy("Độc tính", FieldChunkPolicy::words(120, 30))
//!     .with_fields(["Độc tính"]);
//! let chunker = Chunker::new(config).unwrap();
//!
//! let text = (0..170).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
//! let doc = Document::new()
//!     .with_field("name_vn", "Rắn lục")
//!     .with_field("Độc tính", text);
//!
//! let chunks = chunker.chunk_documents(&[doc]).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert!(chunks[0].text.starts_with("Rắn lục - Độc tính: w0 "));
//! assert!(chunks[1].body().starts_with("w90 "));
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::document::Document;
use crate::error::{ChunkError, Result};
use crate::policy::{ChunkUnit, ChunkingConfig, FieldChunkPolicy};
use crate::text::{char_len, normalize_text, split_chars, split_sentences, tail_chars};

/// A bounded passage derived from one field of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Full passage, prefix included. This is what gets embedded and stored.
    pub text: String,
    /// Display name of the source record, when chunked field-aware.
    pub entity: Option<String>,
    /// Source field name, when chunked field-aware.
    pub field: Option<String>,
    /// Position of this chunk within its source field (0-indexed).
    pub sequence: usize,
    /// Byte length of the context prefix at the start of `text`.
    #[serde(default)]
    pub prefix_len: usize,
}

impl Chunk {
    /// The chunk text without its context prefix.
    pub fn body(&self) -> &str {
        &self.text[self.prefix_len..]
    }

    /// The context prefix, empty for plain chunks.
    pub fn prefix(&self) -> &str {
        &self.text[..self.prefix_len]
    }
}

/// Length statistics over a set of chunks, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkStats {
    pub count: usize,
    pub average_chars: f64,
    pub max_chars: usize,
    pub min_chars: usize,
}

impl ChunkStats {
    /// `None` when there are no chunks.
    pub fn from_chunks(chunks: &[Chunk]) -> Option<Self> {
        let lengths: Vec<usize> = chunks.iter().map(|c| char_len(&c.text)).collect();
        let max_chars = *lengths.iter().max()?;
        let min_chars = *lengths.iter().min()?;
        let total: usize = lengths.iter().sum();
        Some(Self {
            count: lengths.len(),
            average_chars: total as f64 / lengths.len() as f64,
            max_chars,
            min_chars,
        })
    }
}

/// Splits text and records into chunks according to an immutable [`ChunkingConfig`].
#[derive(Debug, Clone)]
pub struct Chunker {
    config: Arc<ChunkingConfig>,
}

impl Chunker {
    /// Validates every policy in `config` and builds a chunker.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        Self::from_shared(Arc::new(config))
    }

    /// Same as [`Chunker::new`] for a configuration already shared elsewhere.
    pub fn from_shared(config: Arc<ChunkingConfig>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Plain chunking: normalise, then sentence-aware character packing with the
    /// default size and overlap. No prefix, no entity or field attribution.
    pub fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        let normalized = normalize_text(text);
        pack_sentences(&normalized, self.config.chunk_size, self.config.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(sequence, text)| Chunk {
                text,
                entity: None,
                field: None,
                sequence,
                prefix_len: 0,
            })
            .collect()
    }

    /// Chunks one field of one record.
    ///
    /// The prefix `"<entity> - <field>: "` is added only when both names are
    /// given and non-empty. Fails with [`ChunkError::PrefixTooLong`] when a
    /// character-unit policy has no room left after the prefix.
    pub fn chunk_field(
        &self,
        text: &str,
        entity: Option<&str>,
        field: Option<&str>,
    ) -> Result<Vec<Chunk>> {
        let normalized = normalize_text(text);
        let policy = self.config.policy_for(field);

        let prefix = match (entity, field) {
            (Some(entity), Some(field)) if !entity.is_empty() && !field.is_empty() => {
                format!("{entity} - {field}: ")
            }
            _ => String::new(),
        };

        let bodies = match policy.unit {
            ChunkUnit::Words => window_words(&normalized, policy),
            ChunkUnit::Chars => {
                let budget = policy
                    .size
                    .checked_sub(char_len(&prefix))
                    .filter(|budget| *budget > 0)
                    .ok_or_else(|| ChunkError::PrefixTooLong {
                        prefix: prefix.clone(),
                        size: policy.size,
                    })?;
                pack_sentences(&normalized, budget, policy.overlap)
            }
        };

        Ok(bodies
            .into_iter()
            .enumerate()
            .map(|(sequence, body)| Chunk {
                text: format!("{prefix}{body}"),
                entity: entity.map(str::to_string),
                field: field.map(str::to_string),
                sequence,
                prefix_len: prefix.len(),
            })
            .collect())
    }

    /// Chunks every configured field of every record.
    pub fn chunk_documents(&self, documents: &[Document]) -> Result<Vec<Chunk>> {
        self.chunk_documents_with_fields(documents, &self.config.fields)
    }

    /// Chunks the given fields of every record.
    ///
    /// Output order: records in input order, fields in `fields` order, chunks in
    /// generation order. Missing or blank fields are skipped.
    pub fn chunk_documents_with_fields(
        &self,
        documents: &[Document],
        fields: &[String],
    ) -> Result<Vec<Chunk>> {
        let mut all_chunks = Vec::new();

        for document in documents {
            let entity = document.entity_name(&self.config);
            for field in fields {
                let Some(text) = document.get(field) else {
                    continue;
                };
                let chunks = self.chunk_field(text, Some(entity), Some(field))?;
                all_chunks.extend(chunks);
            }
        }

        Ok(all_chunks)
    }
}

/// Sliding word window. `policy` has already been validated, so the step is positive.
fn window_words(text: &str, policy: FieldChunkPolicy) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let step = policy.size - policy.overlap;

    (0..words.len())
        .step_by(step)
        .map(|start| {
            let end = (start + policy.size).min(words.len());
            words[start..end].join(" ")
        })
        .collect()
}

/// Greedy sentence packing into chunks of at most `budget` characters.
fn pack_sentences(text: &str, budget: usize, overlap: usize) -> Vec<String> {
    let mut packer = SentencePacker::new(budget, overlap);
    for sentence in split_sentences(text) {
        packer.push_sentence(sentence);
    }
    packer.finish()
}

struct SentencePacker {
    budget: usize,
    overlap: usize,
    chunks: Vec<String>,
    buffer: String,
    buffer_chars: usize,
}

impl SentencePacker {
    fn new(budget: usize, overlap: usize) -> Self {
        Self {
            budget,
            overlap,
            chunks: Vec::new(),
            buffer: String::new(),
            buffer_chars: 0,
        }
    }

    fn push_sentence(&mut self, sentence: &str) {
        let sentence_chars = char_len(sentence);

        if self.buffer.is_empty() {
            if sentence_chars > self.budget {
                self.split_oversized(sentence);
            } else {
                self.set_buffer(sentence.to_string(), sentence_chars);
            }
            return;
        }

        // +1 for the joining space
        if self.buffer_chars + 1 + sentence_chars <= self.budget {
            self.buffer.push(' ');
            self.buffer.push_str(sentence);
            self.buffer_chars += 1 + sentence_chars;
            return;
        }

        let closed = self.close_buffer();

        if sentence_chars > self.budget {
            self.split_oversized(sentence);
            return;
        }

        // The overlap shrinks when the full tail plus the sentence would not fit.
        let room = self.budget - sentence_chars;
        let keep = self.overlap.min(room.saturating_sub(1));
        let tail = tail_chars(&closed, keep).trim_start();

        if tail.is_empty() {
            self.set_buffer(sentence.to_string(), sentence_chars);
        } else {
            let seeded = format!("{tail} {sentence}");
            let seeded_chars = char_len(tail) + 1 + sentence_chars;
            self.set_buffer(seeded, seeded_chars);
        }
    }

    /// Word-boundary packing for a sentence longer than the budget. The last
    /// partial piece stays in the buffer so following sentences can join it.
    fn split_oversized(&mut self, sentence: &str) {
        let mut piece = String::new();
        let mut piece_chars = 0;

        for word in sentence.split_whitespace() {
            let word_chars = char_len(word);

            if word_chars > self.budget {
                if !piece.is_empty() {
                    self.chunks.push(std::mem::take(&mut piece));
                    piece_chars = 0;
                }
                self.chunks.extend(split_chars(word, self.budget));
                continue;
            }

            if piece.is_empty() {
                piece.push_str(word);
                piece_chars = word_chars;
            } else if piece_chars + 1 + word_chars <= self.budget {
                piece.push(' ');
                piece.push_str(word);
                piece_chars += 1 + word_chars;
            } else {
                self.chunks.push(std::mem::take(&mut piece));
                piece.push_str(word);
                piece_chars = word_chars;
            }
        }

        self.set_buffer(piece, piece_chars);
    }

    fn set_buffer(&mut self, text: String, chars: usize) {
        self.buffer = text;
        self.buffer_chars = chars;
    }

    fn close_buffer(&mut self) -> String {
        let closed = std::mem::take(&mut self.buffer);
        self.buffer_chars = 0;
        let trimmed = closed.trim().to_string();
        if !trimmed.is_empty() {
            self.chunks.push(trimmed.clone());
        }
        trimmed
    }

    fn finish(mut self) -> Vec<String> {
        self.close_buffer();
        self.chunks.retain(|chunk| !chunk.trim().is_empty());
        self.chunks
    }
}
