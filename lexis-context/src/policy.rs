//! Chunk size policies, per field and by default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ChunkError;

/// Unit that a policy's `size` and `overlap` are measured in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Whitespace-delimited words, sliding window.
    Words,
    /// Characters, sentence-aware greedy packing.
    #[default]
    Chars,
}

impl std::fmt::Display for ChunkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkUnit::Words => write!(f, "words"),
            ChunkUnit::Chars => write!(f, "chars"),
        }
    }
}

/// How one field is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChunkPolicy {
    #[serde(default)]
    pub unit: ChunkUnit,
    pub size: usize,
    #[serde(default)]
    pub overlap: usize,
}

impl FieldChunkPolicy {
    pub fn words(size: usize, overlap: usize) -> Self {
        Self {
            unit: ChunkUnit::Words,
            size,
            overlap,
        }
    }

    pub fn chars(size: usize, overlap: usize) -> Self {
        Self {
            unit: ChunkUnit::Chars,
            size,
            overlap,
        }
    }

    /// Checks `size > 0` and `overlap < size`. `label` names the policy in errors.
    pub fn validate(&self, label: &str) -> Result<(), ChunkError> {
        if self.size == 0 {
            return Err(ChunkError::ZeroSize {
                field: label.to_string(),
            });
        }
        if self.overlap >= self.size {
            return Err(ChunkError::OverlapTooLarge {
                field: label.to_string(),
                size: self.size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// Label used for the default policy in error messages.
pub const DEFAULT_POLICY_LABEL: &str = "<default>";

/// Fields of a snake record, in the order they are chunked.
pub const DEFAULT_FIELDS: &[&str] = &[
    "Tên khoa học và tên phổ thông",
    "Phân loại học",
    "Đặc điểm hình thái",
    "Độc tính",
    "Tập tính săn mồi",
    "Hành vi và sinh thái",
    "Phân bố địa lý và môi trường sống",
    "Sinh sản",
    "Tình trạng bảo tồn",
    "Giá trị nghiên cứu",
    "Sự liên quan với con người",
    "Các quan sát thú vị từ các nhà nghiên cứu",
];

/// Word-unit policies tuned to roughly two thirds of each field's average length,
/// with about a quarter of that as overlap. Short fields get a window larger than
/// their average so they usually stay whole.
const DEFAULT_FIELD_POLICIES: &[(&str, usize, usize)] = &[
    ("Triệu chứng khi bị cắn", 300, 80),
    ("Cách xử lý", 300, 80),
    ("Đặc điểm hình thái", 280, 70),
    ("Tên khoa học và tên phổ thông", 200, 50),
    ("Phân bố địa lý và môi trường sống", 150, 40),
    ("Hành vi và sinh thái", 150, 40),
    ("Tập tính săn mồi", 140, 35),
    ("Phân loại học", 130, 35),
    ("Các quan sát thú vị từ các nhà nghiên cứu", 130, 35),
    ("Độc tính", 120, 30),
    ("Sinh sản", 110, 30),
    ("Tình trạng bảo tồn", 150, 30),
    ("Giá trị nghiên cứu", 150, 30),
    ("Sự liên quan với con người", 150, 30),
];

/// Immutable chunking configuration shared by every ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Default size in characters, used by plain chunking and by fields without a policy.
    pub chunk_size: usize,
    /// Default overlap in characters.
    pub chunk_overlap: usize,
    /// When false, `field_policies` is ignored and every field uses the default policy.
    pub field_specific: bool,
    pub field_policies: BTreeMap<String, FieldChunkPolicy>,
    /// Fields chunked per document, in order.
    pub fields: Vec<String>,
    /// Field holding the entity display name.
    pub name_field: String,
    /// Used when `name_field` is missing or empty.
    pub fallback_name_field: String,
    /// Used when neither name field is present.
    pub placeholder_name: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            chunk_overlap: 50,
            field_specific: true,
            field_policies: DEFAULT_FIELD_POLICIES
                .iter()
                .map(|&(field, size, overlap)| {
                    (field.to_string(), FieldChunkPolicy::words(size, overlap))
                })
                .collect(),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            name_field: "name_vn".to_string(),
            fallback_name_field: "name_en".to_string(),
            placeholder_name: "Unknown".to_string(),
        }
    }
}

impl ChunkingConfig {
    /// A configuration with no per-field policies and no field list.
    pub fn plain(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            field_policies: BTreeMap::new(),
            fields: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_field_policy(mut self, field: impl Into<String>, policy: FieldChunkPolicy) -> Self {
        self.field_policies.insert(field.into(), policy);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_field_specific(mut self, enabled: bool) -> Self {
        self.field_specific = enabled;
        self
    }

    /// Character policy built from `chunk_size` / `chunk_overlap`.
    pub fn default_policy(&self) -> FieldChunkPolicy {
        FieldChunkPolicy::chars(self.chunk_size, self.chunk_overlap)
    }

    /// The field's own policy when field-specific chunking is on and one exists,
    /// otherwise the default policy.
    pub fn policy_for(&self, field: Option<&str>) -> FieldChunkPolicy {
        if !self.field_specific {
            return self.default_policy();
        }
        field
            .and_then(|name| self.field_policies.get(name))
            .copied()
            .unwrap_or_else(|| self.default_policy())
    }

    /// Validates the default policy and every per-field policy.
    pub fn validate(&self) -> Result<(), ChunkError> {
        self.default_policy().validate(DEFAULT_POLICY_LABEL)?;
        for (field, policy) in &self.field_policies {
            policy.validate(field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ChunkingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fields.len(), 12);
        assert_eq!(
            config.policy_for(Some("Độc tính")),
            FieldChunkPolicy::words(120, 30)
        );
    }

    #[test]
    fn test_unknown_field_falls_back_to_default_chars() {
        let config = ChunkingConfig::default();
        let policy = config.policy_for(Some("Ghi chú"));
        assert_eq!(policy, FieldChunkPolicy::chars(200, 50));
        assert_eq!(config.policy_for(None), FieldChunkPolicy::chars(200, 50));
    }

    #[test]
    fn test_field_specific_toggle() {
        let config = ChunkingConfig::default().with_field_specific(false);
        assert_eq!(
            config.policy_for(Some("Độc tính")),
            FieldChunkPolicy::chars(200, 50)
        );
    }

    #[test]
    fn test_validation_rejects_bad_policies() {
        let config = ChunkingConfig::plain(100, 100);
        assert_eq!(
            config.validate(),
            Err(ChunkError::OverlapTooLarge {
                field: DEFAULT_POLICY_LABEL.to_string(),
                size: 100,
                overlap: 100,
            })
        );

        let config = ChunkingConfig::plain(100, 10).with_field_policy("x", FieldChunkPolicy::words(0, 0));
        assert_eq!(
            config.validate(),
            Err(ChunkError::ZeroSize {
                field: "x".to_string()
            })
        );
    }

    #[test]
    fn test_policy_table_deserializes() {
        let json = r#"{
            "chunk_size": 300,
            "field_policies": { "Sinh sản": { "unit": "words", "size": 50, "overlap": 10 } },
            "fields": ["Sinh sản"]
        }"#;
        let config: ChunkingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 300);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.fields, vec!["Sinh sản".to_string()]);
        assert_eq!(
            config.policy_for(Some("Sinh sản")),
            FieldChunkPolicy::words(50, 10)
        );
    }
}
