//! Knowledge-base records.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::policy::ChunkingConfig;

/// One record of the knowledge base: field name to free text.
///
/// Only string values are kept when deserialising, so ids, numbers and nested
/// objects in the source JSON are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Document {
    fields: HashMap<String, String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(name.into(), text.into());
        self
    }

    /// The field's text, if present and not blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Display name: the primary name field, else the fallback field, else the placeholder.
    pub fn entity_name<'a>(&'a self, config: &'a ChunkingConfig) -> &'a str {
        self.get(&config.name_field)
            .or_else(|| self.get(&config.fallback_name_field))
            .unwrap_or(&config.placeholder_name)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let fields = raw
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(text) => Some((name, text)),
                _ => None,
            })
            .collect();
        Ok(Self { fields })
    }
}

impl FromIterator<(String, String)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_keeps_only_strings() {
        let doc: Document = serde_json::from_str(
            r#"{"id": 7, "name_vn": "Rắn hổ mang", "Độc tính": "Rất độc.", "tags": ["a"]}"#,
        )
        .unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("name_vn"), Some("Rắn hổ mang"));
        assert_eq!(doc.get("id"), None);
    }

    #[test]
    fn test_entity_name_fallbacks() {
        let config = ChunkingConfig::default();

        let doc = Document::new()
            .with_field("name_vn", "Rắn lục")
            .with_field("name_en", "Pit viper");
        assert_eq!(doc.entity_name(&config), "Rắn lục");

        let doc = Document::new()
            .with_field("name_vn", "   ")
            .with_field("name_en", "Pit viper");
        assert_eq!(doc.entity_name(&config), "Pit viper");

        let doc = Document::new().with_field("Độc tính", "Có độc.");
        assert_eq!(doc.entity_name(&config), "Unknown");
    }
}
