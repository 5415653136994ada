use serde::{Deserialize, Serialize};

/// Entity categories the store knows how to link. Anything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum EntityLabel {
    Developer,
    Platform,
    Genre,
    Other,
}

impl From<&str> for EntityLabel {
    fn from(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "developer" => EntityLabel::Developer,
            "platform" => EntityLabel::Platform,
            "genre" => EntityLabel::Genre,
            _ => EntityLabel::Other,
        }
    }
}

impl From<String> for EntityLabel {
    fn from(label: String) -> Self {
        EntityLabel::from(label.as_str())
    }
}

impl std::fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityLabel::Developer => "Developer",
            EntityLabel::Platform => "Platform",
            EntityLabel::Genre => "Genre",
            EntityLabel::Other => "Other",
        };
        f.write_str(s)
    }
}

/// A labeled span of text found by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub text: String,
    pub label: EntityLabel,
}

impl EntitySpan {
    pub fn new(text: impl Into<String>, label: EntityLabel) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// Envelope the LLM extractor asks the model to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<EntitySpan>,
}
