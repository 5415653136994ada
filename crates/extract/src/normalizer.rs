use regex::Regex;
use std::sync::LazyLock;

use crate::schema::EntitySpan;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static EDGE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[\s"'“”‘’(\[,;:]+|[\s"'“”‘’)\],;:]+$"#).unwrap());

/// Cleans span text so that exact-name lookups in the store line up.
///
/// Case and inner punctuation are preserved ("Apple Inc." stays as is); only
/// surrounding quotes, brackets and separators are stripped and runs of
/// whitespace collapsed.
pub struct EntityNormalizer;

impl EntityNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, name: &str) -> String {
        let collapsed = WHITESPACE.replace_all(name, " ");
        EDGE_PUNCTUATION.replace_all(&collapsed, "").to_string()
    }

    /// Normalize every span in place, dropping the ones that end up empty.
    pub fn normalize_spans(&self, spans: Vec<EntitySpan>) -> Vec<EntitySpan> {
        spans
            .into_iter()
            .filter_map(|mut span| {
                span.text = self.normalize(&span.text);
                (!span.text.is_empty()).then_some(span)
            })
            .collect()
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
