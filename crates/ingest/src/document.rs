use serde::{Deserialize, Serialize};

/// A single fetched article, before any annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    pub title: String,
    pub body: String,
}

impl RawDocument {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// One page as returned by a source, possibly without text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePage {
    pub title: String,
    pub body: Option<String>,
}

/// Everything a source returned for one fetch call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceBatch {
    pub pages: Vec<SourcePage>,
}

impl SourceBatch {
    pub fn from_pairs<I, T, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, B)>,
        T: Into<String>,
        B: Into<String>,
    {
        Self {
            pages: pairs
                .into_iter()
                .map(|(title, body)| SourcePage {
                    title: title.into(),
                    body: Some(body.into()),
                })
                .collect(),
        }
    }

    /// Split the batch into documents, dropping pages with no usable text.
    pub fn into_documents(self) -> Vec<RawDocument> {
        self.pages
            .into_iter()
            .filter_map(|page| {
                let body = page.body?;
                if page.title.trim().is_empty() || body.trim().is_empty() {
                    tracing::debug!(title = %page.title, "Skipping page without text");
                    return None;
                }
                Some(RawDocument::new(page.title, body))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
