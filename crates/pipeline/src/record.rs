use extract::EntitySpan;
use ingest::RawDocument;
use serde::{Deserialize, Serialize};
use store::NewGame;

/// A document together with the entities found in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    pub title: String,
    pub body: String,
    pub release_date: Option<String>,
    pub entities: Vec<EntitySpan>,
}

impl AnnotatedRecord {
    pub fn new(doc: RawDocument, entities: Vec<EntitySpan>) -> Self {
        let release_date = extract::find_release_year(&doc.body);
        Self {
            title: doc.title,
            body: doc.body,
            release_date,
            entities,
        }
    }

    /// The game row for this record; the body is stored as the summary.
    pub fn new_game(&self) -> NewGame {
        NewGame {
            title: self.title.clone(),
            summary: self.body.clone(),
            release_date: self.release_date.clone(),
        }
    }
}
