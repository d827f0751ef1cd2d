use serde::{Deserialize, Serialize};

use crate::document::Document;

/// The full current result set of a query at one point in time.
///
/// Not a diff: every snapshot replaces the previous one for the same query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    documents: Vec<Document>,
}

impl Snapshot {
    /// Wraps an already ordered result set.
    #[must_use]
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Number of documents in the result set.
    #[must_use]
    pub fn size(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.documents.iter()
    }

    /// Looks up a document by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

impl From<Vec<Document>> for Snapshot {
    fn from(documents: Vec<Document>) -> Self {
        Self::new(documents)
    }
}
