//! Database commands.

use tern_bson::Document;

/// A command document. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    document: Document,
}

impl Command {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The command name: the first key of the document.
    pub fn name(&self) -> Option<&str> {
        self.document.first_key()
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

impl From<Document> for Command {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}
