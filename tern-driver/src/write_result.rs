//! Results of bulk writes.
//!
//! Replies from the individual `insert`, `update` and `delete` commands of a
//! bulk write are merged into a single reply document of the form
//! `{nInserted, nMatched, nModified, nRemoved, nUpserted, upserted,
//! writeErrors, writeConcernErrors}`; a [`WriteResult`] is an immutable view
//! of that document together with the write concern and server involved.

use tern_bson::{Document, Value, doc};

use crate::bulk::OpKind;
use crate::concern::WriteConcern;
use crate::transport::ServerId;

/// An error for one operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the failed operation in the bulk, in insertion order.
    pub index: usize,
    pub code: i32,
    pub message: String,
    pub info: Option<Document>,
}

impl WriteError {
    fn from_document(doc: &Document) -> Self {
        Self {
            index: doc.get("index").and_then(Value::to_i64).unwrap_or(0).max(0) as usize,
            code: doc.find_as_int32("code", 0),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            info: doc.get("errInfo").and_then(Value::as_document).cloned(),
        }
    }
}

/// A failure to satisfy the requested write concern.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernError {
    pub code: i32,
    pub message: String,
    pub info: Option<Document>,
}

impl WriteConcernError {
    fn from_document(doc: &Document) -> Self {
        Self {
            code: doc.find_as_int32("code", 0),
            message: doc.get_str("errmsg").unwrap_or_default().to_string(),
            info: doc.get("errInfo").and_then(Value::as_document).cloned(),
        }
    }
}

/// The `_id` of a document created by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub index: usize,
    pub id: Value,
}

/// Outcome of executing a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    reply: Document,
    write_concern: WriteConcern,
    server_id: ServerId,
    upserted: Vec<Upserted>,
    write_errors: Vec<WriteError>,
    write_concern_errors: Vec<WriteConcernError>,
}

fn documents(reply: &Document, key: &str) -> impl Iterator<Item = Document> {
    reply
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_document)
        .cloned()
        .collect::<Vec<_>>()
        .into_iter()
}

impl WriteResult {
    /// Wrap a merged reply document.
    pub fn from_reply(reply: Document, write_concern: WriteConcern, server_id: ServerId) -> Self {
        let upserted = documents(&reply, "upserted")
            .map(|d| Upserted {
                index: d.get("index").and_then(Value::to_i64).unwrap_or(0).max(0) as usize,
                id: d.get("_id").cloned().unwrap_or(Value::Null),
            })
            .collect();
        let write_errors = documents(&reply, "writeErrors")
            .map(|d| WriteError::from_document(&d))
            .collect();
        let write_concern_errors = documents(&reply, "writeConcernErrors")
            .map(|d| WriteConcernError::from_document(&d))
            .collect();

        Self {
            reply,
            write_concern,
            server_id,
            upserted,
            write_errors,
            write_concern_errors,
        }
    }

    /// An empty result for a write that was not acknowledged.
    pub fn unacknowledged(write_concern: WriteConcern, server_id: ServerId) -> Self {
        Self::from_reply(Document::new(), write_concern, server_id)
    }

    fn count(&self, key: &str) -> Option<i64> {
        if !self.is_acknowledged() {
            return None;
        }
        self.reply.get(key).and_then(Value::to_i64)
    }

    /// Documents inserted; `None` when the write was not acknowledged.
    pub fn inserted_count(&self) -> Option<i64> {
        self.count("nInserted")
    }

    pub fn matched_count(&self) -> Option<i64> {
        self.count("nMatched")
    }

    /// Documents modified; `None` as well when the server did not report it.
    pub fn modified_count(&self) -> Option<i64> {
        self.count("nModified")
    }

    pub fn deleted_count(&self) -> Option<i64> {
        self.count("nRemoved")
    }

    pub fn upserted_count(&self) -> Option<i64> {
        self.count("nUpserted")
    }

    pub fn upserted_ids(&self) -> &[Upserted] {
        &self.upserted
    }

    pub fn write_errors(&self) -> &[WriteError] {
        &self.write_errors
    }

    /// The last write concern error, if any.
    pub fn write_concern_error(&self) -> Option<&WriteConcernError> {
        self.write_concern_errors.last()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.write_concern.is_acknowledged()
    }

    pub fn has_errors(&self) -> bool {
        !self.write_errors.is_empty() || !self.write_concern_errors.is_empty()
    }

    pub fn write_concern(&self) -> &WriteConcern {
        &self.write_concern
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// The merged reply document.
    pub fn reply(&self) -> &Document {
        &self.reply
    }
}

/// Accumulates per-batch command replies into one reply document.
#[derive(Debug, Default)]
pub(crate) struct ReplyMerger {
    inserted: i64,
    matched: i64,
    modified: i64,
    modified_reported: bool,
    removed: i64,
    upserted: Vec<Value>,
    write_errors: Vec<Value>,
    write_concern_errors: Vec<Value>,
}

impl ReplyMerger {
    pub(crate) fn new() -> Self {
        Self {
            modified_reported: true,
            ..Self::default()
        }
    }

    /// Fold in the reply of one batch; `indices` maps batch positions back
    /// to positions in the bulk.
    pub(crate) fn merge(&mut self, kind: OpKind, reply: &Document, indices: &[usize]) {
        let n = reply.get("n").and_then(Value::to_i64).unwrap_or(0);
        let original = |d: &Document| {
            let local = d.get("index").and_then(Value::to_i64).unwrap_or(0).max(0) as usize;
            indices.get(local).copied().unwrap_or(local) as i64
        };

        match kind {
            OpKind::Insert => self.inserted += n,
            OpKind::Delete => self.removed += n,
            OpKind::Update => {
                let upserted: Vec<Document> = documents(reply, "upserted").collect();
                self.matched += n - upserted.len() as i64;
                match reply.get("nModified").and_then(Value::to_i64) {
                    Some(modified) => self.modified += modified,
                    None => self.modified_reported = false,
                }
                for d in upserted {
                    self.upserted.push(Value::from(doc! {
                        "index" => original(&d),
                        "_id" => d.get("_id").cloned().unwrap_or(Value::Null),
                    }));
                }
            }
        }

        for d in documents(reply, "writeErrors") {
            let mut error = doc! { "index" => original(&d) };
            for (key, value) in &d {
                if key != "index" {
                    error.append(key, value.clone());
                }
            }
            self.write_errors.push(Value::from(error));
        }

        if let Some(wce) = reply.get("writeConcernError").and_then(Value::as_document) {
            self.write_concern_errors.push(Value::from(wce.clone()));
        }
    }

    pub(crate) fn has_write_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }

    pub(crate) fn has_write_concern_errors(&self) -> bool {
        !self.write_concern_errors.is_empty()
    }

    pub(crate) fn into_document(self) -> Document {
        let mut reply = doc! {
            "nInserted" => self.inserted,
            "nMatched" => self.matched,
        };
        if self.modified_reported {
            reply.append("nModified", self.modified);
        }
        reply.append("nRemoved", self.removed);
        reply.append("nUpserted", self.upserted.len() as i64);
        reply.append("upserted", self.upserted);
        reply.append("writeErrors", self.write_errors);
        reply.append("writeConcernErrors", self.write_concern_errors);
        reply
    }
}
