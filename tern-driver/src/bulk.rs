//! Bulk write construction.
//!
//! A [`BulkWrite`] collects insert, update and delete operations. At
//! execution time they are grouped into `insert`, `update` and `delete`
//! commands: an ordered bulk keeps the caller's order and starts a new batch
//! whenever the operation kind changes, an unordered bulk groups all
//! operations of one kind together.
//!
//! ```rust
//! use tern_bson::doc;
//! use tern_driver::bulk::{BulkWrite, OpKind};
//! use tern_driver::concern::WriteConcern;
//!
//! let mut bulk = BulkWrite::new(true);
//! bulk.insert(doc! { "x" => 1 }).unwrap();
//! bulk.delete(doc! { "x" => 2 }, &doc! {}).unwrap();
//! bulk.insert(doc! { "x" => 3 }).unwrap();
//!
//! let scratch = bulk
//!     .build_bulk_write("db.items", &WriteConcern::default())
//!     .unwrap();
//! let kinds: Vec<OpKind> = scratch.batches.iter().map(|b| b.kind).collect();
//! assert_eq!(kinds, vec![OpKind::Insert, OpKind::Delete, OpKind::Insert]);
//! ```

use std::fmt;

use tern_bson::{Document, ObjectId, Value, doc};

use crate::concern::WriteConcern;
use crate::error::{Error, Result};
use crate::namespace::split_namespace;

/// Most operations sent in a single write command.
pub const MAX_WRITE_BATCH_SIZE: usize = 1000;

/// The kind of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl OpKind {
    /// Name of the write command.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Field holding the operations in the write command.
    pub fn payload_field(&self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WriteOp {
    Insert(Document),
    Update {
        filter: Document,
        update: Document,
        multi: bool,
        upsert: bool,
    },
    Delete {
        filter: Document,
        limit: bool,
    },
}

impl WriteOp {
    fn kind(&self) -> OpKind {
        match self {
            Self::Insert(_) => OpKind::Insert,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    fn to_document(&self) -> Document {
        match self {
            Self::Insert(document) => document.clone(),
            Self::Update {
                filter,
                update,
                multi,
                upsert,
            } => doc! {
                "q" => filter.clone(),
                "u" => update.clone(),
                "upsert" => *upsert,
                "multi" => *multi,
            },
            Self::Delete { filter, limit } => doc! {
                "q" => filter.clone(),
                "limit" => i32::from(*limit),
            },
        }
    }
}

/// One write command and the bulk positions of the operations it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBatch {
    pub kind: OpKind,
    pub command: Document,
    pub indices: Vec<usize>,
}

/// Per-execution state: target namespace and the commands to send.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkScratch {
    pub database: String,
    pub collection: String,
    pub batches: Vec<CommandBatch>,
}

/// An ordered or unordered list of write operations.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkWrite {
    ordered: bool,
    operations: Vec<WriteOp>,
    scratch: Option<BulkScratch>,
    executed: bool,
}

impl Default for BulkWrite {
    fn default() -> Self {
        Self::new(true)
    }
}

/// A boolean option, accepting any value the server would treat as truthy.
fn option_flag(options: &Document, key: &str) -> bool {
    options.get(key).is_some_and(Value::is_truthy)
}

impl BulkWrite {
    pub fn new(ordered: bool) -> Self {
        Self {
            ordered,
            operations: Vec::new(),
            scratch: None,
            executed: false,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Queue an insert and return the document's `_id`.
    ///
    /// An ObjectId is generated and placed first when the document has none.
    pub fn insert(&mut self, document: Document) -> Result<Value> {
        if let Some(key) = document.keys().find(|k| k.starts_with('$')) {
            return Err(Error::invalid_argument(format!(
                "invalid document for insert: keys cannot begin with \"$\": \"{}\"",
                key
            )));
        }

        if let Some(id) = document.get("_id").cloned() {
            self.operations.push(WriteOp::Insert(document));
            return Ok(id);
        }

        let id = Value::ObjectId(ObjectId::new());
        let mut with_id = Document::with_capacity(document.len() + 1);
        with_id.append("_id", id.clone());
        with_id.extend(document);
        self.operations.push(WriteOp::Insert(with_id));
        Ok(id)
    }

    /// Queue an update.
    ///
    /// `update` is either an operator document (every key starts with `$`)
    /// or a replacement document (no key does). Options: `multi`, `upsert`.
    pub fn update(&mut self, filter: Document, update: Document, options: &Document) -> Result<()> {
        let multi = option_flag(options, "multi");
        let upsert = option_flag(options, "upsert");

        let is_operator = update.first_key().is_some_and(|k| k.starts_with('$'));
        if is_operator {
            if let Some(key) = update.keys().find(|k| !k.starts_with('$')) {
                return Err(Error::invalid_argument(format!(
                    "Invalid key '{}': update only works with $ operators",
                    key
                )));
            }
        } else {
            if let Some(key) = update.keys().find(|k| k.starts_with('$')) {
                return Err(Error::invalid_argument(format!(
                    "Invalid key '{}': replace prohibits $ operators",
                    key
                )));
            }
            if multi {
                return Err(Error::invalid_argument(
                    "Replacement document conflicts with true \"multi\" option",
                ));
            }
        }

        self.operations.push(WriteOp::Update {
            filter,
            update,
            multi,
            upsert,
        });
        Ok(())
    }

    /// Queue a delete. With a truthy `limit` option only one match is removed.
    pub fn delete(&mut self, filter: Document, options: &Document) -> Result<()> {
        let limit = option_flag(options, "limit");
        self.operations.push(WriteOp::Delete { filter, limit });
        Ok(())
    }

    /// Number of queued operations.
    pub fn count(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether the bulk has been executed at least once.
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Scratch state of the most recent execution.
    pub fn scratch(&self) -> Option<&BulkScratch> {
        self.scratch.as_ref()
    }

    /// Positions of the operations, grouped into batches of one kind.
    fn groups(&self) -> Vec<(OpKind, Vec<usize>)> {
        let mut groups: Vec<(OpKind, Vec<usize>)> = Vec::new();
        if self.ordered {
            for (index, op) in self.operations.iter().enumerate() {
                match groups.last_mut() {
                    Some((kind, indices)) if *kind == op.kind() => indices.push(index),
                    _ => groups.push((op.kind(), vec![index])),
                }
            }
        } else {
            for kind in [OpKind::Insert, OpKind::Update, OpKind::Delete] {
                let indices: Vec<usize> = self
                    .operations
                    .iter()
                    .enumerate()
                    .filter(|(_, op)| op.kind() == kind)
                    .map(|(index, _)| index)
                    .collect();
                if !indices.is_empty() {
                    groups.push((kind, indices));
                }
            }
        }
        groups
    }

    /// Build the write commands for `namespace`.
    pub fn build_bulk_write(&self, namespace: &str, write_concern: &WriteConcern) -> Result<BulkScratch> {
        let (database, collection) = split_namespace(namespace)?;

        let mut batches = Vec::new();
        for (kind, indices) in self.groups() {
            for chunk in indices.chunks(MAX_WRITE_BATCH_SIZE) {
                let payload: Vec<Value> = chunk
                    .iter()
                    .map(|&i| Value::from(self.operations[i].to_document()))
                    .collect();

                let mut command = Document::new();
                command.append(kind.command_name(), collection);
                command.append(kind.payload_field(), payload);
                command.append("ordered", self.ordered);
                if !write_concern.is_default() {
                    command.append("writeConcern", write_concern.to_document());
                }

                batches.push(CommandBatch {
                    kind,
                    command,
                    indices: chunk.to_vec(),
                });
            }
        }

        Ok(BulkScratch {
            database: database.to_string(),
            collection: collection.to_string(),
            batches,
        })
    }

    /// Discard the previous run's scratch state and build a fresh one.
    pub(crate) fn reset(&mut self, namespace: &str, write_concern: &WriteConcern) -> Result<&BulkScratch> {
        self.scratch = None;
        let scratch = self.build_bulk_write(namespace, write_concern)?;
        Ok(&*self.scratch.insert(scratch))
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concern::Acknowledgment;
    use pretty_assertions::assert_eq;

    fn kinds(scratch: &BulkScratch) -> Vec<OpKind> {
        scratch.batches.iter().map(|b| b.kind).collect()
    }

    #[test]
    fn test_insert_generates_leading_id() {
        let mut bulk = BulkWrite::new(true);
        let id = bulk.insert(doc! { "x" => 1 }).unwrap();
        assert!(id.as_object_id().is_some());

        let scratch = bulk.build_bulk_write("db.c", &WriteConcern::default()).unwrap();
        let documents = scratch.batches[0].command.get_array("documents").unwrap();
        let inserted = documents[0].as_document().unwrap();
        assert_eq!(inserted.first_key(), Some("_id"));
        assert_eq!(inserted.get("_id"), Some(&id));
        assert_eq!(inserted.get("x"), Some(&Value::Int32(1)));
    }

    #[test]
    fn test_insert_keeps_existing_id() {
        let mut bulk = BulkWrite::new(true);
        let id = bulk.insert(doc! { "x" => 1, "_id" => "mine" }).unwrap();
        assert_eq!(id, Value::from("mine"));
    }

    #[test]
    fn test_insert_rejects_dollar_keys() {
        let mut bulk = BulkWrite::new(true);
        let err = bulk.insert(doc! { "$set" => 1 }).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(bulk.count(), 0);
    }

    #[test]
    fn test_update_validation() {
        let mut bulk = BulkWrite::new(true);
        bulk.update(doc! {}, doc! { "$set" => doc! { "a" => 1 } }, &doc! { "multi" => true })
            .unwrap();
        bulk.update(doc! {}, doc! { "a" => 1 }, &doc! { "upsert" => true })
            .unwrap();

        let err = bulk
            .update(doc! {}, doc! { "$set" => doc! {}, "a" => 1 }, &doc! {})
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid key 'a': update only works with $ operators"
        );

        let err = bulk
            .update(doc! {}, doc! { "a" => 1, "$inc" => doc! {} }, &doc! {})
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid key '$inc': replace prohibits $ operators");

        let err = bulk
            .update(doc! {}, doc! { "a" => 1 }, &doc! { "multi" => true })
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(bulk.count(), 2);
    }

    #[test]
    fn test_ordered_batches_split_on_kind_change() {
        let mut bulk = BulkWrite::new(true);
        bulk.insert(doc! { "_id" => 1 }).unwrap();
        bulk.insert(doc! { "_id" => 2 }).unwrap();
        bulk.update(doc! { "_id" => 1 }, doc! { "$set" => doc! { "y" => 1 } }, &doc! {})
            .unwrap();
        bulk.insert(doc! { "_id" => 3 }).unwrap();
        bulk.delete(doc! { "_id" => 2 }, &doc! { "limit" => 1 }).unwrap();

        let scratch = bulk.build_bulk_write("db.c", &WriteConcern::default()).unwrap();
        assert_eq!(
            kinds(&scratch),
            vec![OpKind::Insert, OpKind::Update, OpKind::Insert, OpKind::Delete]
        );
        assert_eq!(scratch.batches[0].indices, vec![0, 1]);
        assert_eq!(scratch.batches[2].indices, vec![3]);
        assert_eq!(
            scratch.batches[3].command,
            doc! {
                "delete" => "c",
                "deletes" => vec![Value::from(doc! { "q" => doc! { "_id" => 2 }, "limit" => 1 })],
                "ordered" => true,
            }
        );
    }

    #[test]
    fn test_unordered_groups_by_kind() {
        let mut bulk = BulkWrite::new(false);
        bulk.delete(doc! { "a" => 1 }, &doc! {}).unwrap();
        bulk.insert(doc! { "_id" => 1 }).unwrap();
        bulk.update(doc! {}, doc! { "$set" => doc! { "b" => 1 } }, &doc! {})
            .unwrap();
        bulk.insert(doc! { "_id" => 2 }).unwrap();

        let scratch = bulk.build_bulk_write("db.c", &WriteConcern::default()).unwrap();
        assert_eq!(
            kinds(&scratch),
            vec![OpKind::Insert, OpKind::Update, OpKind::Delete]
        );
        assert_eq!(scratch.batches[0].indices, vec![1, 3]);
        assert_eq!(scratch.batches[2].indices, vec![0]);
        assert_eq!(scratch.batches[0].command.get_bool("ordered").unwrap(), false);
    }

    #[test]
    fn test_large_groups_are_chunked() {
        let mut bulk = BulkWrite::new(true);
        for i in 0..(MAX_WRITE_BATCH_SIZE + 5) {
            bulk.insert(doc! { "_id" => i as i64 }).unwrap();
        }
        let scratch = bulk.build_bulk_write("db.c", &WriteConcern::default()).unwrap();
        assert_eq!(scratch.batches.len(), 2);
        assert_eq!(scratch.batches[1].indices.len(), 5);
        assert_eq!(scratch.batches[1].indices[0], MAX_WRITE_BATCH_SIZE);
    }

    #[test]
    fn test_write_concern_is_attached() {
        let mut bulk = BulkWrite::new(true);
        bulk.insert(doc! { "_id" => 1 }).unwrap();
        let wc = WriteConcern::new(Acknowledgment::Majority, 100, None).unwrap();
        let scratch = bulk.build_bulk_write("db.c", &wc).unwrap();
        assert_eq!(
            scratch.batches[0].command.get_document("writeConcern").unwrap(),
            &doc! { "w" => "majority", "wtimeout" => 100 }
        );
    }

    #[test]
    fn test_reset_replaces_scratch() {
        let mut bulk = BulkWrite::new(true);
        bulk.insert(doc! { "_id" => 1 }).unwrap();

        bulk.reset("first.one", &WriteConcern::default()).unwrap();
        assert_eq!(bulk.scratch().unwrap().database, "first");

        let scratch = bulk.reset("second.two.three", &WriteConcern::default()).unwrap();
        assert_eq!(scratch.database, "second");
        assert_eq!(scratch.collection, "two.three");

        assert!(bulk.reset("invalid", &WriteConcern::default()).is_err());
        assert!(bulk.scratch().is_none());
    }
}
