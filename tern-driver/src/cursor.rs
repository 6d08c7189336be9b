//! Result cursors.
//!
//! A [`Cursor`] holds one batch of documents at a time and fetches the next
//! batch with `getMore` when the current one runs out. Cursors opened with a
//! legacy `OP_QUERY` continue with `OP_GET_MORE` instead and honour the
//! query's limit themselves. Cursors returned by the
//! [`Manager`](crate::Manager) are already positioned on their first
//! document.
//!
//! ```text
//! Created --advance--> HasCurrent --advance--> ... --> Exhausted
//!    \                     |
//!     `------ error -------+--> Destroyed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tern_bson::{Document, Value, doc};
use tracing::{debug, trace, warn};

use crate::command::Command;
use crate::concern::ReadPreference;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::manager::{run_command, run_legacy};
use crate::namespace::Namespace;
use crate::query::{Query, number_to_return};
use crate::transport::{ServerId, Transport};
use crate::wire::{LegacyRequest, OpGetMore, OpKillCursors, OpReply};

/// Server-side cursor id; 0 once the server has no more results.
pub type CursorId = i64;

/// What produced a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorSource {
    Query(Query),
    Command(Command),
}

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No document has been requested yet.
    Created,
    /// Positioned on a document.
    HasCurrent,
    /// No current document. A tailable cursor may still produce more.
    Exhausted,
    /// An error ended iteration.
    Destroyed,
}

/// The `cursor` sub-document of a command reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorSpec {
    pub id: CursorId,
    pub namespace: Namespace,
    pub first_batch: Vec<Document>,
}

fn batch_documents(cursor: &Document, key: &str) -> Result<Vec<Document>> {
    let items = cursor.get_array(key)?;
    items
        .iter()
        .map(|item| {
            item.as_document().cloned().ok_or_else(|| {
                Error::unexpected_value(format!(
                    "Expected {} to contain documents, found {}",
                    key,
                    item.type_name()
                ))
            })
        })
        .collect()
}

impl CursorSpec {
    /// Parse the `cursor` field of a reply; `None` when there is none.
    pub fn from_reply(reply: &Document) -> Result<Option<Self>> {
        let Some(cursor) = reply.get("cursor").and_then(Value::as_document) else {
            return Ok(None);
        };
        let id = cursor
            .get("id")
            .and_then(Value::to_i64)
            .ok_or_else(|| Error::unexpected_value("Invalid cursor reply: missing id"))?;
        let namespace = Namespace::parse(cursor.get_str("ns")?)?;
        let first_batch = batch_documents(cursor, "firstBatch")?;
        Ok(Some(Self {
            id,
            namespace,
            first_batch,
        }))
    }
}

/// Limit bookkeeping for a cursor opened with `OP_QUERY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LegacyCursor {
    limit: i32,
    returned: i32,
}

fn batch_len(documents: &[Document]) -> i32 {
    i32::try_from(documents.len()).unwrap_or(i32::MAX)
}

/// Iteration over the results of a query or command.
pub struct Cursor {
    transport: Arc<dyn Transport>,
    logger: Logger,
    namespace: Namespace,
    source: CursorSource,
    read_preference: Option<ReadPreference>,
    server_id: ServerId,
    cursor_id: CursorId,
    batch_size: i32,
    batch: VecDeque<Document>,
    current: Option<Document>,
    state: CursorState,
    position: usize,
    iterator_taken: bool,
    legacy: Option<LegacyCursor>,
}

impl Cursor {
    pub(crate) fn from_spec(
        transport: Arc<dyn Transport>,
        logger: Logger,
        spec: CursorSpec,
        source: CursorSource,
        read_preference: Option<ReadPreference>,
        server_id: ServerId,
    ) -> Self {
        let batch_size = match &source {
            CursorSource::Query(query) => query.batch_size(),
            CursorSource::Command(_) => 0,
        };
        Self {
            transport,
            logger,
            namespace: spec.namespace,
            source,
            read_preference,
            server_id,
            cursor_id: spec.id,
            batch_size,
            batch: spec.first_batch.into(),
            current: None,
            state: CursorState::Created,
            position: 0,
            iterator_taken: false,
            legacy: None,
        }
    }

    /// A cursor over the reply to a legacy `OP_QUERY`.
    pub(crate) fn from_op_reply(
        transport: Arc<dyn Transport>,
        logger: Logger,
        namespace: Namespace,
        reply: OpReply,
        query: &Query,
        read_preference: Option<ReadPreference>,
        server_id: ServerId,
    ) -> Self {
        let legacy = LegacyCursor {
            limit: query.limit(),
            returned: batch_len(&reply.documents),
        };
        let spec = CursorSpec {
            id: reply.cursor_id,
            namespace,
            first_batch: reply.documents,
        };
        let mut cursor = Self::from_spec(
            transport,
            logger,
            spec,
            CursorSource::Query(query.clone()),
            read_preference,
            server_id,
        );
        cursor.legacy = Some(legacy);
        cursor
    }

    /// A cursor over a single reply document.
    pub(crate) fn single(
        transport: Arc<dyn Transport>,
        logger: Logger,
        namespace: Namespace,
        document: Document,
        source: CursorSource,
        read_preference: Option<ReadPreference>,
        server_id: ServerId,
    ) -> Self {
        let spec = CursorSpec {
            id: 0,
            namespace,
            first_batch: vec![document],
        };
        Self::from_spec(transport, logger, spec, source, read_preference, server_id)
    }

    /// Move to the first document without counting it as iteration.
    pub(crate) fn prime(&mut self) -> Result<()> {
        self.fetch_next().map(|_| ())
    }

    /// Move to the next document and return it.
    ///
    /// Returns `Ok(None)` when there are no more documents. An error destroys
    /// the cursor.
    pub fn advance(&mut self) -> Result<Option<&Document>> {
        if self.state == CursorState::HasCurrent {
            self.position += 1;
        }
        self.fetch_next()?;
        Ok(self.current.as_ref())
    }

    fn fetch_next(&mut self) -> Result<()> {
        if self.state == CursorState::Destroyed {
            return Ok(());
        }

        if self.batch.is_empty() && self.cursor_id != 0 {
            if let Err(e) = self.get_more() {
                self.destroy();
                return Err(e);
            }
        }

        match self.batch.pop_front() {
            Some(document) => {
                self.current = Some(document);
                self.state = CursorState::HasCurrent;
            }
            None => {
                self.current = None;
                self.state = CursorState::Exhausted;
            }
        }
        Ok(())
    }

    fn get_more(&mut self) -> Result<()> {
        match self.legacy {
            Some(legacy) => self.legacy_get_more(legacy),
            None => self.command_get_more(),
        }
    }

    fn legacy_get_more(&mut self, legacy: LegacyCursor) -> Result<()> {
        if legacy.limit > 0 && legacy.returned >= legacy.limit {
            self.kill();
            return Ok(());
        }

        let request = LegacyRequest::GetMore(OpGetMore {
            full_collection_name: self.namespace.to_string(),
            number_to_return: number_to_return(legacy.limit, self.batch_size, legacy.returned),
            cursor_id: self.cursor_id,
        });
        let reply = self.logger.in_scope(|| {
            debug!(namespace = %self.namespace, cursor_id = self.cursor_id, "OP_GET_MORE");
            run_legacy(self.transport.as_ref(), &request, self.server_id)
        })?;

        self.cursor_id = reply.cursor_id;
        self.legacy = Some(LegacyCursor {
            returned: legacy.returned.saturating_add(batch_len(&reply.documents)),
            ..legacy
        });
        self.batch.extend(reply.documents);
        Ok(())
    }

    fn command_get_more(&mut self) -> Result<()> {
        let mut command = doc! {
            "getMore" => self.cursor_id,
            "collection" => self.namespace.coll.as_str(),
        };
        if self.batch_size > 0 {
            command.append("batchSize", i64::from(self.batch_size));
        }

        let (reply, _) = self.logger.in_scope(|| {
            debug!(namespace = %self.namespace, cursor_id = self.cursor_id, "getMore");
            run_command(
                self.transport.as_ref(),
                &self.namespace.db,
                &command,
                self.read_preference.as_ref(),
                Some(self.server_id),
            )
        })?;

        let cursor = reply.get_document("cursor")?;
        self.cursor_id = cursor
            .get("id")
            .and_then(Value::to_i64)
            .ok_or_else(|| Error::unexpected_value("Invalid getMore reply: missing cursor id"))?;
        let batch = batch_documents(cursor, "nextBatch")?;
        self.logger.in_scope(|| {
            trace!(
                namespace = %self.namespace,
                documents = batch.len(),
                cursor_id = self.cursor_id,
                "Batch received"
            )
        });
        self.batch.extend(batch);
        Ok(())
    }

    /// Close the server-side cursor. Failures are logged and ignored.
    fn kill(&mut self) {
        let cursor_id = std::mem::replace(&mut self.cursor_id, 0);
        if cursor_id == 0 {
            return;
        }
        self.logger.in_scope(|| {
            let result = if self.legacy.is_some() {
                let request = LegacyRequest::KillCursors(OpKillCursors {
                    cursor_ids: vec![cursor_id],
                });
                self.transport
                    .send_legacy(&request, self.server_id)
                    .map(|_| ())
                    .map_err(Error::from)
            } else {
                let command = doc! {
                    "killCursors" => self.namespace.coll.as_str(),
                    "cursors" => vec![Value::Int64(cursor_id)],
                };
                run_command(
                    self.transport.as_ref(),
                    &self.namespace.db,
                    &command,
                    None,
                    Some(self.server_id),
                )
                .map(|_| ())
            };
            if let Err(e) = result {
                warn!(
                    namespace = %self.namespace,
                    cursor_id = cursor_id,
                    error = %e,
                    "killCursors failed"
                );
            }
        });
    }

    fn destroy(&mut self) {
        self.state = CursorState::Destroyed;
        self.current = None;
        self.batch.clear();
        self.cursor_id = 0;
    }

    /// The document the cursor is positioned on.
    pub fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    /// Return to the first document.
    ///
    /// Only possible before iteration has moved past the first document,
    /// which stays current even after an iterator has yielded it.
    pub fn rewind(&mut self) -> Result<()> {
        if self.position > 0 {
            return Err(Error::logic(
                "Cursors cannot rewind after starting iteration",
            ));
        }
        Ok(())
    }

    /// Iterate over the remaining documents, starting with the current one.
    ///
    /// A cursor yields only one iterator.
    pub fn iter(&mut self) -> Result<Iter<'_>> {
        self.take_iterator()?;
        Ok(Iter {
            cursor: self,
            started: false,
        })
    }

    fn take_iterator(&mut self) -> Result<()> {
        if self.iterator_taken {
            return Err(Error::logic("Cursors cannot yield multiple iterators"));
        }
        self.iterator_taken = true;
        Ok(())
    }

    /// Collect every remaining document.
    pub fn to_vec(&mut self) -> Result<Vec<Document>> {
        self.iter()?.collect()
    }

    /// Collect every remaining document, deserialized into `T`.
    pub fn to_vec_of<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        self.iter()?
            .map(|document| Ok(tern_bson::from_document(document?)?))
            .collect()
    }

    fn step(&mut self, started: &mut bool) -> Option<Result<Document>> {
        let first = !*started;
        *started = true;
        if !(first && self.state == CursorState::HasCurrent) {
            if let Err(e) = self.advance() {
                return Some(Err(e));
            }
        }
        if self.position == 0 {
            self.current.clone().map(Ok)
        } else {
            self.current.take().map(Ok)
        }
    }

    pub fn id(&self) -> CursorId {
        self.cursor_id
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn source(&self) -> &CursorSource {
        &self.source
    }

    pub fn read_preference(&self) -> Option<&ReadPreference> {
        self.read_preference.as_ref()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether no further documents can be produced.
    pub fn is_dead(&self) -> bool {
        match self.state {
            CursorState::Destroyed => true,
            CursorState::HasCurrent => false,
            CursorState::Created | CursorState::Exhausted => {
                self.cursor_id == 0 && self.batch.is_empty()
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("namespace", &self.namespace)
            .field("id", &self.cursor_id)
            .field("server_id", &self.server_id)
            .field("state", &self.state)
            .field("buffered", &self.batch.len())
            .finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.state != CursorState::Destroyed {
            self.kill();
        }
    }
}

/// Borrowing iterator over a cursor.
pub struct Iter<'a> {
    cursor: &'a mut Cursor,
    started: bool,
}

impl Iterator for Iter<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.step(&mut self.started)
    }
}

/// Owning iterator over a cursor.
pub struct IntoIter {
    cursor: Cursor,
    started: bool,
    refused: Option<Error>,
    finished: bool,
}

impl Iterator for IntoIter {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(err) = self.refused.take() {
            self.finished = true;
            return Some(Err(err));
        }
        self.cursor.step(&mut self.started)
    }
}

impl IntoIterator for Cursor {
    type Item = Result<Document>;
    type IntoIter = IntoIter;

    fn into_iter(mut self) -> IntoIter {
        let refused = self.take_iterator().err();
        IntoIter {
            cursor: self,
            started: false,
            refused,
            finished: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    fn docs(range: std::ops::Range<i32>) -> Vec<Value> {
        range.map(|i| Value::from(doc! { "_id" => i })).collect()
    }

    fn cursor_over(mock: &Arc<MockTransport>, id: CursorId, first: Vec<Value>) -> Cursor {
        let reply = doc! {
            "cursor" => doc! { "id" => id, "ns" => "db.items", "firstBatch" => first },
            "ok" => 1,
        };
        let spec = CursorSpec::from_reply(&reply).unwrap().unwrap();
        let transport: Arc<dyn Transport> = mock.clone();
        let mut cursor = Cursor::from_spec(
            transport,
            Logger::disabled(),
            spec,
            CursorSource::Query(Query::with_filter(Document::new())),
            None,
            ServerId(1),
        );
        cursor.prime().unwrap();
        cursor
    }

    fn ids(documents: &[Document]) -> Vec<i32> {
        documents.iter().map(|d| d.get_i32("_id").unwrap()).collect()
    }

    #[test]
    fn test_iterates_across_batches() {
        let mock = Arc::new(MockTransport::new());
        mock.push_reply(doc! {
            "cursor" => doc! { "id" => 0i64, "ns" => "db.items", "nextBatch" => docs(2..4) },
            "ok" => 1,
        });

        let mut cursor = cursor_over(&mock, 42, docs(0..2));
        assert_eq!(cursor.current().unwrap().get_i32("_id").unwrap(), 0);

        let all = cursor.to_vec().unwrap();
        assert_eq!(ids(&all), vec![0, 1, 2, 3]);
        assert!(cursor.is_dead());
        assert_eq!(cursor.id(), 0);

        let commands = mock.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].command,
            doc! { "getMore" => 42i64, "collection" => "items" }
        );
        assert_eq!(commands[0].server_id, ServerId(1));
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let mock = Arc::new(MockTransport::new());
        let mut cursor = cursor_over(&mock, 0, Vec::new());
        assert_eq!(cursor.state(), CursorState::Exhausted);
        assert!(cursor.current().is_none());
        assert!(cursor.advance().unwrap().is_none());
        assert!(cursor.to_vec().unwrap().is_empty());
    }

    #[test]
    fn test_rewind_rules() {
        let mock = Arc::new(MockTransport::new());
        let mut cursor = cursor_over(&mock, 0, docs(0..3));
        cursor.rewind().unwrap();

        cursor.advance().unwrap();
        let err = cursor.rewind().unwrap_err();
        assert!(err.is_logic());
        assert_eq!(err.to_string(), "Cursors cannot rewind after starting iteration");
        assert_eq!(cursor.current().unwrap().get_i32("_id").unwrap(), 1);
    }

    #[test]
    fn test_rewind_after_iterator_yields_first_document() {
        let mock = Arc::new(MockTransport::new());
        let mut cursor = cursor_over(&mock, 0, docs(0..2));

        let first = cursor.iter().unwrap().next().unwrap().unwrap();
        assert_eq!(first.get_i32("_id").unwrap(), 0);

        cursor.rewind().unwrap();
        assert_eq!(cursor.current(), Some(&first));
        assert_eq!(cursor.advance().unwrap().unwrap().get_i32("_id").unwrap(), 1);
        assert!(cursor.rewind().unwrap_err().is_logic());
    }

    fn legacy_cursor(mock: &Arc<MockTransport>, options: Document, reply: OpReply) -> Cursor {
        let query = Query::new(Document::new(), &options).unwrap();
        let transport: Arc<dyn Transport> = mock.clone();
        let mut cursor = Cursor::from_op_reply(
            transport,
            Logger::disabled(),
            Namespace::new("db", "items"),
            reply,
            &query,
            None,
            ServerId(1),
        );
        cursor.prime().unwrap();
        cursor
    }

    fn op_reply(cursor_id: CursorId, range: std::ops::Range<i32>) -> OpReply {
        OpReply {
            response_flags: 0,
            cursor_id,
            starting_from: 0,
            documents: range.map(|i| doc! { "_id" => i }).collect(),
        }
    }

    #[test]
    fn test_legacy_get_more() {
        let mock = Arc::new(MockTransport::new());
        mock.push_op_reply(op_reply(0, 2..3));

        let mut cursor = legacy_cursor(&mock, doc! { "batchSize" => 2 }, op_reply(12, 0..2));
        assert_eq!(ids(&cursor.to_vec().unwrap()), vec![0, 1, 2]);
        assert!(cursor.is_dead());

        let sent = mock.legacy_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].request,
            LegacyRequest::GetMore(OpGetMore {
                full_collection_name: "db.items".to_string(),
                number_to_return: 2,
                cursor_id: 12,
            })
        );
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_legacy_limit_closes_cursor() {
        let mock = Arc::new(MockTransport::new());
        let mut cursor = legacy_cursor(&mock, doc! { "limit" => 2 }, op_reply(12, 0..2));
        assert_eq!(ids(&cursor.to_vec().unwrap()), vec![0, 1]);
        assert_eq!(cursor.id(), 0);

        let sent = mock.legacy_requests();
        assert_eq!(
            sent.iter().map(|r| r.request.clone()).collect::<Vec<_>>(),
            vec![LegacyRequest::KillCursors(OpKillCursors { cursor_ids: vec![12] })]
        );
    }

    #[test]
    fn test_legacy_cursor_not_found() {
        let mock = Arc::new(MockTransport::new());
        mock.push_op_reply(OpReply {
            response_flags: OpReply::CURSOR_NOT_FOUND,
            ..op_reply(0, 0..0)
        });

        let mut cursor = legacy_cursor(&mock, doc! {}, op_reply(12, 0..1));
        let err = cursor.advance().unwrap_err();
        assert_eq!(err.code, Some(crate::error::codes::CURSOR_INVALID_CURSOR));
        assert_eq!(err.to_string(), "Cursor 12 not found");
        assert_eq!(cursor.state(), CursorState::Destroyed);
        drop(cursor);
        assert_eq!(mock.legacy_requests().len(), 1);
    }

    #[test]
    fn test_legacy_drop_kills_cursor() {
        let mock = Arc::new(MockTransport::new());
        drop(legacy_cursor(&mock, doc! {}, op_reply(12, 0..1)));
        assert_eq!(
            mock.legacy_requests()[0].request,
            LegacyRequest::KillCursors(OpKillCursors { cursor_ids: vec![12] })
        );
    }

    #[test]
    fn test_only_one_iterator() {
        let mock = Arc::new(MockTransport::new());
        let mut cursor = cursor_over(&mock, 0, docs(0..2));
        let first: Vec<Document> = cursor.iter().unwrap().map(|d| d.unwrap()).collect();
        assert_eq!(ids(&first), vec![0, 1]);

        let err = cursor.iter().err().unwrap();
        assert_eq!(err.to_string(), "Cursors cannot yield multiple iterators");

        let mut owned = cursor.into_iter();
        assert!(owned.next().unwrap().unwrap_err().is_logic());
        assert!(owned.next().is_none());
    }

    #[test]
    fn test_into_iter() {
        let mock = Arc::new(MockTransport::new());
        let cursor = cursor_over(&mock, 0, docs(0..3));
        let collected: Result<Vec<Document>> = cursor.into_iter().collect();
        assert_eq!(ids(&collected.unwrap()), vec![0, 1, 2]);
    }

    #[test]
    fn test_typed_collection() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Item {
            _id: i32,
        }

        let mock = Arc::new(MockTransport::new());
        let mut cursor = cursor_over(&mock, 0, docs(0..2));
        let items: Vec<Item> = cursor.to_vec_of().unwrap();
        assert_eq!(items, vec![Item { _id: 0 }, Item { _id: 1 }]);
    }

    #[test]
    fn test_get_more_failure_destroys_cursor() {
        let mock = Arc::new(MockTransport::new());
        mock.push_reply(doc! { "ok" => 0, "errmsg" => "cursor id 7 not found", "code" => 43 });

        let mut cursor = cursor_over(&mock, 7, docs(0..1));
        let results: Vec<Result<Document>> = cursor.iter().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().to_string(),
            "cursor id 7 not found"
        );
        assert_eq!(cursor.state(), CursorState::Destroyed);
        assert!(cursor.is_dead());
    }

    #[test]
    fn test_drop_kills_live_cursor() {
        let mock = Arc::new(MockTransport::new());
        let cursor = cursor_over(&mock, 99, docs(0..1));
        drop(cursor);

        let commands = mock.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].command,
            doc! { "killCursors" => "items", "cursors" => vec![Value::Int64(99)] }
        );
    }

    #[test]
    fn test_drop_of_finished_cursor_is_silent() {
        let mock = Arc::new(MockTransport::new());
        drop(cursor_over(&mock, 0, docs(0..1)));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_reply_parsing() {
        assert_eq!(CursorSpec::from_reply(&doc! { "ok" => 1 }).unwrap(), None);

        let err = CursorSpec::from_reply(&doc! {
            "cursor" => doc! { "id" => 0i64, "ns" => "db.c", "firstBatch" => vec![Value::from(1)] },
        })
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnexpectedValue);

        let err = CursorSpec::from_reply(&doc! {
            "cursor" => doc! { "ns" => "db.c", "firstBatch" => docs(0..0) },
        })
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnexpectedValue);
    }
}
