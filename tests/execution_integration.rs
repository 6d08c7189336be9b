//! Integration tests for command execution.
//!
//! These tests drive a [`Manager`] over a scripted transport and check:
//! - The commands sent for queries, commands and bulk writes
//! - Cursor iteration across `getMore` batches
//! - Legacy `OP_QUERY` cursors against servers without the `find` command
//! - How server replies become results and classified errors

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tern::bson::{Document, Value};
use tern::doc;
use tern::driver::error::{ErrorDomain, codes};
use tern::driver::transport::{MockTransport, TransportError};
use tern::driver::wire::{LegacyRequest, OpGetMore, OpKillCursors, OpQuery, OpReply};
use tern::driver::{
    BulkWrite, Command, Host, Logger, Manager, ManagerConfig, Query, QueryFlags, ReadMode,
    ReadPreference, ServerDescription, ServerId, ServerKind, WriteConcern,
};
use tern::ErrorKind;

fn setup(uri: &str) -> (Manager, Arc<MockTransport>) {
    setup_with(uri, MockTransport::new())
}

fn setup_with(uri: &str, mock: MockTransport) -> (Manager, Arc<MockTransport>) {
    let mock = Arc::new(mock);
    let config = ManagerConfig::builder()
        .uri(uri)
        .logger(Logger::disabled())
        .build()
        .unwrap();
    let manager = Manager::with_transport(config, mock.clone()).unwrap();
    (manager, mock)
}

fn birds(names: &[&str]) -> Vec<Value> {
    names
        .iter()
        .map(|name| Value::from(doc! { "name" => *name }))
        .collect()
}

fn names(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .map(|d| d.get_str("name").unwrap().to_string())
        .collect()
}

fn cursor_reply(id: i64, ns: &str, batch_key: &str, batch: Vec<Value>) -> Document {
    doc! {
        "cursor" => doc! { "id" => id, "ns" => ns, batch_key => batch },
        "ok" => 1,
    }
}

fn replica_set() -> MockTransport {
    MockTransport::with_servers(vec![
        ServerDescription {
            id: ServerId(1),
            host: Host::new("a.example.com", 27017),
            kind: ServerKind::RsPrimary,
            max_wire_version: 8,
        },
        ServerDescription {
            id: ServerId(2),
            host: Host::new("b.example.com", 27017),
            kind: ServerKind::RsSecondary,
            max_wire_version: 8,
        },
    ])
}

fn legacy_server(kind: ServerKind) -> MockTransport {
    MockTransport::with_servers(vec![ServerDescription {
        id: ServerId(1),
        host: Host::new("old.example.com", 27017),
        kind,
        max_wire_version: 3,
    }])
}

fn op_reply(cursor_id: i64, names: &[&str]) -> OpReply {
    OpReply {
        response_flags: 0,
        cursor_id,
        starting_from: 0,
        documents: names.iter().map(|name| doc! { "name" => *name }).collect(),
    }
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_query_iterates_across_get_more() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(cursor_reply(77, "zoo.birds", "firstBatch", birds(&["arctic", "common"])));
    mock.push_reply(cursor_reply(0, "zoo.birds", "nextBatch", birds(&["sooty"])));

    let query = Query::new(
        doc! { "kind" => "tern" },
        &doc! { "sort" => doc! { "name" => 1 }, "batchSize" => 2, "limit" => 5 },
    )
    .unwrap();
    let mut cursor = manager.execute_query("zoo.birds", &query, None, None).unwrap();
    assert_eq!(cursor.id(), 77);
    assert_eq!(cursor.server_id(), ServerId(1));

    let all = cursor.to_vec().unwrap();
    assert_eq!(names(&all), vec!["arctic", "common", "sooty"]);
    assert!(cursor.is_dead());

    let commands = mock.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].db, "zoo");
    assert_eq!(
        commands[0].command,
        doc! {
            "find" => "birds",
            "filter" => doc! { "kind" => "tern" },
            "sort" => doc! { "name" => 1 },
            "limit" => 5i64,
            "batchSize" => 2i64,
        }
    );
    assert_eq!(commands[0].read_preference, Some(ReadPreference::primary()));
    assert_eq!(
        commands[1].command,
        doc! { "getMore" => 77i64, "collection" => "birds", "batchSize" => 2i64 }
    );
    assert_eq!(commands[1].server_id, ServerId(1));
}

#[test]
fn test_abandoned_query_cursor_is_killed() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(cursor_reply(9, "zoo.birds", "firstBatch", birds(&["arctic"])));

    let cursor = manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap();
    assert_eq!(cursor.current().unwrap().get_str("name").unwrap(), "arctic");
    drop(cursor);

    assert_eq!(mock.command_names(), vec!["find", "killCursors"]);
    assert_eq!(
        mock.commands()[1].command,
        doc! { "killCursors" => "birds", "cursors" => vec![Value::Int64(9)] }
    );
}

#[test]
fn test_query_uses_manager_defaults() {
    let (manager, mock) = setup_with(
        "mongodb://a.example.com,b.example.com/?replicaSet=rs0&readPreference=secondary&readConcernLevel=majority",
        replica_set(),
    );
    mock.push_reply(cursor_reply(0, "zoo.birds", "firstBatch", Vec::new()));

    let mut cursor = manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap();
    assert!(cursor.advance().unwrap().is_none());
    assert_eq!(cursor.server_id(), ServerId(2));

    let sent = &mock.commands()[0];
    assert_eq!(
        sent.read_preference.as_ref().map(ReadPreference::mode),
        Some(ReadMode::Secondary)
    );
    assert_eq!(
        sent.command.get_document("readConcern").unwrap(),
        &doc! { "level" => "majority" }
    );
}

#[test]
fn test_query_read_concern_overrides_default() {
    let (manager, mock) = setup("mongodb://localhost/?readConcernLevel=majority");
    mock.push_reply(cursor_reply(0, "zoo.birds", "firstBatch", Vec::new()));

    let query = Query::new(doc! {}, &doc! { "readConcern" => doc! { "level" => "local" } }).unwrap();
    manager.execute_query("zoo.birds", &query, None, None).unwrap();
    assert_eq!(
        mock.commands()[0].command.get_document("readConcern").unwrap(),
        &doc! { "level" => "local" }
    );
}

#[test]
fn test_query_server_error_is_classified() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 0, "errmsg" => "operation exceeded time limit", "code" => 50 });

    let err = manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ExecutionTimeout);
    assert_eq!(err.code, Some(50));
    assert_eq!(err.domain, Some(ErrorDomain::Server));
    assert_eq!(err.to_string(), "operation exceeded time limit");
}

#[test]
fn test_slave_ok_query_reads_from_secondary() {
    let (manager, mock) = setup_with("mongodb://a.example.com,b.example.com/?replicaSet=rs0", replica_set());
    mock.push_reply(cursor_reply(0, "zoo.birds", "firstBatch", birds(&["arctic"])));

    let query = Query::new(doc! {}, &doc! { "slaveOk" => true }).unwrap();
    manager.execute_query("zoo.birds", &query, None, None).unwrap();

    let commands = mock.commands();
    assert_eq!(commands[0].server_id, ServerId(2));
    assert_eq!(
        commands[0].read_preference.as_ref().map(ReadPreference::mode),
        Some(ReadMode::SecondaryPreferred)
    );
    assert!(!commands[0].command.contains_key("slaveOk"));
}

#[test]
fn test_exhaust_query_is_refused() {
    let (manager, mock) = setup("mongodb://localhost");
    let query = Query::new(doc! {}, &doc! { "exhaust" => true }).unwrap();
    let err = manager.execute_query("zoo.birds", &query, None, None).unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(err.to_string(), "Exhaust cursors are not supported");
    assert!(mock.commands().is_empty());
}

// ============================================================================
// Legacy queries
// ============================================================================

#[test]
fn test_legacy_server_query_uses_op_query() {
    let (manager, mock) = setup_with("mongodb://old.example.com", legacy_server(ServerKind::Standalone));
    mock.push_op_reply(op_reply(31, &["arctic", "common"]));
    mock.push_op_reply(op_reply(0, &["sooty"]));

    let options = doc! {
        "sort" => doc! { "name" => 1 },
        "projection" => doc! { "_id" => 0 },
        "batchSize" => 2,
        "skip" => 1,
        "noCursorTimeout" => true,
    };
    let query = Query::new(doc! { "kind" => "tern" }, &options).unwrap();
    let mut cursor = manager.execute_query("zoo.birds", &query, None, None).unwrap();
    assert_eq!(cursor.id(), 31);
    assert_eq!(names(&cursor.to_vec().unwrap()), vec!["arctic", "common", "sooty"]);
    assert!(cursor.is_dead());
    assert!(mock.commands().is_empty());

    let sent = mock.legacy_requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].request,
        LegacyRequest::Query(OpQuery {
            flags: QueryFlags::NO_CURSOR_TIMEOUT,
            full_collection_name: "zoo.birds".to_string(),
            number_to_skip: 1,
            number_to_return: 2,
            query: doc! {
                "$query" => doc! { "kind" => "tern" },
                "$orderby" => doc! { "name" => 1 },
            },
            selector: Some(doc! { "_id" => 0 }),
        })
    );
    assert_eq!(
        sent[1].request,
        LegacyRequest::GetMore(OpGetMore {
            full_collection_name: "zoo.birds".to_string(),
            number_to_return: 2,
            cursor_id: 31,
        })
    );
}

#[test]
fn test_legacy_query_limit_kills_cursor() {
    let (manager, mock) = setup_with("mongodb://old.example.com", legacy_server(ServerKind::Standalone));
    mock.push_op_reply(op_reply(44, &["arctic", "common"]));

    let query = Query::new(doc! {}, &doc! { "limit" => 2 }).unwrap();
    let cursor = manager.execute_query("zoo.birds", &query, None, None).unwrap();
    let all: Vec<Document> = cursor.into_iter().map(|d| d.unwrap()).collect();
    assert_eq!(names(&all), vec!["arctic", "common"]);

    let sent = mock.legacy_requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1].request,
        LegacyRequest::KillCursors(OpKillCursors { cursor_ids: vec![44] })
    );
}

#[test]
fn test_legacy_mongos_query_carries_read_preference() {
    let (manager, mock) = setup_with(
        "mongodb://old.example.com/?readPreference=nearest",
        legacy_server(ServerKind::Mongos),
    );
    mock.push_op_reply(op_reply(0, &["arctic"]));

    manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap();
    let LegacyRequest::Query(op) = &mock.legacy_requests()[0].request else {
        panic!("expected an OP_QUERY");
    };
    assert!(op.flags.contains(QueryFlags::SLAVE_OK));
    assert_eq!(
        op.query,
        doc! { "$query" => doc! {}, "$readPreference" => doc! { "mode" => "nearest" } }
    );
}

#[test]
fn test_legacy_query_failure_is_classified() {
    let (manager, mock) = setup_with("mongodb://old.example.com", legacy_server(ServerKind::Standalone));
    mock.push_op_reply(OpReply {
        response_flags: OpReply::QUERY_FAILURE,
        cursor_id: 0,
        starting_from: 0,
        documents: vec![doc! { "$err" => "bad query", "code" => 17287 }],
    });

    let err = manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap_err();
    assert_eq!(err.code, Some(17287));
    assert_eq!(err.domain, Some(ErrorDomain::Server));
    assert_eq!(err.to_string(), "bad query");
}

#[test]
fn test_legacy_server_rejects_read_concern() {
    let (manager, mock) = setup_with(
        "mongodb://old.example.com/?readConcernLevel=majority",
        legacy_server(ServerKind::Standalone),
    );
    let err = manager
        .execute_query("zoo.birds", &Query::with_filter(doc! {}), None, None)
        .unwrap_err();
    assert_eq!(err.code, Some(codes::PROTOCOL_BAD_WIRE_VERSION));
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(mock.legacy_requests().is_empty());
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_command_with_plain_reply() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 1.0, "n" => 3 });

    let command = Command::new(doc! { "count" => "birds", "query" => doc! {} });
    let mut cursor = manager.execute_command("zoo", &command, None, None).unwrap();
    assert_eq!(cursor.id(), 0);
    assert_eq!(cursor.namespace().to_string(), "zoo.$cmd");

    let replies = cursor.to_vec().unwrap();
    assert_eq!(replies, vec![doc! { "ok" => 1.0, "n" => 3 }]);
    assert_eq!(mock.commands()[0].read_preference, None);
}

#[test]
fn test_command_with_cursor_reply() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(cursor_reply(5, "zoo.birds", "firstBatch", birds(&["arctic"])));
    mock.push_reply(cursor_reply(0, "zoo.birds", "nextBatch", birds(&["roseate"])));

    let command = Command::new(doc! {
        "aggregate" => "birds",
        "pipeline" => Vec::<Value>::new(),
        "cursor" => doc! {},
    });
    let cursor = manager.execute_command("zoo", &command, None, None).unwrap();
    let collected: tern::Result<Vec<Document>> = cursor.into_iter().collect();
    assert_eq!(names(&collected.unwrap()), vec!["arctic", "roseate"]);
    assert_eq!(mock.command_names(), vec!["aggregate", "getMore"]);
}

#[test]
fn test_command_server_hint() {
    let (manager, mock) = setup_with("mongodb://a.example.com,b.example.com/?replicaSet=rs0", replica_set());
    mock.push_reply(doc! { "ok" => 1 });

    manager
        .execute_command(
            "admin",
            &Command::new(doc! { "ping" => 1 }),
            Some(ReadPreference::secondary_preferred()),
            Some(ServerId(2)),
        )
        .unwrap();
    assert_eq!(mock.commands()[0].server_id, ServerId(2));

    let err = manager
        .execute_command("admin", &Command::new(doc! { "ping" => 1 }), None, Some(ServerId(9)))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert_eq!(err.domain, Some(ErrorDomain::ServerSelection));
}

#[test]
fn test_command_transport_failure() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_error(TransportError::connect("connection refused"));

    let err = manager
        .execute_command("admin", &Command::new(doc! { "ping" => 1 }), None, None)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionFailed);
    assert!(err.is_connection_error());
}

// ============================================================================
// Bulk writes
// ============================================================================

#[test]
fn test_mixed_ordered_bulk() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 1, "n" => 2 });
    mock.push_reply(doc! { "ok" => 1, "n" => 1, "nModified" => 1 });
    mock.push_reply(doc! { "ok" => 1, "n" => 1 });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1, "name" => "arctic" }).unwrap();
    bulk.insert(doc! { "_id" => 2, "name" => "common" }).unwrap();
    bulk.update(
        doc! { "_id" => 1 },
        doc! { "$set" => doc! { "seen" => true } },
        &doc! {},
    )
    .unwrap();
    bulk.delete(doc! { "_id" => 2 }, &doc! { "limit" => 1 }).unwrap();

    let result = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap();
    assert!(bulk.is_executed());
    assert_eq!(result.inserted_count(), Some(2));
    assert_eq!(result.matched_count(), Some(1));
    assert_eq!(result.modified_count(), Some(1));
    assert_eq!(result.deleted_count(), Some(1));
    assert_eq!(result.upserted_count(), Some(0));
    assert!(!result.has_errors());
    assert_eq!(result.server_id(), ServerId(1));

    let commands = mock.commands();
    assert_eq!(mock.command_names(), vec!["insert", "update", "delete"]);
    assert!(commands.iter().all(|c| c.db == "zoo" && c.server_id == ServerId(1)));
    assert_eq!(commands[0].command.get_array("documents").unwrap().len(), 2);
    assert_eq!(commands[0].command.get_bool("ordered").unwrap(), true);
    assert!(!commands[0].command.contains_key("writeConcern"));
}

#[test]
fn test_ordered_bulk_stops_at_write_error() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! {
        "ok" => 1,
        "n" => 0,
        "writeErrors" => vec![Value::from(doc! {
            "index" => 0,
            "code" => 11000,
            "errmsg" => "E11000 duplicate key error",
        })],
    });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    bulk.delete(doc! { "_id" => 1 }, &doc! {}).unwrap();
    bulk.insert(doc! { "_id" => 2 }).unwrap();

    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    assert!(err.is_write_failed());
    assert_eq!(err.code, Some(11000));
    assert_eq!(err.domain, Some(ErrorDomain::Command));
    assert_eq!(err.to_string(), "E11000 duplicate key error");

    let result = err.write_result().unwrap();
    assert_eq!(result.inserted_count(), Some(0));
    assert_eq!(result.write_errors().len(), 1);
    assert_eq!(result.write_errors()[0].index, 0);
    assert_eq!(mock.command_names(), vec!["insert"]);
}

#[test]
fn test_unordered_bulk_continues_and_remaps_indices() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! {
        "ok" => 1,
        "n" => 1,
        "writeErrors" => vec![Value::from(doc! {
            "index" => 1,
            "code" => 11000,
            "errmsg" => "E11000 duplicate key error",
        })],
    });
    mock.push_reply(doc! { "ok" => 1, "n" => 1 });

    let mut bulk = BulkWrite::new(false);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    bulk.delete(doc! { "_id" => 3 }, &doc! {}).unwrap();
    bulk.insert(doc! { "_id" => 1 }).unwrap();

    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    let result = err.write_result().unwrap();
    assert_eq!(result.write_errors()[0].index, 2);
    assert_eq!(result.inserted_count(), Some(1));
    assert_eq!(result.deleted_count(), Some(1));
    assert_eq!(mock.command_names(), vec!["insert", "delete"]);
    assert_eq!(
        mock.commands()[0].command.get_bool("ordered").unwrap(),
        false
    );
}

#[test]
fn test_write_concern_error() {
    let (manager, mock) = setup("mongodb://localhost/?w=majority&wtimeoutMS=100");
    mock.push_reply(doc! {
        "ok" => 1,
        "n" => 1,
        "writeConcernError" => doc! { "code" => 64, "errmsg" => "waiting for replication timed out" },
    });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    assert!(err.is_write_failed());
    assert_eq!(err.domain, Some(ErrorDomain::WriteConcern));
    assert_eq!(err.code, Some(64));

    let result = err.write_result().unwrap();
    assert_eq!(result.inserted_count(), Some(1));
    assert_eq!(
        result.write_concern_error().unwrap().message,
        "waiting for replication timed out"
    );
    assert_eq!(
        mock.commands()[0].command.get_document("writeConcern").unwrap(),
        &doc! { "w" => "majority", "wtimeout" => 100 }
    );
}

#[test]
fn test_unacknowledged_write() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 1 });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    let result = manager
        .execute_write("zoo.birds", &mut bulk, Some(&WriteConcern::unacknowledged()), None)
        .unwrap();
    assert!(!result.is_acknowledged());
    assert_eq!(result.inserted_count(), None);
    assert_eq!(
        mock.commands()[0].command.get_document("writeConcern").unwrap(),
        &doc! { "w" => 0 }
    );
}

#[test]
fn test_command_failure_during_write() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 0, "errmsg" => "not master", "code" => 10107 });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    assert!(err.is_write_failed());
    assert_eq!(err.code, Some(10107));
    assert_eq!(err.domain, Some(ErrorDomain::Command));
    assert_eq!(err.to_string(), "not master");
    assert_eq!(err.write_result().unwrap().inserted_count(), Some(0));
}

#[test]
fn test_command_failure_during_unacknowledged_write() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 0, "errmsg" => "not master", "code" => 10107 });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    let err = manager
        .execute_write("zoo.birds", &mut bulk, Some(&WriteConcern::unacknowledged()), None)
        .unwrap_err();
    assert!(err.is_write_failed());
    assert_eq!(err.code, Some(10107));
    assert_eq!(err.domain, Some(ErrorDomain::Command));

    let result = err.write_result().unwrap();
    assert!(!result.is_acknowledged());
    assert_eq!(result.inserted_count(), None);
}

#[test]
fn test_transport_failure_during_write_is_not_a_write_error() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_error(TransportError::socket("Failed to send \"insert\" command"));

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionTimeout);
    assert!(err.write_result().is_none());
}

#[test]
fn test_empty_bulk_is_rejected() {
    let (manager, mock) = setup("mongodb://localhost");
    let mut bulk = BulkWrite::default();
    let err = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(err.to_string(), "Cannot do an empty bulk write");
    assert!(mock.commands().is_empty());
}

#[test]
fn test_bulk_can_be_executed_again() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 1, "n" => 1 });
    mock.push_reply(doc! { "ok" => 1, "n" => 1 });

    let mut bulk = BulkWrite::new(true);
    bulk.insert(doc! { "_id" => 1 }).unwrap();
    manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap();
    manager.execute_write("zoo.other", &mut bulk, None, None).unwrap();

    let scratch = bulk.scratch().unwrap();
    assert_eq!(scratch.collection, "other");
    assert_eq!(scratch.batches.len(), 1);
    assert_eq!(mock.commands()[1].command.get_str("insert").unwrap(), "other");
}

#[test]
fn test_large_bulk_is_split() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! { "ok" => 1, "n" => 1000 });
    mock.push_reply(doc! { "ok" => 1, "n" => 1 });

    let mut bulk = BulkWrite::new(true);
    for i in 0..1001 {
        bulk.insert(doc! { "_id" => i }).unwrap();
    }
    let result = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap();
    assert_eq!(result.inserted_count(), Some(1001));

    let commands = mock.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0].command.get_array("documents").unwrap().len(), 1000);
    assert_eq!(commands[1].command.get_array("documents").unwrap().len(), 1);
}

#[test]
fn test_upserts_are_reported() {
    let (manager, mock) = setup("mongodb://localhost");
    mock.push_reply(doc! {
        "ok" => 1,
        "n" => 2,
        "nModified" => 1,
        "upserted" => vec![Value::from(doc! { "index" => 1, "_id" => "gull" })],
    });

    let mut bulk = BulkWrite::new(true);
    let options = doc! { "upsert" => true };
    bulk.update(doc! { "_id" => "tern" }, doc! { "$inc" => doc! { "n" => 1 } }, &options)
        .unwrap();
    bulk.update(doc! { "_id" => "gull" }, doc! { "$inc" => doc! { "n" => 1 } }, &options)
        .unwrap();

    let result = manager.execute_write("zoo.birds", &mut bulk, None, None).unwrap();
    assert_eq!(result.matched_count(), Some(1));
    assert_eq!(result.upserted_count(), Some(1));
    assert_eq!(result.upserted_ids()[0].index, 1);
    assert_eq!(result.upserted_ids()[0].id, Value::from("gull"));
}
