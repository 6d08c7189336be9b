//! Integration tests for the BSON codec and wire framing.
//!
//! These tests verify that:
//! - User structs survive the trip through documents and bytes
//! - Extended JSON filters produce the expected commands
//! - Commands framed as `OP_MSG` decode back to the same document

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use tern::bson::{
    DateTime, Decimal128, Document, ObjectId, Value, from_document, from_json, to_document,
};
use tern::doc;
use tern::driver::wire::{HEADER_LEN, MessageHeader, OpCode, OpMsg, reply_body};
use tern::driver::{ErrorKind, Query};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sighting {
    #[serde(rename = "_id")]
    id: ObjectId,
    species: String,
    count: i64,
    weight: Decimal128,
    seen_at: DateTime,
    notes: Option<String>,
}

fn sighting() -> Sighting {
    Sighting {
        id: ObjectId::parse_str("64b7f0c2a1b2c3d4e5f60718").unwrap(),
        species: "arctic tern".to_string(),
        count: 12,
        weight: "0.110".parse().unwrap(),
        seen_at: DateTime::from_millis(1_689_000_000_000),
        notes: None,
    }
}

#[test]
fn test_struct_through_bytes() {
    let document = to_document(&sighting()).unwrap();
    assert_eq!(document.get_object_id("_id").unwrap(), sighting().id);
    assert_eq!(document.get("weight"), Some(&Value::Decimal128("0.110".parse().unwrap())));
    assert_eq!(document.get("notes"), Some(&Value::Null));

    let bytes = document.to_bytes().unwrap();
    let decoded = Document::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, document);

    let back: Sighting = from_document(decoded).unwrap();
    assert_eq!(back, sighting());
}

#[test]
fn test_extended_json_filter_to_find_command() {
    let filter = from_json(
        r#"{"_id": {"$oid": "64b7f0c2a1b2c3d4e5f60718"}, "count": {"$gte": {"$numberLong": "10"}}}"#,
    )
    .unwrap();
    let query = Query::new(filter, &doc! { "projection" => doc! { "species" => 1 } }).unwrap();
    let command = query.to_find_command("sightings", &Default::default());

    assert_eq!(
        command.to_canonical_json(),
        concat!(
            r#"{"find":"sightings","#,
            r#""filter":{"_id":{"$oid":"64b7f0c2a1b2c3d4e5f60718"},"count":{"$gte":{"$numberLong":"10"}}},"#,
            r#""projection":{"species":{"$numberInt":"1"}}}"#
        )
    );
}

#[test]
fn test_command_framed_as_op_msg() {
    let body = doc! {
        "insert" => "sightings",
        "documents" => vec![Value::from(to_document(&sighting()).unwrap())],
        "$db" => "zoo",
    };
    let bytes = OpMsg::new(body.clone()).encode(42).unwrap();

    let header = MessageHeader::parse(&bytes[..HEADER_LEN]).unwrap();
    assert_eq!(header.length as usize, bytes.len());
    assert_eq!(header.request_id, 42);
    assert_eq!(header.op_code, OpCode::Msg);

    let payload = &bytes[HEADER_LEN..];
    assert_eq!(OpMsg::decode(payload).unwrap().body, body);
    assert_eq!(
        Document::from_bytes(reply_body(OpCode::Msg, payload).unwrap()).unwrap(),
        body
    );
}

#[test]
fn test_malformed_bytes_are_unexpected_values() {
    let mut bytes = doc! { "ok" => 1 }.to_bytes().unwrap();
    bytes.truncate(bytes.len() - 1);

    let err: tern::Error = Document::from_bytes(&bytes).unwrap_err().into();
    assert_eq!(err.kind, ErrorKind::UnexpectedValue);
}
