//! Fuzz target for query construction from option documents.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_query_options
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tern_bson::{Document, Value};
use tern_driver::namespace::Namespace;
use tern_driver::wire::OpQuery;
use tern_driver::{Query, ReadConcern};

/// A fuzzable option value.
#[derive(Debug, Arbitrary)]
enum FuzzValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Document(Vec<(String, i32)>),
    Array(Vec<i32>),
}

impl From<FuzzValue> for Value {
    fn from(value: FuzzValue) -> Self {
        match value {
            FuzzValue::Null => Value::Null,
            FuzzValue::Bool(b) => Value::Boolean(b),
            FuzzValue::Int32(i) => Value::Int32(i),
            FuzzValue::Int64(i) => Value::Int64(i),
            FuzzValue::Double(f) => Value::Double(f),
            FuzzValue::String(s) => Value::String(s),
            FuzzValue::Document(pairs) => Value::Document(pairs.into_iter().collect()),
            FuzzValue::Array(items) => Value::Array(items.into_iter().map(Value::Int32).collect()),
        }
    }
}

const OPTION_KEYS: &[&str] = &[
    "sort",
    "projection",
    "modifiers",
    "limit",
    "skip",
    "batchSize",
    "tailable",
    "awaitData",
    "readConcern",
];

#[derive(Debug, Arbitrary)]
struct Input {
    options: Vec<(u8, FuzzValue)>,
}

fuzz_target!(|input: Input| {
    let mut options = Document::new();
    for (key, value) in input.options {
        let key = OPTION_KEYS[key as usize % OPTION_KEYS.len()];
        options.append(key, Value::from(value));
    }

    if let Ok(query) = Query::new(Document::new(), &options) {
        let command = query.to_find_command("fuzz", &ReadConcern::default());
        assert_eq!(command.first_key(), Some("find"));

        let op = OpQuery::find(&Namespace::new("db", "fuzz"), &query, false);
        assert!(op.query.contains_key("$query"));
        if query.limit() < 0 {
            assert_eq!(op.number_to_return, query.limit());
        }
        let _ = op.encode(1);
    }
});
