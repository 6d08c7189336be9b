//! Query construction.
//!
//! A [`Query`] is built from a filter and an options document. It keeps the
//! legacy wire form of the filter (`{<modifiers>, $query, $orderby}`) along
//! with the flags, limits and projection, and can translate itself into a
//! `find` command for servers that speak the command protocol.
//!
//! ```rust
//! use tern_bson::doc;
//! use tern_driver::query::{Query, QueryFlags};
//!
//! let query = Query::new(
//!     doc! { "age" => doc! { "$gte" => 21 } },
//!     &doc! { "sort" => doc! { "name" => 1 }, "limit" => 10, "tailable" => true },
//! )
//! .unwrap();
//!
//! assert_eq!(query.limit(), 10);
//! assert!(query.flags().contains(QueryFlags::TAILABLE_CURSOR));
//! assert_eq!(
//!     query.wire_filter().keys().collect::<Vec<_>>(),
//!     vec!["$query", "$orderby"]
//! );
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tern_bson::{Document, Value};

use crate::concern::{ReadConcern, ReadMode, ReadPreference};
use crate::error::{Error, Result};

/// Legacy OP_QUERY flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryFlags(u32);

impl QueryFlags {
    pub const NONE: Self = Self(0);
    pub const TAILABLE_CURSOR: Self = Self(1 << 1);
    pub const SLAVE_OK: Self = Self(1 << 2);
    pub const OPLOG_REPLAY: Self = Self(1 << 3);
    pub const NO_CURSOR_TIMEOUT: Self = Self(1 << 4);
    pub const AWAIT_DATA: Self = Self(1 << 5);
    pub const EXHAUST: Self = Self(1 << 6);
    pub const PARTIAL: Self = Self(1 << 7);

    const NAMED: [(&'static str, Self); 7] = [
        ("tailable", Self::TAILABLE_CURSOR),
        ("slaveOk", Self::SLAVE_OK),
        ("oplogReplay", Self::OPLOG_REPLAY),
        ("noCursorTimeout", Self::NO_CURSOR_TIMEOUT),
        ("awaitData", Self::AWAIT_DATA),
        ("exhaust", Self::EXHAUST),
        ("partial", Self::PARTIAL),
    ];

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Collect flags from the boolean options of the same names.
    pub fn from_options(options: &Document) -> Self {
        Self::NAMED
            .iter()
            .filter(|(name, _)| options.find_as_bool(name, false))
            .fold(Self::NONE, |acc, (_, flag)| acc | *flag)
    }
}

impl BitOr for QueryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for QueryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "QueryFlags({})", names.join(" | "))
    }
}

/// Legacy query modifiers and the `find` command fields they become.
const MODIFIER_FIELDS: [(&str, &str); 9] = [
    ("$hint", "hint"),
    ("$comment", "comment"),
    ("$maxTimeMS", "maxTimeMS"),
    ("$max", "max"),
    ("$min", "min"),
    ("$returnKey", "returnKey"),
    ("$showDiskLoc", "showRecordId"),
    ("$snapshot", "snapshot"),
    ("$maxScan", "maxScan"),
];

/// `numberToReturn` for a legacy query or get-more once `returned`
/// documents have arrived. Zero asks for the server's default batch.
pub(crate) fn number_to_return(limit: i32, batch_size: i32, returned: i32) -> i32 {
    if limit < 0 {
        return limit;
    }
    let batch_size = batch_size.max(0);
    if limit == 0 {
        return batch_size;
    }
    let remaining = limit.saturating_sub(returned).max(0);
    if batch_size == 0 || remaining < batch_size {
        remaining
    } else {
        batch_size
    }
}

/// A validated query ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    filter: Document,
    selector: Option<Document>,
    flags: QueryFlags,
    skip: i32,
    limit: i32,
    batch_size: i32,
    read_concern: Option<ReadConcern>,
}

/// An option that must be a document or an array; arrays become documents
/// keyed by position.
fn document_option(options: &Document, key: &str) -> Result<Option<Document>> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::Document(d)) => Ok(Some(d.clone())),
        Some(Value::Array(items)) => Ok(Some(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
        )),
        Some(other) => Err(Error::invalid_argument(format!(
            "Expected {} to be array or object, {} given",
            key,
            other.element_type() as u8
        ))),
    }
}

fn read_concern_option(options: &Document) -> Result<Option<ReadConcern>> {
    match options.get("readConcern") {
        None => Ok(None),
        Some(Value::Document(d)) => match d.get("level") {
            None => Ok(Some(ReadConcern::default())),
            Some(Value::String(level)) => Ok(Some(ReadConcern::with_level(level.as_str()))),
            Some(other) => Err(Error::invalid_argument(format!(
                "Expected readConcern level to be string, {} given",
                other.element_type() as u8
            ))),
        },
        Some(other) => Err(Error::invalid_argument(format!(
            "Expected readConcern to be a document, {} given",
            other.element_type() as u8
        ))),
    }
}

impl Query {
    /// Build a query from a filter and options.
    ///
    /// Recognised options: `batchSize`, `limit`, `skip` (int32), the flag
    /// booleans, `modifiers`, `projection`, `sort` and `readConcern`.
    pub fn new(filter: Document, options: &Document) -> Result<Self> {
        let batch_size = options.find_as_int32("batchSize", 0);
        let limit = options.find_as_int32("limit", 0);
        let skip = options.find_as_int32("skip", 0);
        let flags = QueryFlags::from_options(options);

        let mut wire = document_option(options, "modifiers")?.unwrap_or_default();
        let selector = document_option(options, "projection")?;
        let sort = document_option(options, "sort")?;
        let read_concern = read_concern_option(options)?;
        wire.append("$query", filter);
        if let Some(sort) = sort {
            wire.append("$orderby", sort);
        }

        Ok(Self {
            filter: wire,
            selector,
            flags,
            skip,
            limit,
            batch_size,
            read_concern,
        })
    }

    /// A query with no options.
    pub fn with_filter(filter: Document) -> Self {
        let mut wire = Document::new();
        wire.append("$query", filter);
        Self {
            filter: wire,
            selector: None,
            flags: QueryFlags::NONE,
            skip: 0,
            limit: 0,
            batch_size: 0,
            read_concern: None,
        }
    }

    /// The wire filter: modifiers, `$query`, then `$orderby`.
    pub fn wire_filter(&self) -> &Document {
        &self.filter
    }

    /// The caller's filter.
    pub fn filter(&self) -> Option<&Document> {
        self.filter.get("$query").and_then(Value::as_document)
    }

    /// The sort specification, if one was given.
    pub fn sort(&self) -> Option<&Document> {
        self.filter.get("$orderby").and_then(Value::as_document)
    }

    pub fn projection(&self) -> Option<&Document> {
        self.selector.as_ref()
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn skip(&self) -> i32 {
        self.skip
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn batch_size(&self) -> i32 {
        self.batch_size
    }

    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    /// `numberToReturn` for the initial legacy `OP_QUERY`.
    pub fn number_to_return(&self) -> i32 {
        number_to_return(self.limit, self.batch_size, 0)
    }

    /// The read preference the query runs with.
    ///
    /// The `slaveOk` flag turns a primary read preference into
    /// `secondaryPreferred`; any other preference is kept.
    pub fn read_preference_for(&self, read_preference: ReadPreference) -> ReadPreference {
        if self.flags.contains(QueryFlags::SLAVE_OK) && read_preference.mode() == ReadMode::Primary {
            ReadPreference::secondary_preferred()
        } else {
            read_preference
        }
    }

    /// Translate into a `find` command against `collection`.
    ///
    /// `read_concern` is used when the query carries none of its own. The
    /// `slaveOk` flag has no command field and acts through
    /// [`read_preference_for`](Self::read_preference_for); `exhaust` is
    /// refused at execution.
    pub fn to_find_command(&self, collection: &str, read_concern: &ReadConcern) -> Document {
        let mut cmd = Document::new();
        cmd.append("find", collection);
        cmd.append(
            "filter",
            self.filter().cloned().unwrap_or_default(),
        );
        if let Some(sort) = self.sort() {
            cmd.append("sort", sort.clone());
        }
        if let Some(projection) = &self.selector {
            cmd.append("projection", projection.clone());
        }
        if self.skip > 0 {
            cmd.append("skip", i64::from(self.skip));
        }
        if self.limit != 0 {
            cmd.append("limit", i64::from(self.limit).abs());
        }
        if self.limit < 0 {
            cmd.append("singleBatch", true);
        }
        if self.batch_size > 0 {
            cmd.append("batchSize", i64::from(self.batch_size));
        }

        for (flag, field) in [
            (QueryFlags::TAILABLE_CURSOR, "tailable"),
            (QueryFlags::AWAIT_DATA, "awaitData"),
            (QueryFlags::NO_CURSOR_TIMEOUT, "noCursorTimeout"),
            (QueryFlags::OPLOG_REPLAY, "oplogReplay"),
            (QueryFlags::PARTIAL, "allowPartialResults"),
        ] {
            if self.flags.contains(flag) {
                cmd.append(field, true);
            }
        }

        for (modifier, field) in MODIFIER_FIELDS {
            if let Some(value) = self.filter.get(modifier) {
                cmd.append(field, value.clone());
            }
        }

        let effective = self.read_concern.as_ref().unwrap_or(read_concern);
        if !effective.is_default() {
            cmd.append("readConcern", effective.to_document());
        }
        cmd
    }
}
