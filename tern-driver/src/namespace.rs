//! Database and collection namespaces.

use std::fmt;

use crate::error::{Error, Result};

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Parse `db.coll`, splitting on the first dot.
    pub fn parse(ns: &str) -> Result<Self> {
        let (db, coll) = split_namespace(ns)?;
        Ok(Self::new(db, coll))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Split a namespace into its database and collection parts.
///
/// Only the first dot separates; the collection may contain more dots.
pub fn split_namespace(ns: &str) -> Result<(&str, &str)> {
    ns.split_once('.')
        .ok_or_else(|| Error::invalid_argument(format!("Invalid namespace provided: {}", ns)))
}
