//! Conversion between serde types and documents.
//!
//! Values travel through their Extended JSON form, so BSON-specific types
//! (ObjectId, Decimal128, dates, binary data) keep their type when they are
//! embedded in user structs.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::json::{JsonMode, document_to_json, json_to_value, value_to_json};
use crate::oid::ObjectId;
use crate::value::{Binary, DateTime, JavaScriptCodeWithScope, Regex, Timestamp, Value};

/// Serialize a value into a document.
///
/// Fails when `value` does not serialize to a map or struct.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document> {
    match to_value(value)? {
        Value::Document(doc) => Ok(doc),
        other => Err(Error::serde(format!(
            "expected a map or struct, found {}",
            other.type_name()
        ))),
    }
}

/// Serialize any value into a BSON value.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    let json = serde_json::to_value(value).map_err(|e| Error::serde(e.to_string()))?;
    json_to_value(json)
}

/// Deserialize a document into `T`.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(document_to_json(&doc, JsonMode::Relaxed))
        .map_err(|e| Error::serde(e.to_string()))
}

/// Deserialize a single value into `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value_to_json(&value, JsonMode::Relaxed))
        .map_err(|e| Error::serde(e.to_string()))
}

macro_rules! serde_via_extended_json {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                value_to_json(&Value::$variant(self.clone()), JsonMode::Canonical).serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                match json_to_value(Json::deserialize(deserializer)?).map_err(D::Error::custom)? {
                    Value::$variant(v) => Ok(v),
                    other => Err(D::Error::custom(format!(
                        "expected {}, found {}",
                        $expected,
                        other.type_name()
                    ))),
                }
            }
        }
    };
}

serde_via_extended_json!(ObjectId, ObjectId, "an ObjectId");
serde_via_extended_json!(Decimal128, Decimal128, "a Decimal128");
serde_via_extended_json!(DateTime, DateTime, "a date");
serde_via_extended_json!(Binary, Binary, "binary data");
serde_via_extended_json!(Timestamp, Timestamp, "a timestamp");
serde_via_extended_json!(Regex, Regex, "a regular expression");
serde_via_extended_json!(JavaScriptCodeWithScope, JavaScriptCodeWithScope, "code with scope");
serde_via_extended_json!(Document, Document, "a document");

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        value_to_json(self, JsonMode::Canonical).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        json_to_value(Json::deserialize(deserializer)?).map_err(D::Error::custom)
    }
}
