//! MongoDB Extended JSON v2.
//!
//! Canonical mode wraps every non-JSON-native type so the BSON type survives a
//! round trip. Relaxed mode writes plain JSON numbers for integers and finite
//! doubles and ISO-8601 strings for dates between 1970 and 9999.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Datelike, SecondsFormat};
use serde_json::{Map, Number, Value as Json, json};

use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::oid::ObjectId;
use crate::value::{
    Binary, BinarySubtype, DateTime, JavaScriptCodeWithScope, Regex, Timestamp, Value,
};

/// Output flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    Canonical,
    Relaxed,
}

/// Canonical Extended JSON text for a document.
pub fn to_canonical_json(doc: &Document) -> String {
    document_to_json(doc, JsonMode::Canonical).to_string()
}

/// Relaxed Extended JSON text for a document.
pub fn to_relaxed_json(doc: &Document) -> String {
    document_to_json(doc, JsonMode::Relaxed).to_string()
}

/// Parse Extended JSON (canonical, relaxed or legacy `$date` numbers) into a
/// document. The top-level value must be an object.
pub fn from_json(text: &str) -> Result<Document> {
    let json: Json = serde_json::from_str(text)?;
    match json {
        Json::Object(map) => object_to_document(map),
        other => Err(Error::json(format!(
            "top-level value must be an object, found {}",
            json_type_name(&other)
        ))),
    }
}

/// Convert a document into a JSON tree.
pub fn document_to_json(doc: &Document, mode: JsonMode) -> Json {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        // First occurrence wins, matching lookup semantics.
        if !map.contains_key(key) {
            map.insert(key.to_string(), value_to_json(value, mode));
        }
    }
    Json::Object(map)
}

/// Convert a single value into a JSON tree.
pub fn value_to_json(value: &Value, mode: JsonMode) -> Json {
    let relaxed = mode == JsonMode::Relaxed;
    match value {
        Value::Double(v) => {
            if relaxed && v.is_finite() {
                if let Some(n) = Number::from_f64(*v) {
                    return Json::Number(n);
                }
            }
            json!({ "$numberDouble": format_double(*v) })
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Document(d) => document_to_json(d, mode),
        Value::Array(items) => Json::Array(items.iter().map(|v| value_to_json(v, mode)).collect()),
        Value::Binary(bin) => json!({
            "$binary": {
                "base64": BASE64.encode(&bin.bytes),
                "subType": format!("{:02x}", u8::from(bin.subtype)),
            }
        }),
        Value::ObjectId(oid) => json!({ "$oid": oid.to_hex() }),
        Value::Boolean(b) => Json::Bool(*b),
        Value::DateTime(dt) => {
            let millis = dt.timestamp_millis();
            if relaxed {
                if let Some(chrono_dt) = dt.to_chrono() {
                    if (1970..=9999).contains(&chrono_dt.year()) {
                        return json!({
                            "$date": chrono_dt.to_rfc3339_opts(SecondsFormat::Millis, true)
                        });
                    }
                }
            }
            json!({ "$date": { "$numberLong": millis.to_string() } })
        }
        Value::Null => Json::Null,
        Value::Regex(re) => json!({
            "$regularExpression": { "pattern": re.pattern, "options": re.options }
        }),
        Value::JavaScriptCode(code) => json!({ "$code": code }),
        Value::JavaScriptCodeWithScope(cws) => json!({
            "$code": cws.code,
            "$scope": document_to_json(&cws.scope, mode),
        }),
        Value::Int32(v) => {
            if relaxed {
                Json::from(*v)
            } else {
                json!({ "$numberInt": v.to_string() })
            }
        }
        Value::Timestamp(ts) => json!({ "$timestamp": { "t": ts.time, "i": ts.increment } }),
        Value::Int64(v) => {
            if relaxed {
                Json::from(*v)
            } else {
                json!({ "$numberLong": v.to_string() })
            }
        }
        Value::Decimal128(d) => json!({ "$numberDecimal": d.to_string() }),
        Value::MinKey => json!({ "$minKey": 1 }),
        Value::MaxKey => json!({ "$maxKey": 1 }),
    }
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        format!("{:?}", v)
    }
}

/// Convert a JSON tree into a BSON value, recognising Extended JSON wrappers.
pub fn json_to_value(json: Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => number_to_value(&n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(
            items
                .into_iter()
                .map(json_to_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        Json::Object(map) => match parse_wrapper(&map)? {
            Some(value) => value,
            None => Value::Document(plain_object(map)?),
        },
    })
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Value::Int32(small),
            Err(_) => Value::Int64(i),
        }
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn object_to_document(map: Map<String, Json>) -> Result<Document> {
    match parse_wrapper(&map)? {
        Some(value) => Err(Error::json(format!(
            "top-level value must be a document, found {}",
            value.type_name()
        ))),
        None => plain_object(map),
    }
}

fn plain_object(map: Map<String, Json>) -> Result<Document> {
    let mut doc = Document::with_capacity(map.len());
    for (key, value) in map {
        doc.append(key, json_to_value(value)?);
    }
    Ok(doc)
}

fn json_type_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn expect_str<'a>(json: &'a Json, what: &str) -> Result<&'a str> {
    json.as_str()
        .ok_or_else(|| Error::json(format!("{} must be a string", what)))
}

fn expect_object<'a>(json: &'a Json, what: &str) -> Result<&'a Map<String, Json>> {
    json.as_object()
        .ok_or_else(|| Error::json(format!("{} must be an object", what)))
}

fn expect_u32(json: Option<&Json>, what: &str) -> Result<u32> {
    json.and_then(Json::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::json(format!("{} must be an unsigned 32-bit integer", what)))
}

/// Recognise a single Extended JSON wrapper object. `Ok(None)` means the
/// object is an ordinary document (including query operators such as `$gt`).
fn parse_wrapper(map: &Map<String, Json>) -> Result<Option<Value>> {
    let mut keys = map.keys();
    let (Some(first), second) = (keys.next(), keys.next()) else {
        return Ok(None);
    };
    if !first.starts_with('$') {
        return Ok(None);
    }

    if map.len() == 2 {
        if let (Some(code), Some(scope)) = (map.get("$code"), map.get("$scope")) {
            let scope = match json_to_value(scope.clone())? {
                Value::Document(d) => d,
                _ => return Err(Error::json("$scope must be a document")),
            };
            return Ok(Some(Value::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                code: expect_str(code, "$code")?.to_string(),
                scope,
            })));
        }
        return Ok(None);
    }
    if second.is_some() {
        return Ok(None);
    }

    let body = &map[first.as_str()];
    let value = match first.as_str() {
        "$oid" => Value::ObjectId(ObjectId::parse_str(expect_str(body, "$oid")?)?),
        "$numberInt" => Value::Int32(
            expect_str(body, "$numberInt")?
                .parse()
                .map_err(|_| Error::json("$numberInt is not a 32-bit integer"))?,
        ),
        "$numberLong" => Value::Int64(
            expect_str(body, "$numberLong")?
                .parse()
                .map_err(|_| Error::json("$numberLong is not a 64-bit integer"))?,
        ),
        "$numberDouble" => Value::Double(parse_double(expect_str(body, "$numberDouble")?)?),
        "$numberDecimal" => {
            Value::Decimal128(expect_str(body, "$numberDecimal")?.parse::<Decimal128>()?)
        }
        "$binary" => {
            let inner = expect_object(body, "$binary")?;
            let data = inner
                .get("base64")
                .ok_or_else(|| Error::json("$binary is missing base64"))?;
            let subtype = inner
                .get("subType")
                .ok_or_else(|| Error::json("$binary is missing subType"))?;
            let bytes = BASE64
                .decode(expect_str(data, "$binary.base64")?)
                .map_err(|e| Error::json(format!("$binary.base64: {}", e)))?;
            let subtype = u8::from_str_radix(expect_str(subtype, "$binary.subType")?, 16)
                .map_err(|_| Error::json("$binary.subType must be a hex byte"))?;
            Value::Binary(Binary {
                subtype: BinarySubtype::from(subtype),
                bytes,
            })
        }
        "$date" => Value::DateTime(parse_date(body)?),
        "$timestamp" => {
            let inner = expect_object(body, "$timestamp")?;
            Value::Timestamp(Timestamp {
                time: expect_u32(inner.get("t"), "$timestamp.t")?,
                increment: expect_u32(inner.get("i"), "$timestamp.i")?,
            })
        }
        "$regularExpression" => {
            let inner = expect_object(body, "$regularExpression")?;
            let pattern = inner
                .get("pattern")
                .ok_or_else(|| Error::json("$regularExpression is missing pattern"))?;
            let options = inner
                .get("options")
                .ok_or_else(|| Error::json("$regularExpression is missing options"))?;
            Value::Regex(Regex::new(
                expect_str(pattern, "$regularExpression.pattern")?,
                expect_str(options, "$regularExpression.options")?,
            ))
        }
        "$code" => Value::JavaScriptCode(expect_str(body, "$code")?.to_string()),
        "$minKey" => Value::MinKey,
        "$maxKey" => Value::MaxKey,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn parse_double(s: &str) -> Result<f64> {
    match s {
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => s
            .parse()
            .map_err(|_| Error::json(format!("'{}' is not a valid $numberDouble", s))),
    }
}

fn parse_date(body: &Json) -> Result<DateTime> {
    match body {
        Json::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| DateTime::from_millis(dt.timestamp_millis()))
            .map_err(|e| Error::json(format!("$date '{}': {}", s, e))),
        Json::Object(inner) => {
            let long = inner
                .get("$numberLong")
                .ok_or_else(|| Error::json("$date object must hold $numberLong"))?;
            expect_str(long, "$date.$numberLong")?
                .parse()
                .map(DateTime::from_millis)
                .map_err(|_| Error::json("$date.$numberLong is not a 64-bit integer"))
        }
        Json::Number(n) => n
            .as_i64()
            .map(DateTime::from_millis)
            .ok_or_else(|| Error::json("legacy $date must be an integer")),
        other => Err(Error::json(format!(
            "$date cannot be a {}",
            json_type_name(other)
        ))),
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_relaxed_json(self))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", value_to_json(self, JsonMode::Relaxed))
    }
}

impl Document {
    pub fn to_canonical_json(&self) -> String {
        to_canonical_json(self)
    }

    pub fn to_relaxed_json(&self) -> String {
        to_relaxed_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        from_json(text)
    }
}
