//! Binary BSON encoding.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::value::{BinarySubtype, Value};

/// Encode a document to its canonical byte form.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    write_document(&mut buf, doc)?;
    Ok(buf)
}

/// Append an encoded document to `buf`.
pub fn write_document(buf: &mut Vec<u8>, doc: &Document) -> Result<()> {
    let start = reserve_length(buf);
    for (key, value) in doc {
        write_element(buf, key, value)?;
    }
    buf.push(0);
    patch_length(buf, start)
}

fn write_array(buf: &mut Vec<u8>, items: &[Value]) -> Result<()> {
    let start = reserve_length(buf);
    for (index, value) in items.iter().enumerate() {
        write_element(buf, &index.to_string(), value)?;
    }
    buf.push(0);
    patch_length(buf, start)
}

fn reserve_length(buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    start
}

fn patch_length(buf: &mut [u8], start: usize) -> Result<()> {
    let len = buf.len() - start;
    let len32 = i32::try_from(len).map_err(|_| Error::DocumentTooLarge(len))?;
    buf[start..start + 4].copy_from_slice(&len32.to_le_bytes());
    Ok(())
}

fn write_element(buf: &mut Vec<u8>, key: &str, value: &Value) -> Result<()> {
    if key.as_bytes().contains(&0) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    buf.push(value.element_type() as u8);
    buf.extend_from_slice(key.as_bytes());
    buf.push(0);
    write_payload(buf, value)
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = s.len() + 1;
    let len32 = i32::try_from(len).map_err(|_| Error::DocumentTooLarge(len))?;
    buf.extend_from_slice(&len32.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_regex_part(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::InvalidRegex(s.to_string()));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

fn write_payload(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) | Value::JavaScriptCode(s) => write_string(buf, s)?,
        Value::Document(d) => write_document(buf, d)?,
        Value::Array(items) => write_array(buf, items)?,
        Value::Binary(bin) => {
            let old = bin.subtype == BinarySubtype::BinaryOld;
            let total = if old { bin.bytes.len() + 4 } else { bin.bytes.len() };
            let total32 = i32::try_from(total).map_err(|_| Error::DocumentTooLarge(total))?;
            buf.extend_from_slice(&total32.to_le_bytes());
            buf.push(u8::from(bin.subtype));
            if old {
                buf.extend_from_slice(&((bin.bytes.len() as i32).to_le_bytes()));
            }
            buf.extend_from_slice(&bin.bytes);
        }
        Value::ObjectId(oid) => buf.extend_from_slice(&oid.bytes()),
        Value::Boolean(b) => buf.push(u8::from(*b)),
        Value::DateTime(dt) => buf.extend_from_slice(&dt.timestamp_millis().to_le_bytes()),
        Value::Null | Value::MinKey | Value::MaxKey => {}
        Value::Regex(re) => {
            write_regex_part(buf, &re.pattern)?;
            write_regex_part(buf, &re.options)?;
        }
        Value::JavaScriptCodeWithScope(cws) => {
            let start = reserve_length(buf);
            write_string(buf, &cws.code)?;
            write_document(buf, &cws.scope)?;
            patch_length(buf, start)?;
        }
        Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Timestamp(ts) => {
            buf.extend_from_slice(&ts.increment.to_le_bytes());
            buf.extend_from_slice(&ts.time.to_le_bytes());
        }
        Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::Decimal128(d) => buf.extend_from_slice(&d.bytes()),
    }
    Ok(())
}
