//! Binary BSON decoding.
//!
//! Every length prefix is checked against the bytes that remain before
//! anything is read or allocated on its behalf.

use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::oid::ObjectId;
use crate::value::{
    Binary, BinarySubtype, DateTime, ElementType, JavaScriptCodeWithScope, Regex, Timestamp, Value,
};

/// Maximum nesting of documents and arrays.
pub const MAX_DEPTH: usize = 100;

const MIN_DOCUMENT_LEN: i32 = 5;
const MIN_CODE_WITH_SCOPE_LEN: i32 = 14;

/// Decode exactly one document occupying all of `bytes`.
pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    let (doc, consumed) = decode_document_prefix(bytes)?;
    if consumed != bytes.len() {
        return Err(Error::TrailingBytes(bytes.len() - consumed));
    }
    Ok(doc)
}

/// Decode the document at the start of `bytes`, returning it with the number
/// of bytes it occupied.
pub fn decode_document_prefix(bytes: &[u8]) -> Result<(Document, usize)> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        end: bytes.len(),
    };
    let doc = reader.read_document(0)?;
    Ok((doc, reader.pos))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.end - self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                context,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    fn read_i32(&mut self, context: &'static str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array(context)?))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array(context)?))
    }

    fn read_i64(&mut self, context: &'static str) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array(context)?))
    }

    /// Read a length prefix that must cover at least `min` bytes (itself
    /// included) and fit in what remains.
    fn read_length(&mut self, min: i32, context: &'static str) -> Result<(usize, usize)> {
        let offset = self.pos;
        let length = self.read_i32(context)?;
        if length < min {
            return Err(Error::InvalidLength {
                length: i64::from(length),
                offset,
                reason: "shorter than the minimum size",
            });
        }
        let length = length as usize;
        if length > self.end - offset {
            return Err(Error::InvalidLength {
                length: length as i64,
                offset,
                reason: "exceeds the remaining buffer",
            });
        }
        Ok((offset, length))
    }

    fn read_cstring(&mut self, context: &'static str) -> Result<String> {
        let offset = self.pos;
        let window = &self.bytes[self.pos..self.end];
        let nul = window
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnexpectedEof { offset, context })?;
        let s = std::str::from_utf8(&window[..nul])
            .map_err(|_| Error::InvalidUtf8 { offset, context })?;
        self.pos += nul + 1;
        Ok(s.to_string())
    }

    fn read_string(&mut self, context: &'static str) -> Result<String> {
        let offset = self.pos;
        let length = self.read_i32(context)?;
        if length < 1 || length as usize > self.remaining() {
            return Err(Error::InvalidLength {
                length: i64::from(length),
                offset,
                reason: "string length out of range",
            });
        }
        let raw = self.take(length as usize, context)?;
        let (body, terminator) = raw.split_at(raw.len() - 1);
        if terminator != [0] {
            return Err(Error::InvalidLength {
                length: i64::from(length),
                offset,
                reason: "string is not NUL terminated",
            });
        }
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| Error::InvalidUtf8 { offset, context })
    }

    fn read_document(&mut self, depth: usize) -> Result<Document> {
        Ok(Document::from_iter(self.read_elements(depth)?))
    }

    fn read_elements(&mut self, depth: usize) -> Result<Vec<(String, Value)>> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthLimitExceeded(MAX_DEPTH));
        }
        let (offset, length) = self.read_length(MIN_DOCUMENT_LEN, "document length")?;
        let doc_end = offset + length;
        let outer_end = self.end;
        self.end = doc_end;

        let mut elements = Vec::new();
        loop {
            let tag = self.read_u8("element type")?;
            if tag == 0 {
                break;
            }
            let key = self.read_cstring("key")?;
            let value = self.read_value(tag, &key, depth)?;
            elements.push((key, value));
        }

        if self.pos != doc_end {
            return Err(Error::InvalidLength {
                length: length as i64,
                offset,
                reason: "terminator does not match the declared length",
            });
        }
        self.end = outer_end;
        Ok(elements)
    }

    fn read_value(&mut self, tag: u8, key: &str, depth: usize) -> Result<Value> {
        let ty = ElementType::from_u8(tag).ok_or_else(|| Error::UnknownElementType {
            tag,
            key: key.to_string(),
        })?;

        Ok(match ty {
            ElementType::Double => Value::Double(f64::from_le_bytes(self.read_array("double")?)),
            ElementType::String => Value::String(self.read_string("string")?),
            ElementType::Document => Value::Document(self.read_document(depth + 1)?),
            ElementType::Array => Value::Array(
                self.read_elements(depth + 1)?
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect(),
            ),
            ElementType::Binary => Value::Binary(self.read_binary()?),
            ElementType::ObjectId => Value::ObjectId(ObjectId::from_bytes(self.read_array("objectId")?)),
            ElementType::Boolean => match self.read_u8("boolean")? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => return Err(Error::InvalidBoolean(other)),
            },
            ElementType::DateTime => Value::DateTime(DateTime::from_millis(self.read_i64("datetime")?)),
            ElementType::Null => Value::Null,
            ElementType::Regex => {
                let pattern = self.read_cstring("regex pattern")?;
                let options = self.read_cstring("regex options")?;
                Value::Regex(Regex { pattern, options })
            }
            ElementType::JavaScriptCode => Value::JavaScriptCode(self.read_string("javascript")?),
            ElementType::JavaScriptCodeWithScope => {
                let (offset, length) =
                    self.read_length(MIN_CODE_WITH_SCOPE_LEN, "javascript with scope")?;
                let code = self.read_string("javascript")?;
                let scope = self.read_document(depth + 1)?;
                if self.pos != offset + length {
                    return Err(Error::InvalidLength {
                        length: length as i64,
                        offset,
                        reason: "code with scope length does not match its contents",
                    });
                }
                Value::JavaScriptCodeWithScope(JavaScriptCodeWithScope { code, scope })
            }
            ElementType::Int32 => Value::Int32(self.read_i32("int32")?),
            ElementType::Timestamp => {
                let increment = self.read_u32("timestamp")?;
                let time = self.read_u32("timestamp")?;
                Value::Timestamp(Timestamp { time, increment })
            }
            ElementType::Int64 => Value::Int64(self.read_i64("int64")?),
            ElementType::Decimal128 => {
                Value::Decimal128(Decimal128::from_bytes(self.read_array("decimal128")?))
            }
            ElementType::MinKey => Value::MinKey,
            ElementType::MaxKey => Value::MaxKey,
        })
    }

    fn read_binary(&mut self) -> Result<Binary> {
        let offset = self.pos;
        let length = self.read_i32("binary length")?;
        if length < 0 || length as usize > self.remaining().saturating_sub(1) {
            return Err(Error::InvalidLength {
                length: i64::from(length),
                offset,
                reason: "binary length out of range",
            });
        }
        let subtype = BinarySubtype::from(self.read_u8("binary subtype")?);
        let mut payload = self.take(length as usize, "binary")?;

        if subtype == BinarySubtype::BinaryOld {
            if payload.len() < 4 {
                return Err(Error::InvalidLength {
                    length: i64::from(length),
                    offset,
                    reason: "old binary payload is missing its inner length",
                });
            }
            let (inner, rest) = payload.split_at(4);
            let inner_len = i32::from_le_bytes([inner[0], inner[1], inner[2], inner[3]]);
            if inner_len < 0 || inner_len as usize != rest.len() {
                return Err(Error::InvalidLength {
                    length: i64::from(inner_len),
                    offset: offset + 5,
                    reason: "old binary inner length does not match",
                });
            }
            payload = rest;
        }

        Ok(Binary {
            subtype,
            bytes: payload.to_vec(),
        })
    }
}
