//! MongoDB wire protocol framing.
//!
//! ## Message Format
//!
//! ```text
//! [length: i32][requestId: i32][responseTo: i32][opCode: i32][body...]
//! ```
//!
//! All integers are little-endian. Commands are sent as `OP_MSG` (2013) to
//! servers with wire version 6 or later and as `OP_QUERY` (2004) against
//! `<db>.$cmd` otherwise; the latter is answered with `OP_REPLY` (1).
//!
//! Servers older than wire version 4 have no `find` command. Queries against
//! them are `OP_QUERY` messages on the collection itself, continued with
//! `OP_GET_MORE` (2005) and closed with `OP_KILL_CURSORS` (2007).

use std::sync::atomic::{AtomicI32, Ordering};

use tern_bson::{Document, decode_document_prefix, write_document};

use crate::error::{Error, ErrorDomain, Result, codes};
use crate::namespace::Namespace;
use crate::query::{Query, QueryFlags};

/// Size of the standard message header.
pub const HEADER_LEN: usize = 16;

/// Largest message either side may send.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Allocate a process-unique request id.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Message operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Query = 2004,
    GetMore = 2005,
    KillCursors = 2007,
    Msg = 2013,
}

impl OpCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Reply),
            2004 => Some(Self::Query),
            2005 => Some(Self::GetMore),
            2007 => Some(Self::KillCursors),
            2013 => Some(Self::Msg),
            _ => None,
        }
    }
}

fn invalid_reply(message: impl Into<String>) -> Error {
    Error::classified(
        ErrorDomain::Protocol,
        codes::PROTOCOL_INVALID_REPLY,
        message,
    )
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or_else(|| invalid_reply(format!("Truncated message at offset {}", offset)))
}

fn read_i64(bytes: &[u8], offset: usize) -> Result<i64> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_le_bytes)
        .ok_or_else(|| invalid_reply(format!("Truncated message at offset {}", offset)))
}

/// Length prefix of the document starting at `offset`, checked against the
/// remaining bytes.
fn document_len(bytes: &[u8], offset: usize) -> Result<usize> {
    let len = read_i32(bytes, offset)?;
    if len < 5 || offset + len as usize > bytes.len() {
        return Err(invalid_reply(format!(
            "Invalid document length {} at offset {}",
            len, offset
        )));
    }
    Ok(len as usize)
}

/// The standard message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    /// Parse and validate a header from the first 16 bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let length = read_i32(bytes, 0)?;
        let request_id = read_i32(bytes, 4)?;
        let response_to = read_i32(bytes, 8)?;
        let raw_op = read_i32(bytes, 12)?;

        if length < HEADER_LEN as i32 || length as usize > MAX_MESSAGE_SIZE {
            return Err(invalid_reply(format!("Invalid message length: {}", length)));
        }
        let op_code = OpCode::from_i32(raw_op)
            .ok_or_else(|| invalid_reply(format!("Unsupported opcode: {}", raw_op)))?;

        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }

    /// Bytes following the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_LEN
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.response_to.to_le_bytes());
        buf.extend_from_slice(&(self.op_code as i32).to_le_bytes());
    }
}

/// Prepend a header to an encoded body.
fn frame(op_code: OpCode, request_id: i32, body: &[u8]) -> Result<Vec<u8>> {
    let length = HEADER_LEN + body.len();
    if length > MAX_MESSAGE_SIZE {
        return Err(Error::classified(
            ErrorDomain::Client,
            codes::CLIENT_TOO_BIG,
            format!(
                "Message of {} bytes exceeds the maximum of {}",
                length, MAX_MESSAGE_SIZE
            ),
        ));
    }

    let mut buf = Vec::with_capacity(length);
    MessageHeader {
        length: length as i32,
        request_id,
        response_to: 0,
        op_code,
    }
    .write(&mut buf);
    buf.extend_from_slice(body);
    Ok(buf)
}

fn write_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.contains('\0') {
        return Err(Error::invalid_argument(format!(
            "Wire string contains a NUL byte: {:?}",
            s
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    Ok(())
}

// ============================================================================
// OP_MSG
// ============================================================================

/// A kind-1 section: a named sequence of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSequence {
    pub identifier: String,
    pub documents: Vec<Document>,
}

/// An `OP_MSG` message.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub flags: u32,
    pub body: Document,
    pub sequences: Vec<DocumentSequence>,
}

impl OpMsg {
    pub const CHECKSUM_PRESENT: u32 = 1;
    pub const MORE_TO_COME: u32 = 1 << 1;
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;

    pub fn new(body: Document) -> Self {
        Self {
            flags: 0,
            body,
            sequences: Vec::new(),
        }
    }

    /// Encode as a complete message.
    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.flags & !Self::CHECKSUM_PRESENT).to_le_bytes());

        body.push(0);
        write_document(&mut body, &self.body)?;

        for sequence in &self.sequences {
            body.push(1);
            let start = body.len();
            body.extend_from_slice(&[0; 4]);
            write_cstring(&mut body, &sequence.identifier)?;
            for document in &sequence.documents {
                write_document(&mut body, document)?;
            }
            let size = (body.len() - start) as i32;
            body[start..start + 4].copy_from_slice(&size.to_le_bytes());
        }

        frame(OpCode::Msg, request_id, &body)
    }

    /// Decode the bytes following the header.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let flags = read_i32(payload, 0)? as u32;
        let end = if flags & Self::CHECKSUM_PRESENT != 0 {
            payload
                .len()
                .checked_sub(4)
                .ok_or_else(|| invalid_reply("Truncated OP_MSG checksum"))?
        } else {
            payload.len()
        };
        let payload = &payload[..end];

        let mut body = None;
        let mut sequences = Vec::new();
        let mut pos = 4;
        while pos < payload.len() {
            let kind = payload[pos];
            pos += 1;
            match kind {
                0 => {
                    let len = document_len(payload, pos)?;
                    let (document, _) = decode_document_prefix(&payload[pos..pos + len])?;
                    if body.replace(document).is_some() {
                        return Err(invalid_reply("OP_MSG contains more than one body section"));
                    }
                    pos += len;
                }
                1 => {
                    let size = read_i32(payload, pos)?;
                    if size < 5 || pos + size as usize > payload.len() {
                        return Err(invalid_reply(format!("Invalid section size: {}", size)));
                    }
                    let section_end = pos + size as usize;
                    let name_start = pos + 4;
                    let name_len = payload[name_start..section_end]
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| invalid_reply("Unterminated sequence identifier"))?;
                    let identifier =
                        String::from_utf8(payload[name_start..name_start + name_len].to_vec())
                            .map_err(|_| invalid_reply("Sequence identifier is not UTF-8"))?;

                    let mut documents = Vec::new();
                    let mut doc_pos = name_start + name_len + 1;
                    while doc_pos < section_end {
                        let len = document_len(&payload[..section_end], doc_pos)?;
                        let (document, _) =
                            decode_document_prefix(&payload[doc_pos..doc_pos + len])?;
                        documents.push(document);
                        doc_pos += len;
                    }
                    sequences.push(DocumentSequence {
                        identifier,
                        documents,
                    });
                    pos = section_end;
                }
                other => {
                    return Err(invalid_reply(format!("Unknown OP_MSG section kind: {}", other)));
                }
            }
        }

        let body = body.ok_or_else(|| invalid_reply("OP_MSG has no body section"))?;
        Ok(Self {
            flags,
            body,
            sequences,
        })
    }
}

// ============================================================================
// OP_QUERY / OP_REPLY
// ============================================================================

/// A legacy `OP_QUERY` message.
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: QueryFlags,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub selector: Option<Document>,
}

impl OpQuery {
    /// A command against `<db>.$cmd` returning a single document.
    pub fn command(db: &str, command: Document, flags: QueryFlags) -> Self {
        Self {
            flags,
            full_collection_name: format!("{}.$cmd", db),
            number_to_skip: 0,
            number_to_return: -1,
            query: command,
            selector: None,
        }
    }

    /// A query on `namespace` carrying the legacy wire filter.
    ///
    /// The `SLAVE_OK` bit is added to the query's own flags when `slave_ok`
    /// is set.
    pub fn find(namespace: &Namespace, query: &Query, slave_ok: bool) -> Self {
        let mut flags = query.flags();
        if slave_ok {
            flags.insert(QueryFlags::SLAVE_OK);
        }
        Self {
            flags,
            full_collection_name: namespace.to_string(),
            number_to_skip: query.skip(),
            number_to_return: query.number_to_return(),
            query: query.wire_filter().clone(),
            selector: query.projection().cloned(),
        }
    }

    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name)?;
        body.extend_from_slice(&self.number_to_skip.to_le_bytes());
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        write_document(&mut body, &self.query)?;
        if let Some(selector) = &self.selector {
            write_document(&mut body, selector)?;
        }
        frame(OpCode::Query, request_id, &body)
    }
}

/// A legacy `OP_GET_MORE` message.
#[derive(Debug, Clone, PartialEq)]
pub struct OpGetMore {
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

impl OpGetMore {
    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name)?;
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());
        frame(OpCode::GetMore, request_id, &body)
    }
}

/// A legacy `OP_KILL_CURSORS` message. The server does not reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OpKillCursors {
    pub cursor_ids: Vec<i64>,
}

impl OpKillCursors {
    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        let count = i32::try_from(self.cursor_ids.len())
            .map_err(|_| Error::invalid_argument("Too many cursor ids to kill"))?;
        let mut body = Vec::with_capacity(8 + self.cursor_ids.len() * 8);
        body.extend_from_slice(&0i32.to_le_bytes());
        body.extend_from_slice(&count.to_le_bytes());
        for id in &self.cursor_ids {
            body.extend_from_slice(&id.to_le_bytes());
        }
        frame(OpCode::KillCursors, request_id, &body)
    }
}

/// A legacy cursor message sent on a collection rather than `$cmd`.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyRequest {
    Query(OpQuery),
    GetMore(OpGetMore),
    KillCursors(OpKillCursors),
}

impl LegacyRequest {
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Query(_) => OpCode::Query,
            Self::GetMore(_) => OpCode::GetMore,
            Self::KillCursors(_) => OpCode::KillCursors,
        }
    }

    /// Whether the server answers with an `OP_REPLY`.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::KillCursors(_))
    }

    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>> {
        match self {
            Self::Query(query) => query.encode(request_id),
            Self::GetMore(get_more) => get_more.encode(request_id),
            Self::KillCursors(kill) => kill.encode(request_id),
        }
    }
}

/// A legacy `OP_REPLY` message.
#[derive(Debug, Clone, PartialEq)]
pub struct OpReply {
    pub response_flags: u32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

/// Fixed fields preceding the documents of an `OP_REPLY`.
const REPLY_PREFIX_LEN: usize = 20;

impl OpReply {
    pub const CURSOR_NOT_FOUND: u32 = 1;
    pub const QUERY_FAILURE: u32 = 1 << 1;

    /// Decode the bytes following the header.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let response_flags = read_i32(payload, 0)? as u32;
        let cursor_id = read_i64(payload, 4)?;
        let starting_from = read_i32(payload, 12)?;
        let number_returned = read_i32(payload, 16)?;
        if number_returned < 0 {
            return Err(invalid_reply(format!(
                "Invalid numberReturned: {}",
                number_returned
            )));
        }

        let mut documents = Vec::new();
        let mut pos = REPLY_PREFIX_LEN;
        for _ in 0..number_returned {
            let len = document_len(payload, pos)?;
            let (document, _) = decode_document_prefix(&payload[pos..pos + len])?;
            documents.push(document);
            pos += len;
        }
        if pos != payload.len() {
            return Err(invalid_reply(format!(
                "{} unexpected bytes after OP_REPLY documents",
                payload.len() - pos
            )));
        }

        Ok(Self {
            response_flags,
            cursor_id,
            starting_from,
            documents,
        })
    }
}

/// Raw bytes of the reply document carried by a message payload.
///
/// For `OP_MSG` this is the body section, for `OP_REPLY` the first document.
pub fn reply_body(op_code: OpCode, payload: &[u8]) -> Result<&[u8]> {
    match op_code {
        OpCode::Msg => {
            let mut pos = 4;
            while pos < payload.len() {
                let kind = payload[pos];
                pos += 1;
                match kind {
                    0 => {
                        let len = document_len(payload, pos)?;
                        return Ok(&payload[pos..pos + len]);
                    }
                    1 => {
                        let size = read_i32(payload, pos)?;
                        if size < 5 {
                            return Err(invalid_reply(format!("Invalid section size: {}", size)));
                        }
                        pos += size as usize;
                    }
                    other => {
                        return Err(invalid_reply(format!(
                            "Unknown OP_MSG section kind: {}",
                            other
                        )));
                    }
                }
            }
            Err(invalid_reply("OP_MSG has no body section"))
        }
        OpCode::Reply => {
            let number_returned = read_i32(payload, 16)?;
            if number_returned < 1 {
                return Err(invalid_reply("OP_REPLY contains no documents"));
            }
            let len = document_len(payload, REPLY_PREFIX_LEN)?;
            Ok(&payload[REPLY_PREFIX_LEN..REPLY_PREFIX_LEN + len])
        }
        OpCode::Query | OpCode::GetMore | OpCode::KillCursors => Err(invalid_reply(format!(
            "Unexpected {:?} message in reply",
            op_code
        ))),
    }
}
