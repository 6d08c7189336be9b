//! Error types and the error classifier.
//!
//! Every failure carries an [`ErrorKind`], a message and, when the failure
//! originated in the transport or on the server, the numeric code and
//! [`ErrorDomain`] it was reported with.
//!
//! ```rust
//! use tern_driver::error::{classify, codes, Error, ErrorDomain, ErrorKind};
//!
//! assert_eq!(classify(ErrorDomain::Server, 50), ErrorKind::ExecutionTimeout);
//! assert_eq!(
//!     classify(ErrorDomain::Stream, codes::STREAM_CONNECT),
//!     ErrorKind::ConnectionFailed
//! );
//!
//! let err = Error::invalid_argument("Invalid namespace provided");
//! assert!(err.is_invalid_argument());
//! assert_eq!(err.to_string(), "Invalid namespace provided");
//! ```

use std::fmt;

use thiserror::Error;

use crate::write_result::WriteResult;

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The category an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller supplied a malformed argument.
    InvalidArgument,
    /// An operation was used out of order.
    Logic,
    /// A generic failure while talking to the server.
    Runtime,
    /// Bytes from the server could not be understood.
    UnexpectedValue,
    /// A write batch failed; the partial result is attached.
    WriteFailed,
    /// The connection could not be established or was lost.
    ConnectionFailed,
    /// A socket or server selection timed out.
    ConnectionTimeout,
    /// The server rejected the credentials.
    AuthenticationFailed,
    /// The server aborted the operation on its time limit.
    ExecutionTimeout,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Logic => "Logic",
            Self::Runtime => "Runtime",
            Self::UnexpectedValue => "UnexpectedValue",
            Self::WriteFailed => "WriteFailed",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::ConnectionTimeout => "ConnectionTimeout",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::ExecutionTimeout => "ExecutionTimeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem that reported a numeric error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Client = 1,
    Stream,
    Protocol,
    Cursor,
    Query,
    Insert,
    Sasl,
    Bson,
    Matcher,
    Namespace,
    Command,
    Collection,
    GridFs,
    Scram,
    ServerSelection,
    WriteConcern,
    /// Errors returned by the server in a command reply.
    Server,
}

/// Numeric error codes used together with an [`ErrorDomain`].
pub mod codes {
    pub const STREAM_INVALID_TYPE: u32 = 1;
    pub const STREAM_INVALID_STATE: u32 = 2;
    pub const STREAM_NAME_RESOLUTION: u32 = 3;
    pub const STREAM_SOCKET: u32 = 4;
    pub const STREAM_CONNECT: u32 = 5;
    pub const STREAM_NOT_ESTABLISHED: u32 = 6;

    pub const CLIENT_NOT_READY: u32 = 7;
    pub const CLIENT_TOO_BIG: u32 = 8;
    pub const CLIENT_TOO_SMALL: u32 = 9;
    pub const CLIENT_GETNONCE: u32 = 10;
    pub const CLIENT_AUTHENTICATE: u32 = 11;
    pub const CLIENT_NO_ACCEPTABLE_PEER: u32 = 12;
    pub const CLIENT_IN_EXHAUST: u32 = 13;

    pub const PROTOCOL_INVALID_REPLY: u32 = 14;
    pub const PROTOCOL_BAD_WIRE_VERSION: u32 = 15;

    pub const CURSOR_INVALID_CURSOR: u32 = 16;

    pub const QUERY_FAILURE: u32 = 17;

    pub const BSON_INVALID: u32 = 18;

    pub const MATCHER_INVALID: u32 = 19;

    pub const NAMESPACE_INVALID: u32 = 20;
    pub const NAMESPACE_INVALID_FILTER_TYPE: u32 = 21;

    pub const COMMAND_INVALID_ARG: u32 = 22;

    pub const COLLECTION_INSERT_FAILED: u32 = 23;
    pub const COLLECTION_UPDATE_FAILED: u32 = 24;
    pub const COLLECTION_DELETE_FAILED: u32 = 25;
    pub const COLLECTION_DOES_NOT_EXIST: u32 = 26;

    pub const GRIDFS_INVALID_FILENAME: u32 = 27;

    pub const SCRAM_NOT_DONE: u32 = 28;
    pub const SCRAM_PROTOCOL_ERROR: u32 = 29;

    /// Server code for an operation that exceeded `maxTimeMS`.
    pub const EXCEEDED_TIME_LIMIT: u32 = 50;

    pub const QUERY_COMMAND_NOT_FOUND: u32 = 59;
    pub const QUERY_NOT_TAILABLE: u32 = 13051;

    pub const SERVER_SELECTION_BUSY: u32 = 13052;
    pub const SERVER_SELECTION_FAILURE: u32 = 13053;
    pub const SERVER_SELECTION_INVALID_ID: u32 = 13054;

    /// Generic write concern failure.
    pub const WRITE_CONCERN_ERROR: u32 = 64;
}

/// Map a domain and code to an error kind.
///
/// The code is consulted first; the domain only decides when the code is not
/// one of the recognised values.
pub fn classify(domain: ErrorDomain, code: u32) -> ErrorKind {
    use codes::*;

    match code {
        EXCEEDED_TIME_LIMIT => return ErrorKind::ExecutionTimeout,
        STREAM_SOCKET | SERVER_SELECTION_FAILURE => return ErrorKind::ConnectionTimeout,
        CLIENT_AUTHENTICATE => return ErrorKind::AuthenticationFailed,
        STREAM_INVALID_TYPE
        | STREAM_INVALID_STATE
        | STREAM_NAME_RESOLUTION
        | STREAM_CONNECT
        | STREAM_NOT_ESTABLISHED => return ErrorKind::ConnectionFailed,
        CLIENT_NOT_READY
        | CLIENT_TOO_BIG
        | CLIENT_TOO_SMALL
        | CLIENT_GETNONCE
        | CLIENT_NO_ACCEPTABLE_PEER
        | CLIENT_IN_EXHAUST
        | PROTOCOL_INVALID_REPLY
        | PROTOCOL_BAD_WIRE_VERSION
        | CURSOR_INVALID_CURSOR
        | QUERY_FAILURE
        | BSON_INVALID
        | MATCHER_INVALID
        | NAMESPACE_INVALID
        | COMMAND_INVALID_ARG
        | COLLECTION_INSERT_FAILED
        | GRIDFS_INVALID_FILENAME
        | QUERY_COMMAND_NOT_FOUND
        | QUERY_NOT_TAILABLE => return ErrorKind::Runtime,
        _ => {}
    }

    match domain {
        ErrorDomain::Client
        | ErrorDomain::Stream
        | ErrorDomain::Protocol
        | ErrorDomain::Cursor
        | ErrorDomain::Query
        | ErrorDomain::Insert
        | ErrorDomain::Sasl
        | ErrorDomain::Bson
        | ErrorDomain::Matcher
        | ErrorDomain::Namespace
        | ErrorDomain::Command
        | ErrorDomain::Collection
        | ErrorDomain::GridFs
        | ErrorDomain::Scram
        | ErrorDomain::ServerSelection
        | ErrorDomain::WriteConcern
        | ErrorDomain::Server => ErrorKind::Runtime,
    }
}

/// A driver error.
#[derive(Error, Debug)]
pub struct Error {
    /// The classified kind.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// Numeric code from the server or transport.
    pub code: Option<u32>,
    /// Domain the code belongs to.
    pub domain: Option<ErrorDomain>,
    /// Partial result of a failed write.
    pub write_result: Option<Box<WriteResult>>,
    /// The underlying error, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error {
    /// Create a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            domain: None,
            write_result: None,
            source: None,
        }
    }

    /// Create an error from a domain and code, classifying it.
    pub fn classified(domain: ErrorDomain, code: u32, message: impl Into<String>) -> Self {
        Self::new(classify(domain, code), message)
            .with_code(code)
            .with_domain(domain)
    }

    /// Attach the numeric code.
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the error domain.
    pub fn with_domain(mut self, domain: ErrorDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Attach the partial result of a write.
    pub fn with_write_result(mut self, result: WriteResult) -> Self {
        self.write_result = Some(Box::new(result));
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn unexpected_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedValue, message)
    }

    /// A failed write carrying whatever the server reported.
    pub fn write_failed(message: impl Into<String>, result: WriteResult) -> Self {
        Self::new(ErrorKind::WriteFailed, message).with_write_result(result)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn connection_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionTimeout, message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailed, message)
    }

    /// An error reported by the server in an `ok: 0` reply.
    pub fn server(code: u32, message: impl Into<String>) -> Self {
        Self::classified(ErrorDomain::Server, code, message)
    }

    // ============== Predicates ==============

    pub fn is_invalid_argument(&self) -> bool {
        self.kind == ErrorKind::InvalidArgument
    }

    pub fn is_logic(&self) -> bool {
        self.kind == ErrorKind::Logic
    }

    pub fn is_write_failed(&self) -> bool {
        self.kind == ErrorKind::WriteFailed
    }

    /// Check if this is a connection failure or connection timeout.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionFailed | ErrorKind::ConnectionTimeout
        )
    }

    /// Check if this is any kind of timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionTimeout | ErrorKind::ExecutionTimeout
        )
    }

    /// The write result attached to a [`ErrorKind::WriteFailed`] error.
    pub fn write_result(&self) -> Option<&WriteResult> {
        self.write_result.as_deref()
    }
}

impl From<tern_bson::Error> for Error {
    fn from(err: tern_bson::Error) -> Self {
        let kind = if err.is_decode_error() {
            ErrorKind::UnexpectedValue
        } else {
            ErrorKind::InvalidArgument
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<tern_bson::ValueAccessError> for Error {
    fn from(err: tern_bson::ValueAccessError) -> Self {
        Self::unexpected_value(err.to_string()).with_source(err)
    }
}
