//! The boundary between command execution and the network.
//!
//! A [`Transport`] takes a command document and returns the raw bytes of the
//! reply document. Framing, connection management and authentication live
//! behind it; decoding and error classification stay with the caller.

use std::fmt;

use thiserror::Error;
use tern_bson::Document;

use crate::concern::ReadPreference;
use crate::error::{Error, ErrorDomain, codes};
use crate::uri::Host;
use crate::wire::{LegacyRequest, OpReply};

pub mod mock;
pub mod scram;
pub mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

/// Identifier of a server known to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a server reported in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Standalone,
    Mongos,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    Unknown,
}

impl ServerKind {
    /// Derive the role from an `isMaster` reply.
    pub fn from_handshake(reply: &Document) -> Self {
        if reply.get_str("msg").ok() == Some("isdbgrid") {
            Self::Mongos
        } else if reply.contains_key("setName") {
            if reply.find_as_bool("ismaster", false) {
                Self::RsPrimary
            } else if reply.find_as_bool("secondary", false) {
                Self::RsSecondary
            } else if reply.find_as_bool("arbiterOnly", false) {
                Self::RsArbiter
            } else {
                Self::Unknown
            }
        } else if reply.find_as_bool("ismaster", false) {
            Self::Standalone
        } else {
            Self::Unknown
        }
    }
}

/// What a transport knows about one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
    pub id: ServerId,
    pub host: Host,
    pub kind: ServerKind,
    pub max_wire_version: i32,
}

/// Raw reply document bytes and the server that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReply {
    pub bytes: Vec<u8>,
    pub server_id: ServerId,
}

/// A failure reported by a transport.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub domain: ErrorDomain,
    pub code: u32,
    pub message: String,
}

impl TransportError {
    pub fn new(domain: ErrorDomain, code: u32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    /// A read or write on an established socket failed or timed out.
    pub fn socket(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Stream, codes::STREAM_SOCKET, message)
    }

    /// A connection could not be established.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Stream, codes::STREAM_CONNECT, message)
    }

    /// No suitable server could be found.
    pub fn server_selection(message: impl Into<String>) -> Self {
        Self::new(
            ErrorDomain::ServerSelection,
            codes::SERVER_SELECTION_FAILURE,
            message,
        )
    }

    /// The server rejected the credentials or the exchange broke down.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Client, codes::CLIENT_AUTHENTICATE, message)
    }

    /// The server sent something that is not a valid reply.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorDomain::Protocol, codes::PROTOCOL_INVALID_REPLY, message)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::classified(err.domain, err.code, err.message)
    }
}

impl From<Error> for TransportError {
    fn from(err: Error) -> Self {
        match (err.domain, err.code) {
            (Some(domain), Some(code)) => Self::new(domain, code, err.message),
            _ => Self::protocol(err.message),
        }
    }
}

/// Sends commands to servers.
pub trait Transport: Send + Sync {
    /// Run `command` against `db` and return the reply document's bytes.
    ///
    /// `server_hint` pins the command to a server returned earlier, as a
    /// `getMore` must go to the server that owns the cursor.
    fn send_command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<RawReply, TransportError>;

    /// Pick a server for the read preference.
    fn select_server(
        &self,
        read_preference: Option<&ReadPreference>,
    ) -> Result<ServerId, TransportError>;

    /// Servers currently known.
    fn servers(&self) -> Vec<ServerDescription>;

    /// Send a legacy cursor message to `server_id`.
    ///
    /// Returns the `OP_REPLY` for queries and get-mores and `None` for
    /// kill-cursors, which the server does not answer.
    fn send_legacy(
        &self,
        request: &LegacyRequest,
        _server_id: ServerId,
    ) -> Result<Option<OpReply>, TransportError> {
        Err(TransportError::new(
            ErrorDomain::Protocol,
            codes::PROTOCOL_BAD_WIRE_VERSION,
            format!("Transport cannot send {:?} messages", request.op_code()),
        ))
    }
}
