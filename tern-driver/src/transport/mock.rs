//! Scripted transport for offline use and tests.
//!
//! Replies are queued up front and handed out in order; every command sent
//! is recorded. `killCursors` is answered without consuming the script.
//! Legacy cursor messages are recorded separately and answered with queued
//! `OP_REPLY` messages.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tern_bson::doc;
//! use tern_driver::command::Command;
//! use tern_driver::transport::MockTransport;
//! use tern_driver::{Manager, ManagerConfig};
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.push_reply(doc! { "ok" => 1, "pong" => true });
//!
//! let manager = Manager::with_transport(ManagerConfig::default(), transport.clone()).unwrap();
//! let mut cursor = manager
//!     .execute_command("admin", &Command::new(doc! { "ping" => 1 }), None, None)
//!     .unwrap();
//! assert!(cursor.advance().unwrap().is_some());
//! assert_eq!(transport.command_names(), vec!["ping"]);
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;
use tern_bson::{Document, Value, doc, encode_document};

use super::{RawReply, ServerDescription, ServerId, ServerKind, Transport, TransportError};
use crate::concern::{ReadMode, ReadPreference};
use crate::error::{ErrorDomain, codes};
use crate::uri::{DEFAULT_PORT, Host};
use crate::wire::{LegacyRequest, OpReply};

/// A command seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub db: String,
    pub command: Document,
    pub read_preference: Option<ReadPreference>,
    pub server_id: ServerId,
}

impl RecordedCommand {
    pub fn name(&self) -> &str {
        self.command.first_key().unwrap_or_default()
    }
}

/// A legacy message seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedLegacy {
    pub request: LegacyRequest,
    pub server_id: ServerId,
}

#[derive(Debug)]
enum Scripted {
    Bytes(Vec<u8>),
    Reply(OpReply),
    Error(TransportError),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Scripted>,
    commands: Vec<RecordedCommand>,
    legacy: Vec<RecordedLegacy>,
}

/// A transport that replays queued replies.
#[derive(Debug)]
pub struct MockTransport {
    servers: Vec<ServerDescription>,
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A mock with a single standalone server.
    pub fn new() -> Self {
        Self::with_servers(vec![ServerDescription {
            id: ServerId(1),
            host: Host::new("localhost", DEFAULT_PORT),
            kind: ServerKind::Standalone,
            max_wire_version: 8,
        }])
    }

    /// A mock with an explicit server list.
    pub fn with_servers(servers: Vec<ServerDescription>) -> Self {
        Self {
            servers,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue a reply document.
    pub fn push_reply(&self, reply: Document) {
        let scripted = match encode_document(&reply) {
            Ok(bytes) => Scripted::Bytes(bytes),
            Err(e) => Scripted::Error(TransportError::protocol(e.to_string())),
        };
        self.state.lock().replies.push_back(scripted);
    }

    /// Queue raw reply bytes, which need not be a valid document.
    pub fn push_raw(&self, bytes: Vec<u8>) {
        self.state.lock().replies.push_back(Scripted::Bytes(bytes));
    }

    /// Queue an `OP_REPLY` for a legacy query or get-more.
    pub fn push_op_reply(&self, reply: OpReply) {
        self.state.lock().replies.push_back(Scripted::Reply(reply));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.state.lock().replies.push_back(Scripted::Error(error));
    }

    /// Every command sent so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Every legacy message sent so far.
    pub fn legacy_requests(&self) -> Vec<RecordedLegacy> {
        self.state.lock().legacy.clone()
    }

    /// Names of the commands sent so far.
    pub fn command_names(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Replies still queued.
    pub fn pending(&self) -> usize {
        self.state.lock().replies.len()
    }

    fn check_hint(&self, hint: ServerId) -> Result<ServerId, TransportError> {
        if self.servers.iter().any(|s| s.id == hint) {
            Ok(hint)
        } else {
            Err(TransportError::new(
                ErrorDomain::ServerSelection,
                codes::SERVER_SELECTION_INVALID_ID,
                format!("Requested server id {} does not exist", hint),
            ))
        }
    }

    fn find(&self, accept: impl Fn(ServerKind) -> bool) -> Option<ServerId> {
        self.servers.iter().find(|s| accept(s.kind)).map(|s| s.id)
    }

    fn select(&self, read_preference: Option<&ReadPreference>) -> Option<ServerId> {
        if let Some(id) = self.find(|k| matches!(k, ServerKind::Standalone | ServerKind::Mongos)) {
            return Some(id);
        }
        let primary = || self.find(|k| k == ServerKind::RsPrimary);
        let secondary = || self.find(|k| k == ServerKind::RsSecondary);
        match read_preference.map(ReadPreference::mode).unwrap_or_default() {
            ReadMode::Primary => primary(),
            ReadMode::PrimaryPreferred => primary().or_else(secondary),
            ReadMode::Secondary => secondary(),
            ReadMode::SecondaryPreferred => secondary().or_else(primary),
            ReadMode::Nearest => primary().or_else(secondary),
        }
    }
}

impl Transport for MockTransport {
    fn send_command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<RawReply, TransportError> {
        let server_id = match server_hint {
            Some(hint) => self.check_hint(hint)?,
            None => self.select_server(read_preference)?,
        };

        let mut state = self.state.lock();
        state.commands.push(RecordedCommand {
            db: db.to_string(),
            command: command.clone(),
            read_preference: read_preference.cloned(),
            server_id,
        });

        if command.first_key() == Some("killCursors") {
            let killed = command.get("cursors").cloned().unwrap_or(Value::Array(Vec::new()));
            let reply = doc! { "ok" => 1, "cursorsKilled" => killed };
            let bytes = encode_document(&reply).map_err(|e| TransportError::protocol(e.to_string()))?;
            return Ok(RawReply { bytes, server_id });
        }

        match state.replies.pop_front() {
            Some(Scripted::Bytes(bytes)) => Ok(RawReply { bytes, server_id }),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::Reply(_)) => Err(TransportError::protocol(format!(
                "Scripted OP_REPLY cannot answer '{}'",
                command.first_key().unwrap_or_default()
            ))),
            None => Err(TransportError::socket(format!(
                "No scripted reply for '{}'",
                command.first_key().unwrap_or_default()
            ))),
        }
    }

    fn select_server(
        &self,
        read_preference: Option<&ReadPreference>,
    ) -> Result<ServerId, TransportError> {
        self.select(read_preference)
            .ok_or_else(|| TransportError::server_selection("No suitable servers found"))
    }

    fn servers(&self) -> Vec<ServerDescription> {
        self.servers.clone()
    }

    fn send_legacy(
        &self,
        request: &LegacyRequest,
        server_id: ServerId,
    ) -> Result<Option<OpReply>, TransportError> {
        let server_id = self.check_hint(server_id)?;
        let mut state = self.state.lock();
        state.legacy.push(RecordedLegacy {
            request: request.clone(),
            server_id,
        });
        if !request.expects_reply() {
            return Ok(None);
        }

        match state.replies.pop_front() {
            Some(Scripted::Reply(reply)) => Ok(Some(reply)),
            Some(Scripted::Error(error)) => Err(error),
            Some(Scripted::Bytes(_)) => Err(TransportError::protocol(format!(
                "Scripted reply for {:?} is not an OP_REPLY",
                request.op_code()
            ))),
            None => Err(TransportError::socket(format!(
                "No scripted reply for {:?}",
                request.op_code()
            ))),
        }
    }
}
