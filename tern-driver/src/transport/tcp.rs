//! Blocking TCP transport.
//!
//! Keeps one connection to the first reachable seed. The connection is
//! opened lazily, handshaken with `isMaster`, authenticated when the
//! connection string carries credentials, and dropped after an I/O or
//! protocol error so that the next command reconnects.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;
use tern_bson::{Document, decode_document, doc};
use tracing::{debug, trace, warn};

use super::scram::{self, Credentials};
use super::{RawReply, ServerDescription, ServerId, ServerKind, Transport, TransportError};
use crate::concern::{ReadMode, ReadPreference};
use crate::config::ManagerConfig;
use crate::error::{Error, ErrorDomain, Result, codes};
use crate::query::QueryFlags;
use crate::uri::{ConnectionString, Host};
use crate::wire::{
    HEADER_LEN, LegacyRequest, MessageHeader, OpCode, OpMsg, OpQuery, OpReply, next_request_id,
    reply_body,
};

/// First wire version that accepts OP_MSG.
const OP_MSG_WIRE_VERSION: i32 = 6;

struct Connection {
    stream: TcpStream,
    description: ServerDescription,
}

/// A transport over a single blocking TCP connection.
pub struct TcpTransport {
    seeds: Vec<Host>,
    connect_timeout: Duration,
    socket_timeout: Duration,
    app_name: Option<String>,
    credentials: Option<Credentials>,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("seeds", &self.seeds)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("app_name", &self.app_name)
            .field("credentials", &self.credentials)
            .finish()
    }
}

fn io_error(err: io::Error, context: &str, host: &Host) -> TransportError {
    TransportError::socket(format!("{} '{}': {}", context, host, err))
}

impl TcpTransport {
    pub fn new(seeds: Vec<Host>, connect_timeout: Duration, socket_timeout: Duration) -> Self {
        Self {
            seeds,
            connect_timeout,
            socket_timeout,
            app_name: None,
            credentials: None,
            connection: Mutex::new(None),
        }
    }

    /// Build from a parsed connection string and manager configuration.
    pub fn from_config(cs: &ConnectionString, config: &ManagerConfig) -> Result<Self> {
        if let Some(mechanism) = cs.option("authmechanism").and_then(|v| v.as_str()) {
            if mechanism != scram::MECHANISM {
                return Err(Error::invalid_argument(format!(
                    "Unsupported authentication mechanism: '{}'",
                    mechanism
                )));
            }
        }

        let mut transport = Self::new(
            cs.hosts().to_vec(),
            config.effective_connect_timeout(cs),
            config.effective_socket_timeout(cs),
        );
        transport.app_name = config.effective_app_name(cs);
        transport.credentials = cs.username().map(|username| Credentials {
            username: username.to_string(),
            password: cs.password().unwrap_or_default().to_string(),
            source: cs.auth_source().to_string(),
        });
        Ok(transport)
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn seeds(&self) -> &[Host] {
        &self.seeds
    }

    fn handshake_command(&self) -> Document {
        let mut client = Document::new();
        if let Some(name) = &self.app_name {
            client.append("application", doc! { "name" => name.as_str() });
        }
        client.append(
            "driver",
            doc! { "name" => "tern", "version" => env!("CARGO_PKG_VERSION") },
        );
        client.append(
            "os",
            doc! {
                "type" => std::env::consts::OS,
                "architecture" => std::env::consts::ARCH,
            },
        );
        doc! { "isMaster" => 1, "client" => client }
    }

    fn open_stream(&self, host: &Host) -> std::result::Result<TcpStream, TransportError> {
        let addrs = (host.host.as_str(), host.port).to_socket_addrs().map_err(|e| {
            TransportError::new(
                ErrorDomain::Stream,
                codes::STREAM_NAME_RESOLUTION,
                format!("Failed to resolve '{}': {}", host, e),
            )
        })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.socket_timeout))
                        .and_then(|_| stream.set_write_timeout(Some(self.socket_timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| io_error(e, "Failed to configure socket for", host))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::server_selection(
                format!("Timed out connecting to '{}'", host),
            ),
            Some(e) => TransportError::connect(format!("Failed to connect to '{}': {}", host, e)),
            None => TransportError::new(
                ErrorDomain::Stream,
                codes::STREAM_NAME_RESOLUTION,
                format!("No addresses found for '{}'", host),
            ),
        })
    }

    fn connect_to(&self, index: usize, host: &Host) -> std::result::Result<Connection, TransportError> {
        let mut stream = self.open_stream(host)?;

        let handshake = OpQuery::command("admin", self.handshake_command(), QueryFlags::NONE);
        let request_id = next_request_id();
        let bytes = round_trip(&mut stream, host, &handshake.encode(request_id)?, request_id)?;
        let reply = decode_document(&bytes).map_err(Error::from)?;
        if !reply.get("ok").is_some_and(|v| v.is_truthy()) {
            return Err(TransportError::protocol(format!(
                "Handshake with '{}' failed: {}",
                host,
                reply.get_str("errmsg").unwrap_or("no error message")
            )));
        }

        let description = ServerDescription {
            id: ServerId(index as u32 + 1),
            host: host.clone(),
            kind: ServerKind::from_handshake(&reply),
            max_wire_version: reply.find_as_int32("maxWireVersion", 0),
        };
        debug!(
            host = %host,
            server_id = %description.id,
            kind = ?description.kind,
            max_wire_version = description.max_wire_version,
            "Connected"
        );

        let mut connection = Connection {
            stream,
            description,
        };
        if let Some(credentials) = &self.credentials {
            let source = credentials.source.clone();
            scram::authenticate(credentials, |command| {
                let bytes = connection.run(&source, command, None)?;
                Ok(decode_document(&bytes).map_err(Error::from)?)
            })?;
        }
        Ok(connection)
    }

    fn connect(&self) -> std::result::Result<Connection, TransportError> {
        let mut last_error = None;
        for (index, host) in self.seeds.iter().enumerate() {
            match self.connect_to(index, host) {
                Ok(connection) => return Ok(connection),
                Err(e) if e.code == codes::CLIENT_AUTHENTICATE => return Err(e),
                Err(e) => {
                    warn!(host = %host, error = %e, "Seed unreachable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| TransportError::server_selection("No suitable servers found")))
    }

    /// Run `f` against the live connection, connecting first if needed.
    ///
    /// The connection is discarded when `f` fails with a stream or protocol
    /// error; other failures leave it usable.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> std::result::Result<T, TransportError>,
    ) -> std::result::Result<T, TransportError> {
        let mut guard = self.connection.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(TransportError::server_selection("No suitable servers found"));
        };
        let result = f(&mut *connection);
        if let Err(e) = &result {
            if matches!(e.domain, ErrorDomain::Stream | ErrorDomain::Protocol) {
                debug!(host = %connection.description.host, error = %e, "Dropping connection");
                *guard = None;
            }
        }
        result
    }
}

/// Reject a hint naming a server other than the connected one.
fn check_hint(connection: &Connection, hint: ServerId) -> std::result::Result<(), TransportError> {
    if hint == connection.description.id {
        Ok(())
    } else {
        Err(TransportError::new(
            ErrorDomain::ServerSelection,
            codes::SERVER_SELECTION_INVALID_ID,
            format!("Requested server id {} is not connected", hint),
        ))
    }
}

impl Connection {
    fn run(
        &mut self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let request_id = next_request_id();
        let non_primary = read_preference.filter(|rp| rp.mode() != ReadMode::Primary);

        let message = if self.description.max_wire_version >= OP_MSG_WIRE_VERSION {
            let mut body = command.clone();
            body.append("$db", db);
            if let Some(rp) = non_primary {
                body.append("$readPreference", rp.to_document());
            }
            OpMsg::new(body).encode(request_id)?
        } else {
            match non_primary {
                Some(rp) => {
                    let wrapped = doc! {
                        "$query" => command.clone(),
                        "$readPreference" => rp.to_document(),
                    };
                    OpQuery::command(db, wrapped, QueryFlags::SLAVE_OK).encode(request_id)?
                }
                None => OpQuery::command(db, command.clone(), QueryFlags::NONE).encode(request_id)?,
            }
        };

        round_trip(&mut self.stream, &self.description.host, &message, request_id)
    }

    fn run_legacy(
        &mut self,
        request: &LegacyRequest,
    ) -> std::result::Result<Option<OpReply>, TransportError> {
        let request_id = next_request_id();
        let host = &self.description.host;
        send_message(&mut self.stream, host, &request.encode(request_id)?)?;
        if !request.expects_reply() {
            return Ok(None);
        }

        let (header, payload) = read_reply(&mut self.stream, host, request_id)?;
        if header.op_code != OpCode::Reply {
            return Err(TransportError::protocol(format!(
                "Expected OP_REPLY for {:?}, got {:?}",
                request.op_code(),
                header.op_code
            )));
        }
        Ok(Some(OpReply::decode(&payload)?))
    }
}

fn send_message(
    stream: &mut TcpStream,
    host: &Host,
    message: &[u8],
) -> std::result::Result<(), TransportError> {
    stream
        .write_all(message)
        .and_then(|_| stream.flush())
        .map_err(|e| io_error(e, "Failed to send message to", host))
}

/// Send one message and return the bytes of the reply document.
fn round_trip(
    stream: &mut TcpStream,
    host: &Host,
    message: &[u8],
    request_id: i32,
) -> std::result::Result<Vec<u8>, TransportError> {
    send_message(stream, host, message)?;
    let (header, payload) = read_reply(stream, host, request_id)?;
    Ok(reply_body(header.op_code, &payload)?.to_vec())
}

/// Read the reply to `request_id`, returning its header and payload.
fn read_reply(
    stream: &mut TcpStream,
    host: &Host,
    request_id: i32,
) -> std::result::Result<(MessageHeader, Vec<u8>), TransportError> {
    let mut header_bytes = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut header_bytes)
        .map_err(|e| io_error(e, "Failed to read reply header from", host))?;
    let header = MessageHeader::parse(&header_bytes)?;
    if header.response_to != request_id {
        return Err(TransportError::protocol(format!(
            "Reply responds to request {} instead of {}",
            header.response_to, request_id
        )));
    }

    let mut payload = vec![0u8; header.body_len()];
    stream
        .read_exact(&mut payload)
        .map_err(|e| io_error(e, "Failed to read reply from", host))?;
    trace!(host = %host, bytes = header.length, op_code = ?header.op_code, "Reply received");

    Ok((header, payload))
}

impl Transport for TcpTransport {
    fn send_command(
        &self,
        db: &str,
        command: &Document,
        read_preference: Option<&ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> std::result::Result<RawReply, TransportError> {
        self.with_connection(|connection| {
            if let Some(hint) = server_hint {
                check_hint(connection, hint)?;
            }
            let bytes = connection.run(db, command, read_preference)?;
            Ok(RawReply {
                bytes,
                server_id: connection.description.id,
            })
        })
    }

    fn select_server(
        &self,
        _read_preference: Option<&ReadPreference>,
    ) -> std::result::Result<ServerId, TransportError> {
        self.with_connection(|connection| Ok(connection.description.id))
    }

    fn servers(&self) -> Vec<ServerDescription> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| vec![connection.description.clone()])
            .unwrap_or_default()
    }

    fn send_legacy(
        &self,
        request: &LegacyRequest,
        server_id: ServerId,
    ) -> std::result::Result<Option<OpReply>, TransportError> {
        self.with_connection(|connection| {
            check_hint(connection, server_id)?;
            connection.run_legacy(request)
        })
    }
}
