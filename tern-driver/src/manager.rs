//! Command execution.
//!
//! The [`Manager`] owns a transport and the default concerns parsed from the
//! connection string. It turns queries, commands and bulk writes into wire
//! commands, checks the replies and hands back cursors or write results.
//! Queries against servers older than wire version 4 are sent as legacy
//! `OP_QUERY` messages on the collection.

use std::fmt;
use std::sync::Arc;

use tern_bson::{Document, Value, decode_document, doc};
use tracing::{debug, info, trace};

use crate::bulk::BulkWrite;
use crate::command::Command;
use crate::concern::{ReadConcern, ReadPreference, WriteConcern};
use crate::config::ManagerConfig;
use crate::cursor::{Cursor, CursorSource, CursorSpec};
use crate::error::{Error, ErrorDomain, Result, codes};
use crate::logging::Logger;
use crate::namespace::Namespace;
use crate::query::{Query, QueryFlags};
use crate::transport::{ServerDescription, ServerId, ServerKind, TcpTransport, Transport};
use crate::uri::ConnectionString;
use crate::wire::{LegacyRequest, OpQuery, OpReply};
use crate::write_result::{ReplyMerger, WriteResult};

/// First wire version with the `find` and `getMore` commands.
pub const FIND_COMMAND_WIRE_VERSION: i32 = 4;

/// Turn an `ok: 0` or `$err` reply into an error.
fn check_reply(reply: &Document) -> Result<()> {
    let failed = reply.contains_key("$err")
        || reply.get("ok").is_some_and(|ok| !ok.is_truthy());
    if !failed {
        return Ok(());
    }

    let message = reply
        .get_str("errmsg")
        .or_else(|_| reply.get_str("$err"))
        .unwrap_or("Unknown command error")
        .to_string();
    let code = reply
        .get("code")
        .and_then(Value::to_i64)
        .and_then(|c| u32::try_from(c).ok())
        .filter(|c| *c != 0);
    Err(match code {
        Some(code) => Error::server(code, message),
        None => Error::classified(ErrorDomain::Query, codes::QUERY_FAILURE, message),
    })
}

/// Send a command, decode the reply and check it for a server error.
pub(crate) fn run_command(
    transport: &dyn Transport,
    db: &str,
    command: &Document,
    read_preference: Option<&ReadPreference>,
    server_hint: Option<ServerId>,
) -> Result<(Document, ServerId)> {
    let raw = transport.send_command(db, command, read_preference, server_hint)?;
    let reply = decode_document(&raw.bytes)?;
    check_reply(&reply)?;
    Ok((reply, raw.server_id))
}

/// Send a legacy query or get-more and check the reply flags.
pub(crate) fn run_legacy(
    transport: &dyn Transport,
    request: &LegacyRequest,
    server_id: ServerId,
) -> Result<OpReply> {
    let reply = transport.send_legacy(request, server_id)?.ok_or_else(|| {
        Error::unexpected_value(format!("No reply to {:?} message", request.op_code()))
    })?;

    if reply.response_flags & OpReply::CURSOR_NOT_FOUND != 0 {
        let cursor_id = match request {
            LegacyRequest::GetMore(get_more) => get_more.cursor_id,
            _ => reply.cursor_id,
        };
        return Err(Error::classified(
            ErrorDomain::Cursor,
            codes::CURSOR_INVALID_CURSOR,
            format!("Cursor {} not found", cursor_id),
        ));
    }
    if reply.response_flags & OpReply::QUERY_FAILURE != 0 {
        let failure = reply
            .documents
            .first()
            .cloned()
            .unwrap_or_else(|| doc! { "$err" => "Unknown query failure" });
        check_reply(&failure)?;
        return Err(Error::classified(
            ErrorDomain::Query,
            codes::QUERY_FAILURE,
            "Unknown query failure",
        ));
    }
    Ok(reply)
}

/// The two shapes a command reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    /// A single reply document.
    Plain(Document),
    /// A reply describing a server-side cursor.
    Cursor(CursorSpec),
}

impl CommandReply {
    pub fn from_reply(reply: Document) -> Result<Self> {
        match CursorSpec::from_reply(&reply)? {
            Some(spec) => Ok(Self::Cursor(spec)),
            None => Ok(Self::Plain(reply)),
        }
    }
}

/// Executes queries, commands and writes against a deployment.
#[derive(Clone)]
pub struct Manager {
    config: ManagerConfig,
    connection_string: ConnectionString,
    transport: Arc<dyn Transport>,
    logger: Logger,
}

impl Manager {
    /// Connect to `uri`, applying `options` over the URI's own options.
    ///
    /// No connection is made until the first operation.
    pub fn new(uri: &str, options: Document) -> Result<Self> {
        Self::with_config(ManagerConfig {
            uri: uri.to_string(),
            options,
            ..ManagerConfig::default()
        })
    }

    /// Create a manager over TCP from a configuration.
    pub fn with_config(config: ManagerConfig) -> Result<Self> {
        let connection_string = config.connection_string()?;
        let transport = TcpTransport::from_config(&connection_string, &config)?;
        Self::build(config, connection_string, Arc::new(transport))
    }

    /// Create a manager over any transport.
    pub fn with_transport(config: ManagerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let connection_string = config.connection_string()?;
        Self::build(config, connection_string, transport)
    }

    fn build(
        config: ManagerConfig,
        connection_string: ConnectionString,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let logger = config.logger.clone();
        logger.in_scope(|| {
            info!(
                hosts = ?connection_string.hosts(),
                read_preference = %connection_string.read_preference().mode(),
                "Manager created"
            )
        });
        Ok(Self {
            config,
            connection_string,
            transport,
            logger,
        })
    }

    /// Run a query against `namespace`.
    ///
    /// The returned cursor is positioned on the first result, if any.
    /// Exhaust cursors are refused.
    pub fn execute_query(
        &self,
        namespace: &str,
        query: &Query,
        read_preference: Option<ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Cursor> {
        self.logger.in_scope(|| {
            let ns = Namespace::parse(namespace)?;
            if query.flags().contains(QueryFlags::EXHAUST) {
                return Err(Error::invalid_argument("Exhaust cursors are not supported"));
            }
            let read_preference = query.read_preference_for(
                read_preference.unwrap_or_else(|| self.read_preference().clone()),
            );
            let server_id = match server_hint {
                Some(id) => id,
                None => self.transport.select_server(Some(&read_preference))?,
            };
            let legacy_server = self
                .transport
                .servers()
                .into_iter()
                .find(|s| s.id == server_id && s.max_wire_version < FIND_COMMAND_WIRE_VERSION);
            if let Some(server) = legacy_server {
                return self.execute_legacy_query(ns, query, read_preference, &server);
            }

            let command = query.to_find_command(&ns.coll, self.read_concern());
            debug!(namespace = %ns, filter = ?query.filter(), "Executing query");

            let (reply, server_id) = run_command(
                self.transport.as_ref(),
                &ns.db,
                &command,
                Some(&read_preference),
                Some(server_id),
            )?;
            let spec = CursorSpec::from_reply(&reply)?
                .ok_or_else(|| Error::unexpected_value("Invalid find reply: missing cursor"))?;

            let mut cursor = Cursor::from_spec(
                Arc::clone(&self.transport),
                self.logger.clone(),
                spec,
                CursorSource::Query(query.clone()),
                Some(read_preference),
                server_id,
            );
            cursor.prime()?;
            Ok(cursor)
        })
    }

    fn execute_legacy_query(
        &self,
        ns: Namespace,
        query: &Query,
        read_preference: ReadPreference,
        server: &ServerDescription,
    ) -> Result<Cursor> {
        let read_concern = query.read_concern().unwrap_or(self.read_concern());
        if !read_concern.is_default() {
            return Err(Error::classified(
                ErrorDomain::Command,
                codes::PROTOCOL_BAD_WIRE_VERSION,
                "The selected server does not support readConcern",
            ));
        }

        let secondary_ok = read_preference.is_secondary_ok();
        let mut op = OpQuery::find(&ns, query, secondary_ok);
        if secondary_ok && server.kind == ServerKind::Mongos {
            op.query.append("$readPreference", read_preference.to_document());
        }
        debug!(
            namespace = %ns,
            filter = ?query.filter(),
            max_wire_version = server.max_wire_version,
            "Executing legacy query"
        );

        let reply = run_legacy(self.transport.as_ref(), &LegacyRequest::Query(op), server.id)?;
        let mut cursor = Cursor::from_op_reply(
            Arc::clone(&self.transport),
            self.logger.clone(),
            ns,
            reply,
            query,
            Some(read_preference),
            server.id,
        );
        cursor.prime()?;
        Ok(cursor)
    }

    /// Run a command against `db`.
    ///
    /// A reply that describes a cursor is iterated as that cursor; any other
    /// reply is yielded as the cursor's only document.
    pub fn execute_command(
        &self,
        db: &str,
        command: &Command,
        read_preference: Option<ReadPreference>,
        server_hint: Option<ServerId>,
    ) -> Result<Cursor> {
        self.logger.in_scope(|| {
            debug!(db = db, command = command.name().unwrap_or_default(), "Executing command");
            let (reply, server_id) = run_command(
                self.transport.as_ref(),
                db,
                command.document(),
                read_preference.as_ref(),
                server_hint,
            )?;

            let source = CursorSource::Command(command.clone());
            let transport = Arc::clone(&self.transport);
            let mut cursor = match CommandReply::from_reply(reply)? {
                CommandReply::Cursor(spec) => Cursor::from_spec(
                    transport,
                    self.logger.clone(),
                    spec,
                    source,
                    read_preference,
                    server_id,
                ),
                CommandReply::Plain(document) => Cursor::single(
                    transport,
                    self.logger.clone(),
                    Namespace::new(db, "$cmd"),
                    document,
                    source,
                    read_preference,
                    server_id,
                ),
            };
            cursor.prime()?;
            Ok(cursor)
        })
    }

    /// Execute a bulk write against `namespace`.
    ///
    /// Without an explicit write concern the manager's default is used. Write
    /// errors, write concern errors and command failures are reported as
    /// [`ErrorKind::WriteFailed`](crate::error::ErrorKind::WriteFailed) with
    /// the partial result attached.
    pub fn execute_write(
        &self,
        namespace: &str,
        bulk: &mut BulkWrite,
        write_concern: Option<&WriteConcern>,
        server_hint: Option<ServerId>,
    ) -> Result<WriteResult> {
        self.logger.in_scope(|| {
            let write_concern = write_concern
                .cloned()
                .unwrap_or_else(|| self.write_concern().clone());
            let scratch = bulk.reset(namespace, &write_concern)?.clone();
            if bulk.is_empty() {
                return Err(Error::invalid_argument("Cannot do an empty bulk write"));
            }

            let server_id = match server_hint {
                Some(id) => id,
                None => self.transport.select_server(None)?,
            };
            bulk.mark_executed();
            debug!(
                namespace = %namespace,
                operations = bulk.count(),
                batches = scratch.batches.len(),
                ordered = bulk.is_ordered(),
                "Executing bulk write"
            );

            let acknowledged = write_concern.is_acknowledged();
            let mut merger = ReplyMerger::new();
            let mut command_failure = None;
            for batch in &scratch.batches {
                trace!(kind = %batch.kind, operations = batch.indices.len(), "Sending write batch");
                match run_command(
                    self.transport.as_ref(),
                    &scratch.database,
                    &batch.command,
                    None,
                    Some(server_id),
                ) {
                    Ok((reply, _)) => {
                        if acknowledged {
                            merger.merge(batch.kind, &reply, &batch.indices);
                        }
                    }
                    Err(e) if matches!(e.domain, Some(ErrorDomain::Server | ErrorDomain::Query)) => {
                        command_failure = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
                if bulk.is_ordered() && merger.has_write_errors() {
                    break;
                }
            }

            let result = if acknowledged {
                WriteResult::from_reply(merger.into_document(), write_concern, server_id)
            } else {
                WriteResult::unacknowledged(write_concern, server_id)
            };
            if let Some(e) = command_failure {
                let mut err = Error::write_failed(e.message, result);
                err.code = e.code;
                err.domain = Some(ErrorDomain::Command);
                return Err(err);
            }
            if !acknowledged {
                return Ok(result);
            }

            if let Some(first) = result.write_errors().first() {
                let (message, code) = (first.message.clone(), first.code);
                let mut err = Error::write_failed(message, result).with_domain(ErrorDomain::Command);
                err.code = u32::try_from(code).ok();
                return Err(err);
            }
            if let Some(wce) = result.write_concern_error() {
                let (message, code) = (wce.message.clone(), wce.code);
                let mut err =
                    Error::write_failed(message, result).with_domain(ErrorDomain::WriteConcern);
                err.code = u32::try_from(code).ok();
                return Err(err);
            }
            Ok(result)
        })
    }

    /// Pick a server for a read preference, connecting if necessary.
    pub fn select_server(&self, read_preference: Option<&ReadPreference>) -> Result<ServerId> {
        let read_preference = read_preference.unwrap_or(self.read_preference());
        Ok(self.transport.select_server(Some(read_preference))?)
    }

    /// Servers the transport currently knows about.
    pub fn servers(&self) -> Vec<ServerDescription> {
        self.transport.servers()
    }

    /// Default read concern.
    pub fn read_concern(&self) -> &ReadConcern {
        self.connection_string.read_concern()
    }

    /// Default read preference.
    pub fn read_preference(&self) -> &ReadPreference {
        self.connection_string.read_preference()
    }

    /// Default write concern.
    pub fn write_concern(&self) -> &WriteConcern {
        self.connection_string.write_concern()
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("connection_string", &self.connection_string)
            .field("logger", &self.logger)
            .finish()
    }
}
