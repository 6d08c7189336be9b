//! # tern-driver
//!
//! Command execution for the tern MongoDB driver.
//!
//! This crate provides:
//! - Connection string parsing with read/write concern and read preference
//! - Query and bulk write builders that produce server commands
//! - A [`Manager`] that runs queries, commands and writes over a [`Transport`]
//! - Cursors that fetch further batches with `getMore`
//! - An error classifier mapping server and transport codes to [`ErrorKind`]s
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tern_bson::doc;
//! use tern_driver::transport::MockTransport;
//! use tern_driver::{BulkWrite, Manager, ManagerConfig, Query};
//!
//! let transport = Arc::new(MockTransport::new());
//! let manager = Manager::with_transport(ManagerConfig::default(), transport.clone()).unwrap();
//!
//! transport.push_reply(doc! { "ok" => 1, "n" => 1 });
//! let mut bulk = BulkWrite::new(true);
//! bulk.insert(doc! { "name" => "tern" }).unwrap();
//! let result = manager.execute_write("app.birds", &mut bulk, None, None).unwrap();
//! assert_eq!(result.inserted_count(), Some(1));
//!
//! transport.push_reply(doc! {
//!     "cursor" => doc! {
//!         "id" => 0i64,
//!         "ns" => "app.birds",
//!         "firstBatch" => vec![tern_bson::Value::from(doc! { "name" => "tern" })],
//!     },
//!     "ok" => 1,
//! });
//! let query = Query::new(doc! { "name" => "tern" }, &doc! {}).unwrap();
//! let cursor = manager.execute_query("app.birds", &query, None, None).unwrap();
//! assert_eq!(cursor.into_iter().count(), 1);
//! ```

pub mod bulk;
pub mod command;
pub mod concern;
pub mod config;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod manager;
pub mod namespace;
pub mod query;
pub mod transport;
pub mod uri;
pub mod wire;
pub mod write_result;

pub use bulk::{BulkWrite, MAX_WRITE_BATCH_SIZE, OpKind};
pub use command::Command;
pub use concern::{Acknowledgment, ReadConcern, ReadMode, ReadPreference, WriteConcern};
pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use cursor::{Cursor, CursorId, CursorState};
pub use error::{Error, ErrorDomain, ErrorKind, Result, classify};
pub use logging::Logger;
pub use manager::{CommandReply, Manager};
pub use namespace::Namespace;
pub use query::{Query, QueryFlags};
pub use transport::{ServerDescription, ServerId, ServerKind, Transport, TransportError};
pub use uri::{ConnectionString, Host};
pub use write_result::{Upserted, WriteConcernError, WriteError, WriteResult};
