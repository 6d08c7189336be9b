//! # Tern
//!
//! A blocking MongoDB driver core.
//!
//! Tern provides:
//! - A BSON codec with Extended JSON and a serde bridge
//! - Query and bulk write builders that produce server commands
//! - Read/write concern and read preference parsed from connection strings
//! - Command execution with `getMore`-backed cursors
//! - Classified errors that keep the server's code and partial write results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tern::prelude::*;
//!
//! fn main() -> Result<(), tern::Error> {
//!     let manager = Manager::new("mongodb://localhost:27017/?appName=birds", doc! {})?;
//!
//!     let mut bulk = BulkWrite::new(true);
//!     bulk.insert(doc! { "name" => "arctic tern", "wingspan" => 80 })?;
//!     let result = manager.execute_write("zoo.birds", &mut bulk, None, None)?;
//!     println!("inserted {:?}", result.inserted_count());
//!
//!     let query = Query::new(
//!         doc! { "wingspan" => doc! { "$gte" => 70 } },
//!         &doc! { "sort" => doc! { "name" => 1 }, "limit" => 10 },
//!     )?;
//!     for bird in manager.execute_query("zoo.birds", &query, None, None)? {
//!         println!("{}", bird?);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// BSON documents, values and codecs.
pub mod bson {
    pub use tern_bson::*;
}

/// Command execution, concerns and transports.
pub mod driver {
    pub use tern_driver::*;
}

pub use tern_bson::{array, doc};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bson::{Document, ObjectId, Value};
    pub use crate::driver::{
        BulkWrite, Command, Cursor, Manager, ManagerConfig, Query, ReadConcern, ReadMode,
        ReadPreference, WriteConcern, WriteResult,
    };
    pub use crate::{array, doc};
}

// Re-export key types at the crate root
pub use driver::{Error, ErrorKind, Manager, Result};
