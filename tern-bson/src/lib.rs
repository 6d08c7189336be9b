//! # tern-bson
//!
//! BSON encoding and decoding for the tern MongoDB driver.
//!
//! This crate provides:
//! - An ordered [`Document`] and the closed [`Value`] sum type
//! - A deterministic binary encoder and a bounds-checked decoder
//! - [`ObjectId`] generation and [`Decimal128`] text conversion
//! - MongoDB Extended JSON v2 in canonical and relaxed modes
//! - A serde bridge ([`to_document`], [`from_document`])
//!
//! ## Example
//!
//! ```rust
//! use tern_bson::{doc, Document};
//!
//! let d = doc! { "name" => "tern", "n" => 3 };
//! let bytes = d.to_bytes().unwrap();
//! assert_eq!(Document::from_bytes(&bytes).unwrap(), d);
//! assert_eq!(d.to_relaxed_json(), r#"{"name":"tern","n":3}"#);
//! ```

pub mod decimal128;
pub mod decode;
pub mod document;
pub mod encode;
pub mod error;
pub mod json;
mod macros;
pub mod mapping;
pub mod oid;
pub mod value;

pub use decimal128::Decimal128;
pub use decode::{decode_document, decode_document_prefix};
pub use document::Document;
pub use encode::{encode_document, write_document};
pub use error::{Error, Result, ValueAccessError};
pub use json::{JsonMode, from_json, to_canonical_json, to_relaxed_json};
pub use mapping::{from_document, from_value, to_document, to_value};
pub use oid::ObjectId;
pub use value::{
    Binary, BinarySubtype, DateTime, ElementType, JavaScriptCodeWithScope, Regex, Timestamp, Value,
};
