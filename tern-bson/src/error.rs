//! Error types for BSON encoding, decoding and conversion.

use thiserror::Error;

/// Result type for BSON operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding, decoding or converting BSON.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A length prefix disagrees with the bytes that are actually available.
    #[error("invalid length {length} at offset {offset}: {reason}")]
    InvalidLength {
        /// The declared length.
        length: i64,
        /// Byte offset of the length prefix.
        offset: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The buffer ended in the middle of an element.
    #[error("unexpected end of buffer at offset {offset} while reading {context}")]
    UnexpectedEof {
        /// Byte offset where more bytes were expected.
        offset: usize,
        /// What was being read.
        context: &'static str,
    },

    /// An element carried a type byte this codec does not know.
    #[error("unknown element type 0x{tag:02x} for key '{key}'")]
    UnknownElementType {
        /// The offending type byte.
        tag: u8,
        /// The key of the element.
        key: String,
    },

    /// A string or key was not valid UTF-8.
    #[error("invalid UTF-8 in {context} at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset of the string.
        offset: usize,
        /// Whether it was a key, a string value, a regex, etc.
        context: &'static str,
    },

    /// A key cannot be encoded (it contains a NUL byte).
    #[error("invalid key '{0}': keys must not contain NUL bytes")]
    InvalidKey(String),

    /// A regular expression pattern or options string contains a NUL byte.
    #[error("invalid regular expression '{0}': must not contain NUL bytes")]
    InvalidRegex(String),

    /// A boolean element held something other than 0 or 1.
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBoolean(u8),

    /// Bytes remained after the outermost document.
    #[error("{0} trailing bytes after document")]
    TrailingBytes(usize),

    /// Nesting exceeded the decoder's depth limit.
    #[error("document nesting exceeds {0} levels")]
    DepthLimitExceeded(usize),

    /// The encoded document would not fit in a BSON length prefix.
    #[error("document of {0} bytes exceeds the maximum BSON size")]
    DocumentTooLarge(usize),

    /// An ObjectId could not be parsed.
    #[error("invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// A Decimal128 could not be parsed or represented.
    #[error("invalid Decimal128: {0}")]
    InvalidDecimal128(String),

    /// Extended JSON could not be parsed or had the wrong shape.
    #[error("extended JSON error: {0}")]
    Json(String),

    /// A serde conversion between a Rust value and a document failed.
    #[error("serde error: {0}")]
    Serde(String),
}

impl Error {
    /// Create an extended JSON error.
    pub fn json(message: impl Into<String>) -> Self {
        Self::Json(message.into())
    }

    /// Create a serde conversion error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde(message.into())
    }

    /// Check if this error came from reading malformed binary input.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidLength { .. }
                | Self::UnexpectedEof { .. }
                | Self::UnknownElementType { .. }
                | Self::InvalidUtf8 { .. }
                | Self::InvalidBoolean(_)
                | Self::TrailingBytes(_)
                | Self::DepthLimitExceeded(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

/// Error returned by the typed document accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueAccessError {
    /// No element with the requested key.
    #[error("field '{0}' is not present")]
    NotPresent(String),

    /// The element exists but holds another type.
    #[error("field '{key}' is not {expected}")]
    UnexpectedType {
        /// The looked-up key.
        key: String,
        /// Human readable name of the expected type.
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidBoolean(7);
        assert_eq!(err.to_string(), "invalid boolean byte 0x07");

        let err = Error::UnknownElementType {
            tag: 0x42,
            key: "a".to_string(),
        };
        assert_eq!(err.to_string(), "unknown element type 0x42 for key 'a'");
    }

    #[test]
    fn test_decode_error_classification() {
        assert!(Error::TrailingBytes(3).is_decode_error());
        assert!(!Error::InvalidKey("a\0b".into()).is_decode_error());
        assert!(!Error::json("bad").is_decode_error());
    }

    #[test]
    fn test_access_error_display() {
        let err = ValueAccessError::UnexpectedType {
            key: "age".into(),
            expected: "an i32",
        };
        assert_eq!(err.to_string(), "field 'age' is not an i32");
    }
}
