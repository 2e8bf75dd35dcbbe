//! Error types for the COS object engine

use thiserror::Error;

use crate::document::{DocumentState, ObjectKey};
use crate::pdf::Reference;

/// Main error type for parsing, crypto and document operations
#[derive(Error, Debug)]
pub enum CosError {
    /// The password provider gave up
    #[error("Authentication aborted by password provider")]
    AuthenticationAborted,

    /// Unsupported security handler filter
    #[error("Unsupported encryption filter: {0}")]
    UnsupportedFilter(String),

    /// Unsupported standard security handler revision
    #[error("Unsupported revision: {0}")]
    UnsupportedRevision(u8),

    /// Unsupported stream filter
    #[error("Unsupported stream filter: {0}")]
    UnsupportedStreamFilter(String),

    /// Invalid key length
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// Invalid data length
    #[error("Invalid data length for {operation}")]
    InvalidDataLength {
        operation: String,
    },

    /// Malformed structure at a byte offset
    #[error("Malformed PDF structure at offset {offset}: {message}")]
    MalformedPDF {
        offset: usize,
        message: String,
    },

    /// Expected value missing or of the wrong kind
    #[error("Invalid value for property {property} at offset {offset}")]
    InvalidProperty {
        property: &'static str,
        offset: usize,
    },

    /// Missing required dictionary entry
    #[error("Missing required dictionary entry: {0}")]
    MissingDictionaryEntry(String),

    /// Object could not be resolved
    #[error("Object not found: {0}")]
    ObjectNotFound(Reference),

    /// Handle that names no object in the graph
    #[error("No object for handle {0}")]
    UnknownObject(ObjectKey),

    /// Cryptographic operation failed
    #[error("Cryptographic operation failed: {0}")]
    CryptoError(String),

    /// Compression error
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Cross reference table error
    #[error("Cross reference table error: {0}")]
    XRefError(String),

    /// Operation not allowed in the current engine state
    #[error("Operation {operation} not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DocumentState,
    },

    /// Annotation exchange record that cannot be applied
    #[error("Invalid annotation data: {0}")]
    InvalidAnnotation(String),

    /// Background parser worker went away before replying
    #[error("Parser worker disconnected")]
    ParserDisconnected,

    /// JSON encoding or decoding of annotation data
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for COS engine operations
pub type CosResult<T> = Result<T, CosError>;

impl CosError {
    /// Create a new malformed structure error
    pub fn malformed(offset: usize, msg: impl Into<String>) -> Self {
        Self::MalformedPDF {
            offset,
            message: msg.into(),
        }
    }

    /// Create a new crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::CryptoError(msg.into())
    }

    /// Create a new invalid data length error
    pub fn invalid_length(operation: impl Into<String>) -> Self {
        Self::InvalidDataLength {
            operation: operation.into(),
        }
    }

    /// Create a new invalid property error
    pub fn invalid_property(property: &'static str, offset: usize) -> Self {
        Self::InvalidProperty { property, offset }
    }

    /// Create a new xref error
    pub fn xref(msg: impl Into<String>) -> Self {
        Self::XRefError(msg.into())
    }

    /// Check if error is authentication related
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationAborted)
    }

    /// Check if error is cryptographic
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::CryptoError(_) | Self::InvalidKeyLength(_) | Self::InvalidDataLength { .. }
        )
    }

    /// Check if error is related to PDF structure
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPDF { .. }
                | Self::InvalidProperty { .. }
                | Self::MissingDictionaryEntry(_)
                | Self::XRefError(_)
                | Self::ObjectNotFound(_)
                | Self::UnknownObject(_)
        )
    }
}

impl From<aes::cipher::InvalidLength> for CosError {
    fn from(err: aes::cipher::InvalidLength) -> Self {
        Self::CryptoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CosError::malformed(12, "Invalid header");
        assert!(matches!(err, CosError::MalformedPDF { offset: 12, .. }));

        let err = CosError::crypto("Key generation failed");
        assert!(matches!(err, CosError::CryptoError(_)));

        let err = CosError::invalid_length("AES decryption");
        assert!(matches!(err, CosError::InvalidDataLength { .. }));
    }

    #[test]
    fn test_error_categorization() {
        let auth_err = CosError::AuthenticationAborted;
        assert!(auth_err.is_auth_error());
        assert!(!auth_err.is_crypto_error());

        let crypto_err = CosError::crypto("test");
        assert!(crypto_err.is_crypto_error());
        assert!(!crypto_err.is_structure_error());

        let struct_err = CosError::invalid_property("Length", 40);
        assert!(struct_err.is_structure_error());
        assert!(!struct_err.is_auth_error());
    }

    #[test]
    fn test_error_display() {
        let err = CosError::InvalidKeyLength(32);
        assert_eq!(err.to_string(), "Invalid key length: 32");

        let err = CosError::invalid_property("First", 7);
        assert_eq!(err.to_string(), "Invalid value for property First at offset 7");

        let err = CosError::ObjectNotFound(Reference::new(5, 0));
        assert_eq!(err.to_string(), "Object not found: 5 0 R");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        let err: CosError = json_err.into();
        assert!(matches!(err, CosError::JsonError(_)));
    }
}
