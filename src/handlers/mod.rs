//! Security handlers named by the `/Filter` of an `/Encrypt` dictionary

mod standard;

pub use standard::StandardSecurityHandler;

use crate::crypto::DocumentCrypt;
use crate::error::{CosError, CosResult};
use crate::pdf::Dictionary;
use crate::security::PasswordKind;
use crate::{EncryptionAlgorithm, PDFPermissions};
use log::debug;

/// Security handler interface for PDF encryption
#[derive(Debug, Clone)]
pub enum SecurityHandler {
    /// Standard password-based security handler
    Standard(StandardSecurityHandler),
}

impl SecurityHandler {
    /// Pick the handler for `encrypt`; `file_id` is the first `/ID` string
    pub fn from_dict(encrypt: &Dictionary, file_id: &[u8]) -> CosResult<Self> {
        match encrypt.get_name("Filter") {
            Some("Standard") => Ok(Self::Standard(StandardSecurityHandler::from_dict(encrypt, file_id)?)),
            Some(other) => Err(CosError::UnsupportedFilter(other.to_string())),
            None => Err(CosError::MissingDictionaryEntry("Filter".into())),
        }
    }

    /// Authenticate with password
    pub fn authenticate(&self, password: &str) -> CosResult<Option<(DocumentCrypt, PasswordKind)>> {
        debug!("Attempting password authentication");
        match self {
            SecurityHandler::Standard(handler) => handler.authenticate(password),
        }
    }

    /// Get encryption algorithm
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        match self {
            SecurityHandler::Standard(handler) => handler.algorithm,
        }
    }

    pub fn permissions(&self) -> PDFPermissions {
        match self {
            SecurityHandler::Standard(handler) => handler.permissions(),
        }
    }

    /// Create dictionary representation
    pub fn to_dict(&self) -> Dictionary {
        match self {
            SecurityHandler::Standard(handler) => handler.to_dict(),
        }
    }
}
