//! Encryption codec: per-object keys and string/stream ciphers

mod rc4;
mod aes;
mod engine;

pub use engine::{CryptMethod, DocumentCrypt};
pub(crate) use self::aes::{cbc_decrypt, cbc_encrypt};
pub(crate) use self::rc4::rc4_process;

use std::fmt;
use std::sync::Arc;

use crate::error::CosResult;
use crate::pdf::Reference;

/// Trait for PDF object encryption/decryption
pub(crate) trait CryptoProvider: Send + Sync {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>>;
    fn decrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>>;
}

/// Encryption context for one indirect object
///
/// Without key material every operation is the identity; this is the state
/// of objects in unencrypted documents and of objects unpacked from an
/// object stream, whose container was already decrypted as a whole.
#[derive(Clone)]
pub struct CryptInfo {
    pub reference: Reference,
    crypt: Option<Arc<DocumentCrypt>>,
}

impl CryptInfo {
    pub fn new(reference: Reference, crypt: Arc<DocumentCrypt>) -> Self {
        Self {
            reference,
            crypt: Some(crypt),
        }
    }

    /// Context carrying identity only
    pub fn plain(reference: Reference) -> Self {
        Self {
            reference,
            crypt: None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypt.is_some()
    }

    pub fn decrypt_string(&self, data: &[u8]) -> CosResult<Vec<u8>> {
        match &self.crypt {
            Some(crypt) => crypt.decrypt_string(self.reference, data),
            None => Ok(data.to_vec()),
        }
    }

    pub fn encrypt_string(&self, data: &[u8]) -> CosResult<Vec<u8>> {
        match &self.crypt {
            Some(crypt) => crypt.encrypt_string(self.reference, data),
            None => Ok(data.to_vec()),
        }
    }

    pub fn decrypt_stream(&self, data: &[u8], is_metadata: bool) -> CosResult<Vec<u8>> {
        match &self.crypt {
            Some(crypt) => crypt.decrypt_stream(self.reference, data, is_metadata),
            None => Ok(data.to_vec()),
        }
    }

    pub fn encrypt_stream(&self, data: &[u8], is_metadata: bool) -> CosResult<Vec<u8>> {
        match &self.crypt {
            Some(crypt) => crypt.encrypt_stream(self.reference, data, is_metadata),
            None => Ok(data.to_vec()),
        }
    }
}

impl fmt::Debug for CryptInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptInfo")
            .field("reference", &self.reference)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}
