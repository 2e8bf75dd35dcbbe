//! Lazy COS object engine for PDF documents
//!
//! Raw bytes are tokenized on demand by a [`parser::DataParser`], objects are
//! located through the cross-reference table and materialized by id, string
//! and stream content is decrypted through the document's security handler,
//! and the [`DocumentEngine`] writes changes back either as an incremental
//! update or as a full rewrite.

use std::fmt;

mod error;
pub mod parser;
pub mod pdf;
pub mod crypto;
pub mod handlers;
pub mod security;
pub mod document;

pub use error::{CosError, CosResult};
pub use crypto::{CryptInfo, CryptMethod, DocumentCrypt};
pub use document::{
    AnnotationDto, DocumentEngine, DocumentState, EngineOptions, ObjectKey, PasswordProvider, RenderBackend,
    SaveMode, SaveReport, StripPolicy,
};
pub use handlers::{SecurityHandler, StandardSecurityHandler};
pub use parser::{get_data_parser, DataParser, ParserStrategy};
pub use pdf::{PdfObject, Reference};
pub use security::PasswordKind;

/// Supported encryption algorithms for PDF encryption
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// RC4 encryption with 40-bit key (PDF 1.3)
    RC4_40,
    /// RC4 encryption with 128-bit key (PDF 1.4)
    RC4_128,
    /// AES encryption with 128-bit key (PDF 1.6)
    AES_128,
    /// AES encryption with 256-bit key (PDF 1.7+/2.0)
    AES_256,
}

impl EncryptionAlgorithm {
    /// `/V` written for this algorithm
    pub fn version(&self) -> u8 {
        match self {
            EncryptionAlgorithm::RC4_40 => 1,
            EncryptionAlgorithm::RC4_128 => 2,
            EncryptionAlgorithm::AES_128 => 4,
            EncryptionAlgorithm::AES_256 => 5,
        }
    }

    /// `/R` written for this algorithm
    pub fn revision(&self) -> u8 {
        match self {
            EncryptionAlgorithm::RC4_40 => 2,
            EncryptionAlgorithm::RC4_128 => 3,
            EncryptionAlgorithm::AES_128 => 4,
            EncryptionAlgorithm::AES_256 => 6,
        }
    }

    /// File key length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            EncryptionAlgorithm::RC4_40 => 5,
            EncryptionAlgorithm::RC4_128 | EncryptionAlgorithm::AES_128 => 16,
            EncryptionAlgorithm::AES_256 => 32,
        }
    }

    pub fn crypt_method(&self) -> CryptMethod {
        match self {
            EncryptionAlgorithm::RC4_40 | EncryptionAlgorithm::RC4_128 => CryptMethod::Rc4,
            EncryptionAlgorithm::AES_128 => CryptMethod::AesV2,
            EncryptionAlgorithm::AES_256 => CryptMethod::AesV3,
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::RC4_40 => write!(f, "RC4-40"),
            EncryptionAlgorithm::RC4_128 => write!(f, "RC4-128"),
            EncryptionAlgorithm::AES_128 => write!(f, "AES-128"),
            EncryptionAlgorithm::AES_256 => write!(f, "AES-256"),
        }
    }
}

/// PDF permissions flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PDFPermissions(u32);

impl PDFPermissions {
    /// No permissions
    pub const NONE: u32 = 0;
    /// Print the document
    pub const PRINT: u32 = 1 << 2;
    /// Modify the document
    pub const MODIFY: u32 = 1 << 3;
    /// Copy text and graphics
    pub const COPY: u32 = 1 << 4;
    /// Add or modify annotations
    pub const ANNOTATE: u32 = 1 << 5;
    /// Fill form fields
    pub const FILL_FORMS: u32 = 1 << 8;
    /// Extract text and graphics for accessibility
    pub const EXTRACT: u32 = 1 << 9;
    /// Assemble the document
    pub const ASSEMBLE: u32 = 1 << 10;
    /// Print in high quality
    pub const PRINT_HIGH: u32 = 1 << 11;
    /// All permissions
    pub const ALL: u32 = 0xF_FFFF;

    /// Bits that must be set in a written `/P`
    const RESERVED: u32 = 0xFFFF_F0C0;

    /// Create new permissions from raw bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Permissions from a signed `/P` entry
    pub fn from_p(p: i32) -> Self {
        Self::new(p as u32)
    }

    /// Signed `/P` value with the reserved bits set
    pub fn to_p(&self) -> i32 {
        (self.0 | Self::RESERVED) as i32
    }

    /// Get raw permission bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if specific permission is granted
    pub fn has_permission(&self, permission: u32) -> bool {
        (self.0 & permission) == permission
    }
}

/// Information about PDF encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// The encryption algorithm used
    pub algorithm: EncryptionAlgorithm,
    /// Permissions granted to user-password holders
    pub permissions: PDFPermissions,
    /// Password that opened the document, once authenticated
    pub unlocked_with: Option<PasswordKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_permissions() {
        let perms = PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::COPY);
        assert!(perms.has_permission(PDFPermissions::PRINT));
        assert!(perms.has_permission(PDFPermissions::COPY));
        assert!(!perms.has_permission(PDFPermissions::MODIFY));
    }

    #[test]
    fn test_p_value_round_trip() {
        let perms = PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::ANNOTATE);
        let p = perms.to_p();
        assert!(p < 0);
        let back = PDFPermissions::from_p(p);
        assert!(back.has_permission(PDFPermissions::PRINT | PDFPermissions::ANNOTATE));
        assert!(!back.has_permission(PDFPermissions::COPY));
        assert_eq!(PDFPermissions::from_p(-4).bits() & PDFPermissions::MODIFY, PDFPermissions::MODIFY);
    }

    #[test]
    fn test_algorithm_parameters() {
        assert_eq!(EncryptionAlgorithm::AES_256.to_string(), "AES-256");
        assert_eq!(EncryptionAlgorithm::RC4_40.key_length(), 5);
        assert_eq!(EncryptionAlgorithm::AES_128.crypt_method(), CryptMethod::AesV2);
        assert_eq!(EncryptionAlgorithm::AES_256.revision(), 6);
    }
}
