//! Document key material and per-object key derivation

use std::fmt;

use log::trace;
use zeroize::Zeroizing;

use super::aes::AESProvider;
use super::rc4::RC4Provider;
use super::CryptoProvider;
use crate::error::CosResult;
use crate::pdf::Reference;

/// Cipher applied by a crypt filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// No encryption
    Identity,
    /// RC4 with a per-object key (`V2`)
    Rc4,
    /// AES-128-CBC with a per-object key (`AESV2`)
    AesV2,
    /// AES-256-CBC with the file key (`AESV3`)
    AesV3,
}

impl CryptMethod {
    /// Map a `/CFM` name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "None" | "Identity" => Some(Self::Identity),
            "V2" => Some(Self::Rc4),
            "AESV2" => Some(Self::AesV2),
            "AESV3" => Some(Self::AesV3),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "None",
            Self::Rc4 => "V2",
            Self::AesV2 => "AESV2",
            Self::AesV3 => "AESV3",
        }
    }

    fn provider(&self) -> Option<&'static dyn CryptoProvider> {
        match self {
            Self::Identity => None,
            Self::Rc4 => Some(&RC4Provider),
            Self::AesV2 | Self::AesV3 => Some(&AESProvider),
        }
    }
}

/// File encryption key plus the crypt methods for strings and streams
pub struct DocumentCrypt {
    file_key: Zeroizing<Vec<u8>>,
    string_method: CryptMethod,
    stream_method: CryptMethod,
    encrypt_metadata: bool,
}

impl DocumentCrypt {
    pub fn new(file_key: Vec<u8>, string_method: CryptMethod, stream_method: CryptMethod) -> Self {
        Self {
            file_key: Zeroizing::new(file_key),
            string_method,
            stream_method,
            encrypt_metadata: true,
        }
    }

    pub fn with_encrypt_metadata(mut self, encrypt_metadata: bool) -> Self {
        self.encrypt_metadata = encrypt_metadata;
        self
    }

    pub fn string_method(&self) -> CryptMethod {
        self.string_method
    }

    pub fn stream_method(&self) -> CryptMethod {
        self.stream_method
    }

    pub fn file_key(&self) -> &[u8] {
        &self.file_key
    }

    /// Derive the key for one object
    pub fn object_key(&self, method: CryptMethod, reference: Reference) -> Zeroizing<Vec<u8>> {
        match method {
            CryptMethod::Identity => Zeroizing::new(Vec::new()),
            CryptMethod::AesV3 => self.file_key.clone(),
            CryptMethod::Rc4 | CryptMethod::AesV2 => {
                let mut context = md5::Context::new();
                context.consume(self.file_key.as_slice());
                context.consume(&reference.id.to_le_bytes()[..3]);
                context.consume(reference.generation.to_le_bytes());
                if method == CryptMethod::AesV2 {
                    context.consume(b"sAlT");
                }
                let digest = context.finalize();
                let len = (self.file_key.len() + 5).min(16);
                Zeroizing::new(digest.0[..len].to_vec())
            }
        }
    }

    fn process(&self, method: CryptMethod, reference: Reference, data: &[u8], encrypt: bool) -> CosResult<Vec<u8>> {
        let Some(provider) = method.provider() else {
            return Ok(data.to_vec());
        };
        trace!(
            "{} {} bytes of {} with {}",
            if encrypt { "Encrypting" } else { "Decrypting" },
            data.len(),
            reference,
            method.name()
        );
        let key = self.object_key(method, reference);
        if encrypt {
            provider.encrypt(&key, data)
        } else {
            provider.decrypt(&key, data)
        }
    }

    fn stream_method_for(&self, is_metadata: bool) -> CryptMethod {
        if is_metadata && !self.encrypt_metadata {
            CryptMethod::Identity
        } else {
            self.stream_method
        }
    }

    pub fn decrypt_string(&self, reference: Reference, data: &[u8]) -> CosResult<Vec<u8>> {
        self.process(self.string_method, reference, data, false)
    }

    pub fn encrypt_string(&self, reference: Reference, data: &[u8]) -> CosResult<Vec<u8>> {
        self.process(self.string_method, reference, data, true)
    }

    pub fn decrypt_stream(&self, reference: Reference, data: &[u8], is_metadata: bool) -> CosResult<Vec<u8>> {
        self.process(self.stream_method_for(is_metadata), reference, data, false)
    }

    pub fn encrypt_stream(&self, reference: Reference, data: &[u8], is_metadata: bool) -> CosResult<Vec<u8>> {
        self.process(self.stream_method_for(is_metadata), reference, data, true)
    }
}

impl fmt::Debug for DocumentCrypt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCrypt")
            .field("key_len", &self.file_key.len())
            .field("string_method", &self.string_method)
            .field("stream_method", &self.stream_method)
            .finish()
    }
}
