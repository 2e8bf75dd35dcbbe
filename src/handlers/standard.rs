//! Standard (password) security handler, revisions 2 to 6

use std::fmt;

use log::debug;
use rand::{thread_rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{cbc_encrypt, CryptMethod, DocumentCrypt};
use crate::error::{CosError, CosResult};
use crate::pdf::{Dictionary, Value};
use crate::security::{
    authenticate_legacy, authenticate_modern, compute_o_value, compute_u_value, legacy_file_key,
    legacy_password_bytes, modern_hash, modern_password_bytes, LegacyParams, ModernParams, PasswordKind,
};
use crate::{EncryptionAlgorithm, PDFPermissions};

/// Standard security handler for password-based encryption
#[derive(Clone, ZeroizeOnDrop)]
pub struct StandardSecurityHandler {
    #[zeroize(skip)]
    pub(crate) algorithm: EncryptionAlgorithm,
    version: u8,
    revision: u8,
    key_length: usize,
    #[zeroize(skip)]
    permissions: i32,
    o_value: Vec<u8>,
    u_value: Vec<u8>,
    oe_value: Option<Vec<u8>>,
    ue_value: Option<Vec<u8>>,
    perms_value: Option<Vec<u8>>,
    file_id: Vec<u8>,
    encrypt_metadata: bool,
    #[zeroize(skip)]
    string_method: CryptMethod,
    #[zeroize(skip)]
    stream_method: CryptMethod,
}

/// Crypt method and key length named by `/StmF` or `/StrF`
fn crypt_filter(encrypt: &Dictionary, entry: &str) -> CosResult<(CryptMethod, Option<usize>)> {
    let name = encrypt.get_name(entry).unwrap_or("Identity");
    if name == "Identity" {
        return Ok((CryptMethod::Identity, None));
    }
    let filter = encrypt
        .get_dict("CF")
        .and_then(|cf| cf.get_dict(name))
        .ok_or_else(|| CosError::MissingDictionaryEntry(format!("CF/{}", name)))?;
    let cfm = filter.get_name("CFM").unwrap_or("None");
    let method = CryptMethod::from_name(cfm).ok_or_else(|| CosError::UnsupportedFilter(cfm.to_string()))?;
    // crypt filter /Length is in bytes for AES and sometimes bits for RC4
    let length = filter
        .get_integer("Length")
        .map(|len| if len > 32 { len as usize / 8 } else { len as usize });
    Ok((method, length))
}

impl StandardSecurityHandler {
    /// Build encryption entries for a fresh document
    pub fn new(
        algorithm: EncryptionAlgorithm,
        permissions: PDFPermissions,
        user_password: &str,
        owner_password: &str,
        file_id: Vec<u8>,
    ) -> CosResult<Self> {
        let method = algorithm.crypt_method();
        let mut handler = Self {
            algorithm,
            version: algorithm.version(),
            revision: algorithm.revision(),
            key_length: algorithm.key_length(),
            permissions: permissions.to_p(),
            o_value: Vec::new(),
            u_value: Vec::new(),
            oe_value: None,
            ue_value: None,
            perms_value: None,
            file_id,
            encrypt_metadata: true,
            string_method: method,
            stream_method: method,
        };

        if handler.revision >= 5 {
            handler.generate_modern_values(
                &modern_password_bytes(user_password),
                &modern_password_bytes(owner_password),
            )?;
        } else {
            handler.generate_legacy_values(
                &legacy_password_bytes(user_password),
                &legacy_password_bytes(owner_password),
            )?;
        }
        Ok(handler)
    }

    /// Read an `/Encrypt` dictionary whose `/Filter` is `/Standard`
    pub fn from_dict(encrypt: &Dictionary, file_id: &[u8]) -> CosResult<Self> {
        let version = encrypt.get_integer("V").unwrap_or(0) as u8;
        let revision = encrypt
            .get_integer("R")
            .ok_or_else(|| CosError::MissingDictionaryEntry("R".into()))? as u8;
        if !(2..=6).contains(&revision) {
            return Err(CosError::UnsupportedRevision(revision));
        }
        let bytes = |key: &str| -> CosResult<Vec<u8>> {
            encrypt
                .get_bytes(key)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| CosError::MissingDictionaryEntry(key.into()))
        };

        let (string_method, stream_method, cf_length) = if version >= 4 {
            let (string_method, string_len) = crypt_filter(encrypt, "StrF")?;
            let (stream_method, stream_len) = crypt_filter(encrypt, "StmF")?;
            (string_method, stream_method, stream_len.or(string_len))
        } else {
            (CryptMethod::Rc4, CryptMethod::Rc4, None)
        };

        let key_length = match revision {
            2 => 5,
            5 | 6 => 32,
            _ => cf_length
                .or_else(|| encrypt.get_integer("Length").map(|bits| bits as usize / 8))
                .unwrap_or(5)
                .clamp(5, 16),
        };
        let algorithm = match (revision, string_method, stream_method) {
            (2, ..) => EncryptionAlgorithm::RC4_40,
            (5 | 6, ..) => EncryptionAlgorithm::AES_256,
            (_, CryptMethod::AesV2, _) | (_, _, CryptMethod::AesV2) => EncryptionAlgorithm::AES_128,
            _ => EncryptionAlgorithm::RC4_128,
        };

        let handler = Self {
            algorithm,
            version,
            revision,
            key_length,
            permissions: encrypt
                .get_integer("P")
                .ok_or_else(|| CosError::MissingDictionaryEntry("P".into()))? as i32,
            o_value: bytes("O")?,
            u_value: bytes("U")?,
            oe_value: encrypt.get_bytes("OE").map(<[u8]>::to_vec),
            ue_value: encrypt.get_bytes("UE").map(<[u8]>::to_vec),
            perms_value: encrypt.get_bytes("Perms").map(<[u8]>::to_vec),
            file_id: file_id.to_vec(),
            encrypt_metadata: encrypt.get_bool("EncryptMetadata").unwrap_or(true),
            string_method,
            stream_method,
        };
        debug!(
            "Standard security handler V{} R{} ({}), key length {}",
            version, revision, algorithm, key_length
        );
        Ok(handler)
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn permissions(&self) -> PDFPermissions {
        PDFPermissions::from_p(self.permissions)
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.encrypt_metadata
    }

    /// Derive the document crypt context from `password`; `None` when the
    /// password opens neither the user nor the owner entry
    pub fn authenticate(&self, password: &str) -> CosResult<Option<(DocumentCrypt, PasswordKind)>> {
        let unlocked = if self.revision >= 5 {
            let params = ModernParams {
                revision: self.revision,
                o_value: &self.o_value,
                u_value: &self.u_value,
                oe_value: self
                    .oe_value
                    .as_deref()
                    .ok_or_else(|| CosError::MissingDictionaryEntry("OE".into()))?,
                ue_value: self
                    .ue_value
                    .as_deref()
                    .ok_or_else(|| CosError::MissingDictionaryEntry("UE".into()))?,
            };
            authenticate_modern(&modern_password_bytes(password), &params)?
        } else {
            authenticate_legacy(&legacy_password_bytes(password), &self.legacy_params())?
        };

        Ok(unlocked.map(|(key, kind)| {
            debug!("Authenticated with {:?} password", kind);
            let crypt = DocumentCrypt::new(key.to_vec(), self.string_method, self.stream_method)
                .with_encrypt_metadata(self.encrypt_metadata);
            (crypt, kind)
        }))
    }

    fn legacy_params(&self) -> LegacyParams<'_> {
        LegacyParams {
            revision: self.revision,
            key_length: self.key_length,
            o_value: &self.o_value,
            u_value: &self.u_value,
            permissions: self.permissions,
            file_id: &self.file_id,
            encrypt_metadata: self.encrypt_metadata,
        }
    }

    fn generate_legacy_values(&mut self, user_password: &[u8], owner_password: &[u8]) -> CosResult<()> {
        self.o_value = compute_o_value(owner_password, user_password, self.revision, self.key_length)?;
        let key = legacy_file_key(
            user_password,
            self.revision,
            self.key_length,
            &self.o_value,
            self.permissions,
            &self.file_id,
            self.encrypt_metadata,
        );
        self.u_value = compute_u_value(&key, self.revision, &self.file_id)?;
        Ok(())
    }

    fn generate_modern_values(&mut self, user_password: &[u8], owner_password: &[u8]) -> CosResult<()> {
        let mut rng = thread_rng();
        let mut file_key = Zeroizing::new(vec![0u8; 32]);
        rng.fill_bytes(&mut file_key);
        let mut salts = [0u8; 32];
        rng.fill_bytes(&mut salts);
        let (user_salts, owner_salts) = salts.split_at(16);
        let iv = [0u8; 16];

        let mut u_value = modern_hash(self.revision, user_password, &user_salts[..8], &[])?.to_vec();
        u_value.extend_from_slice(user_salts);
        let user_key = modern_hash(self.revision, user_password, &user_salts[8..], &[])?;
        self.ue_value = Some(cbc_encrypt(&user_key, &iv, &file_key, false)?);

        let mut o_value = modern_hash(self.revision, owner_password, &owner_salts[..8], &u_value)?.to_vec();
        o_value.extend_from_slice(owner_salts);
        let owner_key = modern_hash(self.revision, owner_password, &owner_salts[8..], &u_value)?;
        self.oe_value = Some(cbc_encrypt(&owner_key, &iv, &file_key, false)?);

        // single block, so CBC with a zero IV is ECB
        let mut perms = [0u8; 16];
        perms[..4].copy_from_slice(&self.permissions.to_le_bytes());
        perms[4..8].copy_from_slice(&[0xFF; 4]);
        perms[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        perms[9..12].copy_from_slice(b"adb");
        rng.fill_bytes(&mut perms[12..]);
        self.perms_value = Some(cbc_encrypt(&file_key, &iv, &perms, false)?);
        perms.zeroize();
        salts.zeroize();

        self.u_value = u_value;
        self.o_value = o_value;
        Ok(())
    }

    /// `/Encrypt` dictionary describing this handler
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Value::Name("Standard".into()));
        dict.set("V", Value::Number(f64::from(self.version)));
        dict.set("R", Value::Number(f64::from(self.revision)));
        dict.set("Length", Value::Number((self.key_length * 8) as f64));
        if self.version >= 4 {
            let mut std_cf = Dictionary::new();
            std_cf.set("CFM", Value::Name(self.stream_method.name().into()));
            std_cf.set("AuthEvent", Value::Name("DocOpen".into()));
            std_cf.set("Length", Value::Number(self.key_length as f64));
            let mut cf = Dictionary::new();
            cf.set("StdCF", Value::Dictionary(std_cf));
            dict.set("CF", Value::Dictionary(cf));
            dict.set("StmF", Value::Name("StdCF".into()));
            dict.set("StrF", Value::Name("StdCF".into()));
            if !self.encrypt_metadata {
                dict.set("EncryptMetadata", Value::Boolean(false));
            }
        }
        dict.set("O", Value::HexString(self.o_value.clone()));
        dict.set("U", Value::HexString(self.u_value.clone()));
        if let Some(oe) = &self.oe_value {
            dict.set("OE", Value::HexString(oe.clone()));
        }
        if let Some(ue) = &self.ue_value {
            dict.set("UE", Value::HexString(ue.clone()));
        }
        if let Some(perms) = &self.perms_value {
            dict.set("Perms", Value::HexString(perms.clone()));
        }
        dict.set("P", Value::Number(f64::from(self.permissions)));
        dict
    }
}

impl fmt::Debug for StandardSecurityHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardSecurityHandler")
            .field("algorithm", &self.algorithm)
            .field("version", &self.version)
            .field("revision", &self.revision)
            .field("key_length", &self.key_length)
            .field("permissions", &self.permissions)
            .field("encrypt_metadata", &self.encrypt_metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    const ALGORITHMS: [EncryptionAlgorithm; 4] = [
        EncryptionAlgorithm::RC4_40,
        EncryptionAlgorithm::RC4_128,
        EncryptionAlgorithm::AES_128,
        EncryptionAlgorithm::AES_256,
    ];

    #[test]
    fn test_user_and_owner_passwords_for_every_algorithm() {
        for algorithm in ALGORITHMS {
            let handler = StandardSecurityHandler::new(
                algorithm,
                PDFPermissions::new(PDFPermissions::PRINT),
                "user",
                "owner",
                b"0123456789abcdef".to_vec(),
            )
            .unwrap();

            let (user_crypt, kind) = handler.authenticate("user").unwrap().unwrap();
            assert_eq!(kind, PasswordKind::User);
            let (owner_crypt, kind) = handler.authenticate("owner").unwrap().unwrap();
            assert_eq!(kind, PasswordKind::Owner);
            assert_eq!(user_crypt.file_key(), owner_crypt.file_key());
            assert_eq!(user_crypt.file_key().len(), algorithm.key_length());
            assert!(handler.authenticate("nope").unwrap().is_none());
        }
    }

    #[test]
    fn test_dictionary_round_trip() {
        for algorithm in ALGORITHMS {
            let handler = StandardSecurityHandler::new(
                algorithm,
                PDFPermissions::new(PDFPermissions::PRINT | PDFPermissions::COPY),
                "",
                "owner",
                b"id".to_vec(),
            )
            .unwrap();
            let reread = StandardSecurityHandler::from_dict(&handler.to_dict(), b"id").unwrap();
            assert_eq!(reread.algorithm(), algorithm);
            assert_eq!(reread.revision(), handler.revision());
            assert!(reread.permissions().has_permission(PDFPermissions::COPY));
            assert!(!reread.permissions().has_permission(PDFPermissions::MODIFY));

            let (crypt, _) = reread.authenticate("").unwrap().unwrap();
            assert_eq!(crypt.stream_method(), algorithm.crypt_method());
        }
    }

    #[test]
    fn test_identity_stream_filter() {
        let handler = StandardSecurityHandler::new(
            EncryptionAlgorithm::AES_128,
            PDFPermissions::new(PDFPermissions::ALL),
            "",
            "",
            b"id".to_vec(),
        )
        .unwrap();
        let mut dict = handler.to_dict();
        dict.set("StmF", Value::Name("Identity".into()));
        let reread = StandardSecurityHandler::from_dict(&dict, b"id").unwrap();
        let (crypt, _) = reread.authenticate("").unwrap().unwrap();
        assert_eq!(crypt.stream_method(), CryptMethod::Identity);
        assert_eq!(crypt.string_method(), CryptMethod::AesV2);
    }

    #[test]
    fn test_missing_and_unsupported_entries() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Value::Name("Standard".into()));
        dict.set("V", Value::Number(1.0));
        assert!(matches!(
            StandardSecurityHandler::from_dict(&dict, b""),
            Err(CosError::MissingDictionaryEntry(_))
        ));
        dict.set("R", Value::Number(7.0));
        assert!(matches!(
            StandardSecurityHandler::from_dict(&dict, b""),
            Err(CosError::UnsupportedRevision(7))
        ));
    }
}
