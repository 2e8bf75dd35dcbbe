use log::trace;
use zeroize::Zeroizing;

use super::key_derivation::{compute_u_value, legacy_file_key, modern_hash, owner_rc4_key, rc4_rounds};
use super::constant_time_eq;
use crate::crypto::cbc_decrypt;
use crate::error::{CosError, CosResult};

/// Which password unlocked the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    User,
    Owner,
}

/// Encryption dictionary values used by revisions 2 to 4
#[derive(Debug, Clone)]
pub(crate) struct LegacyParams<'a> {
    pub revision: u8,
    pub key_length: usize,
    pub o_value: &'a [u8],
    pub u_value: &'a [u8],
    pub permissions: i32,
    pub file_id: &'a [u8],
    pub encrypt_metadata: bool,
}

/// Encryption dictionary values used by revisions 5 and 6
#[derive(Debug, Clone)]
pub(crate) struct ModernParams<'a> {
    pub revision: u8,
    pub o_value: &'a [u8],
    pub u_value: &'a [u8],
    pub oe_value: &'a [u8],
    pub ue_value: &'a [u8],
}

fn check_user_legacy(password: &[u8], params: &LegacyParams<'_>) -> CosResult<Option<Zeroizing<Vec<u8>>>> {
    let key = legacy_file_key(
        password,
        params.revision,
        params.key_length,
        params.o_value,
        params.permissions,
        params.file_id,
        params.encrypt_metadata,
    );
    let expected = compute_u_value(&key, params.revision, params.file_id)?;
    let compared = if params.revision == 2 { 32 } else { 16 };
    if params.u_value.len() < compared {
        return Err(CosError::invalid_length("/U entry"));
    }
    Ok(constant_time_eq(&expected[..compared], &params.u_value[..compared]).then_some(key))
}

/// Try `password` as user password, then as owner password
pub(crate) fn authenticate_legacy(
    password: &[u8],
    params: &LegacyParams<'_>,
) -> CosResult<Option<(Zeroizing<Vec<u8>>, PasswordKind)>> {
    if let Some(key) = check_user_legacy(password, params)? {
        trace!("Legacy user password accepted");
        return Ok(Some((key, PasswordKind::User)));
    }

    // the owner password decrypts /O back into the padded user password
    let rc4_key = owner_rc4_key(password, params.revision, params.key_length);
    let mut user_password = Zeroizing::new(params.o_value.get(..32).ok_or_else(|| CosError::invalid_length("/O entry"))?.to_vec());
    rc4_rounds(&rc4_key, &mut user_password, params.revision, true)?;
    if let Some(key) = check_user_legacy(&user_password, params)? {
        trace!("Legacy owner password accepted");
        return Ok(Some((key, PasswordKind::Owner)));
    }
    Ok(None)
}

fn unwrap_file_key(revision: u8, password: &[u8], key_salt: &[u8], user_data: &[u8], wrapped: &[u8]) -> CosResult<Zeroizing<Vec<u8>>> {
    let intermediate = modern_hash(revision, password, key_salt, user_data)?;
    let key = cbc_decrypt(&intermediate, &[0u8; 16], wrapped, false)?;
    Ok(Zeroizing::new(key))
}

/// Owner first, then user, as the owner hash also covers `/U`
pub(crate) fn authenticate_modern(
    password: &[u8],
    params: &ModernParams<'_>,
) -> CosResult<Option<(Zeroizing<Vec<u8>>, PasswordKind)>> {
    if params.o_value.len() < 48 || params.u_value.len() < 48 {
        return Err(CosError::invalid_length("/O or /U entry"));
    }
    if params.oe_value.len() != 32 || params.ue_value.len() != 32 {
        return Err(CosError::invalid_length("/OE or /UE entry"));
    }
    let user_data = &params.u_value[..48];

    let owner_hash = modern_hash(params.revision, password, &params.o_value[32..40], user_data)?;
    if constant_time_eq(&owner_hash, &params.o_value[..32]) {
        trace!("Owner password accepted");
        let key = unwrap_file_key(params.revision, password, &params.o_value[40..48], user_data, params.oe_value)?;
        return Ok(Some((key, PasswordKind::Owner)));
    }

    let user_hash = modern_hash(params.revision, password, &params.u_value[32..40], &[])?;
    if constant_time_eq(&user_hash, &params.u_value[..32]) {
        trace!("User password accepted");
        let key = unwrap_file_key(params.revision, password, &params.u_value[40..48], &[], params.ue_value)?;
        return Ok(Some((key, PasswordKind::User)));
    }
    Ok(None)
}
