//! Password padding, key derivation and password verification for the
//! standard security handler

mod authentication;
mod key_derivation;

pub use authentication::PasswordKind;
pub(crate) use authentication::{authenticate_legacy, authenticate_modern, LegacyParams, ModernParams};
pub(crate) use key_derivation::{compute_o_value, compute_u_value, legacy_file_key, modern_hash};

/// Padding string appended to passwords for revisions 2 to 4
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41,
    0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80,
    0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Longest password accepted by the AES-256 revisions, in bytes
pub const MAX_MODERN_PASSWORD: usize = 127;

/// Truncate or pad `password` to exactly 32 bytes
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Password bytes for revisions 2 to 4: Latin-1 where possible
pub fn legacy_password_bytes(password: &str) -> Vec<u8> {
    if password.chars().all(|c| (c as u32) <= 0xFF) {
        password.chars().map(|c| c as u8).collect()
    } else {
        password.as_bytes().to_vec()
    }
}

/// Password bytes for revisions 5 and 6: UTF-8 cut at 127 bytes
pub fn modern_password_bytes(password: &str) -> Vec<u8> {
    let bytes = password.as_bytes();
    bytes[..bytes.len().min(MAX_MODERN_PASSWORD)].to_vec()
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
