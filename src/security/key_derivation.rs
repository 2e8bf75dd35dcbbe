use md5::Context;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use super::pad_password;
use crate::crypto::{cbc_encrypt, rc4_process};
use crate::error::CosResult;

fn md5(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// File key for revisions 2 to 4 (MD5 over padded password, O, P and ID)
pub(crate) fn legacy_file_key(
    password: &[u8],
    revision: u8,
    key_length: usize,
    o_value: &[u8],
    permissions: i32,
    file_id: &[u8],
    encrypt_metadata: bool,
) -> Zeroizing<Vec<u8>> {
    let mut context = Context::new();
    context.consume(pad_password(password));
    context.consume(o_value);
    context.consume(permissions.to_le_bytes());
    context.consume(file_id);
    if revision >= 4 && !encrypt_metadata {
        context.consume([0xFFu8; 4]);
    }
    let mut key = Zeroizing::new(context.finalize().0);

    let n = if revision == 2 { 5 } else { key_length.clamp(5, 16) };
    if revision >= 3 {
        for _ in 0..50 {
            *key = md5(&key[..n]);
        }
    }
    Zeroizing::new(key[..n].to_vec())
}

/// RC4 key that encrypts the user password into `/O`
pub(crate) fn owner_rc4_key(owner_password: &[u8], revision: u8, key_length: usize) -> Zeroizing<Vec<u8>> {
    let mut hash = Zeroizing::new(md5(&pad_password(owner_password)));
    if revision >= 3 {
        for _ in 0..50 {
            *hash = md5(&hash[..]);
        }
    }
    let n = if revision == 2 { 5 } else { key_length.clamp(5, 16) };
    Zeroizing::new(hash[..n].to_vec())
}

/// Apply the 20-round RC4 sequence of revisions 3 and 4 (or one pass for 2)
pub(crate) fn rc4_rounds(key: &[u8], data: &mut [u8], revision: u8, reverse: bool) -> CosResult<()> {
    if revision == 2 {
        return rc4_process(key, data);
    }
    let mut round_key = Zeroizing::new(vec![0u8; key.len()]);
    let rounds: Box<dyn Iterator<Item = u8>> = if reverse { Box::new((0..20).rev()) } else { Box::new(0..20) };
    for i in rounds {
        for (dst, src) in round_key.iter_mut().zip(key) {
            *dst = src ^ i;
        }
        rc4_process(&round_key, data)?;
    }
    Ok(())
}

/// `/O` for revisions 2 to 4; an empty owner password falls back to the user password
pub(crate) fn compute_o_value(
    owner_password: &[u8],
    user_password: &[u8],
    revision: u8,
    key_length: usize,
) -> CosResult<Vec<u8>> {
    let owner = if owner_password.is_empty() { user_password } else { owner_password };
    let key = owner_rc4_key(owner, revision, key_length);
    let mut value = pad_password(user_password).to_vec();
    rc4_rounds(&key, &mut value, revision, false)?;
    Ok(value)
}

/// `/U` for revisions 2 to 4 given the file key
pub(crate) fn compute_u_value(file_key: &[u8], revision: u8, file_id: &[u8]) -> CosResult<Vec<u8>> {
    if revision == 2 {
        let mut value = super::PASSWORD_PADDING.to_vec();
        rc4_process(file_key, &mut value)?;
        return Ok(value);
    }
    let mut context = Context::new();
    context.consume(super::PASSWORD_PADDING);
    context.consume(file_id);
    let mut value = context.finalize().0.to_vec();
    rc4_rounds(file_key, &mut value, revision, false)?;
    value.resize(32, 0);
    Ok(value)
}

/// Password hash of revisions 5 (single SHA-256) and 6 (iterated
/// SHA-256/384/512 over AES-128 rounds)
pub(crate) fn modern_hash(revision: u8, password: &[u8], salt: &[u8], user_data: &[u8]) -> CosResult<Zeroizing<Vec<u8>>> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(user_data);
    let mut k = Zeroizing::new(hasher.finalize().to_vec());
    if revision < 6 {
        return Ok(k);
    }

    let mut round: u32 = 0;
    let mut last: u8 = 0;
    while round < 64 || u32::from(last) > round - 32 {
        let mut block = Zeroizing::new(Vec::with_capacity(password.len() + k.len() + user_data.len()));
        block.extend_from_slice(password);
        block.extend_from_slice(&k);
        block.extend_from_slice(user_data);
        let k1 = Zeroizing::new(block.repeat(64));

        let e = Zeroizing::new(cbc_encrypt(&k[..16], &k[16..32], &k1, false)?);
        let selector = e[..16].iter().map(|&b| u32::from(b)).sum::<u32>() % 3;
        *k = match selector {
            0 => Sha256::digest(&e[..]).to_vec(),
            1 => Sha384::digest(&e[..]).to_vec(),
            _ => Sha512::digest(&e[..]).to_vec(),
        };
        last = e[e.len() - 1];
        round += 1;
    }
    k.truncate(32);
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_legacy_key_lengths() {
        let o = [0u8; 32];
        assert_eq!(legacy_file_key(b"", 2, 16, &o, -4, b"id", true).len(), 5);
        assert_eq!(legacy_file_key(b"", 3, 16, &o, -4, b"id", true).len(), 16);
        assert_eq!(legacy_file_key(b"", 3, 7, &o, -4, b"id", true).len(), 7);
    }

    #[test]
    fn test_metadata_flag_changes_r4_key() {
        let o = [1u8; 32];
        let with = legacy_file_key(b"pw", 4, 16, &o, -4, b"id", true);
        let without = legacy_file_key(b"pw", 4, 16, &o, -4, b"id", false);
        assert_ne!(&with[..], &without[..]);
    }

    #[test]
    fn test_rc4_rounds_invert() {
        let key = [7u8; 16];
        let mut data = b"0123456789abcdef".to_vec();
        rc4_rounds(&key, &mut data, 3, false).unwrap();
        assert_ne!(&data[..], b"0123456789abcdef");
        rc4_rounds(&key, &mut data, 3, true).unwrap();
        assert_eq!(&data[..], b"0123456789abcdef");
    }

    #[test]
    fn test_u_value_shapes() {
        let key = [3u8; 16];
        assert_eq!(compute_u_value(&key[..5], 2, b"id").unwrap().len(), 32);
        let u = compute_u_value(&key, 3, b"id").unwrap();
        assert_eq!(u.len(), 32);
        assert!(u[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_modern_hash_is_deterministic() {
        let salt = [5u8; 8];
        let r5 = modern_hash(5, b"secret", &salt, &[]).unwrap();
        let r6 = modern_hash(6, b"secret", &salt, &[]).unwrap();
        assert_eq!(r5.len(), 32);
        assert_eq!(r6.len(), 32);
        assert_ne!(&r5[..], &r6[..]);
        assert_eq!(&r6[..], &modern_hash(6, b"secret", &salt, &[]).unwrap()[..]);
        assert_ne!(&r6[..], &modern_hash(6, b"secret", &salt, &[0u8; 48]).unwrap()[..]);
    }
}
