//! AES-CBC encryption provider implementation

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use log::warn;
use rand::{thread_rng, RngCore};

use super::CryptoProvider;
use crate::error::{CosError, CosResult};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK: usize = 16;

/// CBC-encrypt `data` with a 16 or 32 byte key; `padded` applies PKCS#7
pub(crate) fn cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8], padded: bool) -> CosResult<Vec<u8>> {
    if !padded && data.len() % BLOCK != 0 {
        return Err(CosError::invalid_length("AES-CBC encryption"));
    }
    let pad_len = if padded { BLOCK - data.len() % BLOCK } else { 0 };
    let mut buf = vec![0u8; data.len() + pad_len];
    buf[..data.len()].copy_from_slice(data);

    let len = match (key.len(), padded) {
        (16, true) => Aes128CbcEnc::new_from_slices(key, iv)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
            .map(|c| c.len()),
        (16, false) => Aes128CbcEnc::new_from_slices(key, iv)?
            .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
            .map(|c| c.len()),
        (32, true) => Aes256CbcEnc::new_from_slices(key, iv)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
            .map(|c| c.len()),
        (32, false) => Aes256CbcEnc::new_from_slices(key, iv)?
            .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
            .map(|c| c.len()),
        (len, _) => return Err(CosError::InvalidKeyLength(len)),
    }
    .map_err(|_| CosError::crypto("AES padding failed"))?;

    buf.truncate(len);
    Ok(buf)
}

/// CBC-decrypt `data`; `padded` strips PKCS#7 padding
pub(crate) fn cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8], padded: bool) -> CosResult<Vec<u8>> {
    if data.len() % BLOCK != 0 {
        return Err(CosError::invalid_length("AES-CBC decryption"));
    }
    let mut buf = data.to_vec();

    let len = match (key.len(), padded) {
        (16, true) => Aes128CbcDec::new_from_slices(key, iv)?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map(|p| p.len()),
        (16, false) => Aes128CbcDec::new_from_slices(key, iv)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map(|p| p.len()),
        (32, true) => Aes256CbcDec::new_from_slices(key, iv)?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map(|p| p.len()),
        (32, false) => Aes256CbcDec::new_from_slices(key, iv)?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map(|p| p.len()),
        (len, _) => return Err(CosError::InvalidKeyLength(len)),
    }
    .map_err(|_| CosError::crypto("invalid AES padding"))?;

    buf.truncate(len);
    Ok(buf)
}

/// AES-CBC provider; ciphertext carries a 16 byte IV prefix
#[derive(Debug)]
pub(crate) struct AESProvider;

impl CryptoProvider for AESProvider {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>> {
        let mut iv = [0u8; BLOCK];
        thread_rng().fill_bytes(&mut iv);

        let mut out = iv.to_vec();
        out.extend_from_slice(&cbc_encrypt(key, &iv, data, true)?);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if data.len() < BLOCK {
            return Err(CosError::invalid_length("AES"));
        }

        let (iv, ciphertext) = data.split_at(BLOCK);
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }
        match cbc_decrypt(key, iv, ciphertext, true) {
            Ok(plain) => Ok(plain),
            Err(CosError::CryptoError(_)) => {
                warn!("Bad AES padding, keeping unpadded plaintext");
                cbc_decrypt(key, iv, ciphertext, false)
            }
            Err(e) => Err(e),
        }
    }
}
