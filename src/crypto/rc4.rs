//! RC4 encryption provider implementation

use rc4::{consts::*, KeyInit, Rc4, StreamCipher};

use super::CryptoProvider;
use crate::error::{CosError, CosResult};

macro_rules! rc4_with_key_size {
    ($key:expr, $data:expr, $($len:literal => $size:ty),+ $(,)?) => {
        match $key.len() {
            $(
                $len => Rc4::<$size>::new_from_slice($key)
                    .map(|mut cipher| cipher.apply_keystream($data))
                    .map_err(|e| CosError::crypto(e.to_string())),
            )+
            len => Err(CosError::InvalidKeyLength(len)),
        }
    };
}

/// Apply the RC4 keystream for `key` (5 to 16 bytes) in place
pub(crate) fn rc4_process(key: &[u8], data: &mut [u8]) -> CosResult<()> {
    rc4_with_key_size!(key, data,
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    )
}

/// RC4 encryption provider
#[derive(Debug)]
pub(crate) struct RC4Provider;

impl CryptoProvider for RC4Provider {
    fn encrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>> {
        let mut out = data.to_vec();
        rc4_process(key, &mut out)?;
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> CosResult<Vec<u8>> {
        // symmetric
        self.encrypt(key, data)
    }
}
