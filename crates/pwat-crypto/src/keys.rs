//! Session keys: data key K, HMAC key L, and their Twofish wrapping under the stretched key

use pwat_core::{PwatError, PwatResult};
use rand::RngCore;
use twofish::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;
use zeroize::Zeroize;

use crate::kdf::StretchedKey;
use crate::{BLOCK_SIZE, KEY_SIZE};

/// The 256-bit key for chained field encryption. Zeroized on drop.
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The 256-bit HMAC-SHA256 key authenticating the field stream. Zeroized on drop.
pub struct HmacKey {
    bytes: [u8; KEY_SIZE],
}

impl HmacKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for HmacKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

pub fn generate_data_key() -> DataKey {
    DataKey::from_bytes(random_key())
}

pub fn generate_hmac_key() -> HmacKey {
    HmacKey::from_bytes(random_key())
}

fn random_key() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Build a Twofish instance from 256-bit key material.
pub(crate) fn twofish(key: &[u8; KEY_SIZE]) -> PwatResult<Twofish> {
    Twofish::new_from_slice(key)
        .map_err(|_| PwatError::ContainerFormat("invalid Twofish key length".into()))
}

/// Wrap a 256-bit key as two Twofish-ECB blocks under the stretched key.
pub fn wrap_key(stretched: &StretchedKey, plain: &[u8; KEY_SIZE]) -> PwatResult<[u8; KEY_SIZE]> {
    let cipher = twofish(stretched.as_bytes())?;
    let mut out = *plain;
    for block in out.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

fn unwrap_raw(stretched: &StretchedKey, wrapped: &[u8; KEY_SIZE]) -> PwatResult<[u8; KEY_SIZE]> {
    let cipher = twofish(stretched.as_bytes())?;
    let mut out = *wrapped;
    for block in out.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

pub fn wrap_data_key(stretched: &StretchedKey, key: &DataKey) -> PwatResult<[u8; KEY_SIZE]> {
    wrap_key(stretched, key.as_bytes())
}

pub fn wrap_hmac_key(stretched: &StretchedKey, key: &HmacKey) -> PwatResult<[u8; KEY_SIZE]> {
    wrap_key(stretched, key.as_bytes())
}

/// Recover K. There is no authentication here: a wrong stretched key yields
/// a wrong K, which is why the verifier is checked first.
pub fn unwrap_data_key(stretched: &StretchedKey, wrapped: &[u8; KEY_SIZE]) -> PwatResult<DataKey> {
    unwrap_raw(stretched, wrapped).map(DataKey::from_bytes)
}

pub fn unwrap_hmac_key(stretched: &StretchedKey, wrapped: &[u8; KEY_SIZE]) -> PwatResult<HmacKey> {
    unwrap_raw(stretched, wrapped).map(HmacKey::from_bytes)
}
