//! Key stretching: passphrase + salt → 256-bit stretched key via iterated SHA-256

use pwat_core::{PwatError, PwatResult, MIN_HASH_ITERATIONS};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{BLOCK_SIZE, HASH_SIZE, KEY_SIZE, SALT_SIZE};

/// The stretched passphrase key. It wraps the data and HMAC keys and its
/// hash is stored as the passphrase verifier.
///
/// Zeroized on drop.
pub struct StretchedKey {
    bytes: [u8; KEY_SIZE],
}

impl StretchedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// `SHA256(stretched)`, written to the envelope so a passphrase can be
    /// checked without touching the encrypted stream.
    pub fn verifier(&self) -> [u8; HASH_SIZE] {
        Sha256::digest(self.bytes).into()
    }

    pub fn matches_verifier(&self, stored: &[u8; HASH_SIZE]) -> bool {
        // fixed-length compare over the whole digest
        self.verifier()
            .iter()
            .zip(stored.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Drop for StretchedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for StretchedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StretchedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Stretch `passphrase` with `salt`.
///
/// `X = SHA256(passphrase ‖ salt)`, then `X = SHA256(X)` repeated
/// `iterations` times. The passphrase is hashed as UTF-8.
pub fn stretch_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    iterations: u32,
) -> PwatResult<StretchedKey> {
    if iterations < MIN_HASH_ITERATIONS {
        return Err(PwatError::ContainerFormat(format!(
            "key stretch iterations {iterations} below minimum {MIN_HASH_ITERATIONS}"
        )));
    }
    tracing::debug!(iterations, "stretching passphrase");

    let mut hasher = Sha256::new();
    hasher.update(passphrase.expose_secret().as_bytes());
    hasher.update(salt);
    let mut x: [u8; KEY_SIZE] = hasher.finalize().into();

    for _ in 0..iterations {
        let next: [u8; KEY_SIZE] = Sha256::digest(x).into();
        x.zeroize();
        x = next;
    }

    Ok(StretchedKey::from_bytes(x))
}

/// A fresh salt. The random bytes are hashed before use so raw RNG output
/// never reaches the file.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    hashed_random()
}

/// A fresh CBC initial vector: the first block of a hashed random value.
pub fn generate_iv() -> [u8; BLOCK_SIZE] {
    let mut digest = hashed_random();
    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&digest[..BLOCK_SIZE]);
    digest.zeroize();
    iv
}

fn hashed_random() -> [u8; HASH_SIZE] {
    let mut raw = [0u8; HASH_SIZE];
    rand::thread_rng().fill_bytes(&mut raw);
    let digest: [u8; HASH_SIZE] = Sha256::digest(raw).into();
    raw.zeroize();
    digest
}
