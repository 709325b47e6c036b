//! pwat-crypto: the cryptographic envelope of an attachment container
//!
//! Key hierarchy:
//! ```text
//! passphrase + salt ──SHA-256 × N──▶ stretched key P'
//!   ├── verifier: SHA-256(P'), stored in clear
//!   ├── K (random, 256-bit) wrapped as Twofish-ECB(P', K)
//!   │   └── field stream: Twofish-CBC(K, IV), register carried across fields
//!   └── L (random, 256-bit) wrapped as Twofish-ECB(P', L)
//!       └── HMAC-SHA256(L) over every field plaintext
//! ```

pub mod cbc;
pub mod kdf;
pub mod keys;

pub use cbc::CbcChain;
pub use kdf::{generate_iv, generate_salt, stretch_key, StretchedKey};
pub use keys::{
    generate_data_key, generate_hmac_key, unwrap_data_key, unwrap_hmac_key, wrap_data_key,
    wrap_hmac_key, wrap_key, DataKey, HmacKey,
};

/// Size of every key in the hierarchy (256-bit)
pub const KEY_SIZE: usize = 32;

/// Twofish block size
pub const BLOCK_SIZE: usize = 16;

/// Size of the envelope salt
pub const SALT_SIZE: usize = 32;

/// SHA-256 output size (verifier, HMAC tag)
pub const HASH_SIZE: usize = 32;
