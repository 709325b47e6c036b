//! On-disk constants of the V3 attachment container
//!
//! ```text
//! offset  size  field
//!      0     4  tag "PAT3"
//!      4    32  salt (SHA-256 of random bytes)
//!     36     4  key-stretch iterations, u32 LE
//!     40    32  verifier SHA-256(P')
//!     72    32  K wrapped under P' (Twofish-ECB)
//!    104    32  L wrapped under P' (Twofish-ECB)
//!    136    16  CBC IV (first half of SHA-256 of random bytes)
//!    152     …  header fields, END, record fields…
//!  len-48   16  sentinel block "PAT3-EOFPAT3-EOF" (not encrypted)
//!  len-32   32  HMAC-SHA256(L) over every field plaintext
//! ```

use pwat_core::FormatVersion;
use pwat_crypto::{BLOCK_SIZE, HASH_SIZE, KEY_SIZE, SALT_SIZE};

pub const TAG: [u8; 4] = *b"PAT3";

pub const TERMINAL_BLOCK: [u8; BLOCK_SIZE] = *b"PAT3-EOFPAT3-EOF";

pub const HMAC_LEN: usize = HASH_SIZE;

/// Bytes before the first encrypted field
pub const ENVELOPE_LEN: u64 =
    (TAG.len() + SALT_SIZE + 4 + HASH_SIZE + KEY_SIZE + KEY_SIZE + BLOCK_SIZE) as u64;

/// Sentinel block plus HMAC at the end of every container
pub const TRAILER_LEN: u64 = (BLOCK_SIZE + HMAC_LEN) as u64;

/// Data bytes carried by a field's first block after length and type
pub const FIRST_BLOCK_DATA: usize = BLOCK_SIZE - 5;

/// Upper bound for a single decoded field
pub const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

/// Written as the bytes `[0x01, 0x83]`
pub const CURRENT_VERSION: FormatVersion = FormatVersion { major: 0x83, minor: 0x01 };

/// Header field types
pub mod hdr {
    pub const VERSION: u8 = 0x00;
    pub const FILE_UUID: u8 = 0x01;
    pub const DB_UUID: u8 = 0x02;
    pub const LAST_SAVED_TIME: u8 = 0x03;
    pub const LAST_SAVED_USER: u8 = 0x04;
    pub const LAST_SAVED_HOST: u8 = 0x05;
    pub const LAST_SAVED_APP: u8 = 0x06;
    pub const END: u8 = 0xff;
}

/// Attachment record field types, in the order they must appear
pub mod rec {
    pub const UUID: u8 = 0x01;
    pub const ENTRY_UUID: u8 = 0x02;
    pub const FLAGS: u8 = 0x03;
    pub const FILENAME: u8 = 0x04;
    pub const PATH: u8 = 0x05;
    pub const DESCRIPTION: u8 = 0x06;
    pub const UNCSIZE: u8 = 0x07;
    pub const BLKSIZE: u8 = 0x08;
    pub const CTIME: u8 = 0x0a;
    pub const ATIME: u8 = 0x0b;
    pub const MTIME: u8 = 0x0c;
    pub const DTIME: u8 = 0x0d;
    /// Last pre-data type: reading pre-data stops after it
    pub const LAST_PREDATA: u8 = DTIME;
    /// Types below this that are not listed above are reserved pre-data
    pub const FIRST_DATA: u8 = 0x80;

    pub const DATA: u8 = 0x80;
    pub const LASTDATA: u8 = 0x81;

    pub const CMPSIZE: u8 = 0xc0;
    pub const CRC: u8 = 0xc1;
    pub const ODIGEST: u8 = 0xc2;
    pub const CDIGEST: u8 = 0xc3;
    pub const END: u8 = 0xff;

    pub fn is_predata(ftype: u8) -> bool {
        ftype < FIRST_DATA
    }

    pub fn is_data(ftype: u8) -> bool {
        ftype == DATA || ftype == LASTDATA
    }

    pub fn is_postdata(ftype: u8) -> bool {
        ftype >= CMPSIZE
    }
}
