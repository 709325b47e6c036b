//! Chunk sizing for attachment payloads

/// Smallest chunk; files at or under this size are deflated in one call
pub const MIN_BLOCK_SIZE: u32 = 32 * 1024;

/// Largest chunk
pub const MAX_BLOCK_SIZE: u32 = 256 * 1024;

/// Chunk sizes are multiples of this
pub const BLOCK_ALIGN: u32 = 4 * 1024;

/// Plaintext bytes per chunk for a file of `file_size` bytes.
///
/// `clamp(file_size / 50, 32 KiB, 256 KiB)` rounded down to 4 KiB. Files that
/// fit in a single minimum-size chunk use their own size.
pub fn block_size_for(file_size: u64) -> u32 {
    if is_single_shot(file_size) {
        return file_size as u32;
    }
    let target = (file_size / 50).clamp(MIN_BLOCK_SIZE as u64, MAX_BLOCK_SIZE as u64) as u32;
    target / BLOCK_ALIGN * BLOCK_ALIGN
}

pub fn is_single_shot(file_size: u64) -> bool {
    file_size <= MIN_BLOCK_SIZE as u64
}

/// Number of `DATA`/`LASTDATA` chunks a file produces (always at least one).
pub fn chunk_count(file_size: u64, block_size: u32) -> u64 {
    if block_size == 0 || file_size == 0 {
        return 1;
    }
    file_size.div_ceil(block_size as u64)
}
