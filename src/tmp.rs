//! Temporary file naming shared with the front end.
//!
//! The front end computes the same file name for a cell source on its side (it knows the hash
//! method, seed, prefix and suffix from the `debugInfo` reply), so breakpoints set in a cell
//! survive re-execution of identical code.

use std::path::PathBuf;

/// Seed of the cell source hash.
pub const HASH_SEED: u32 = 0xc70f6907;

/// Name of the hash method, as announced to the front end.
pub const HASH_METHOD: &str = "Murmur2";

const TMP_SUFFIX: &str = ".py";

/// Root of all temporary directories.
pub fn temp_directory_path() -> PathBuf {
    std::env::temp_dir()
}

/// Per-process directory with cell source files, ends with a path separator.
pub fn tmp_prefix() -> String {
    let dir = temp_directory_path().join(format!("nbdap_{}", std::process::id()));
    format!("{}{}", dir.display(), std::path::MAIN_SEPARATOR)
}

pub fn tmp_suffix() -> &'static str {
    TMP_SUFFIX
}

/// Per-process directory for external adapter logs.
pub fn log_directory() -> PathBuf {
    temp_directory_path().join(format!("nbdap_debug_logs_{}", std::process::id()))
}

/// Temporary file a cell source is dumped into.
pub fn cell_tmp_file(code: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}{}{}",
        tmp_prefix(),
        murmur2(code.as_bytes(), HASH_SEED),
        tmp_suffix()
    ))
}

/// 32-bit MurmurHash2.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() == 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
