/// Content fingerprints for change detection.
///
/// A file's fingerprint is the SHA-256 of its full byte content, read in
/// fixed-size blocks so memory use does not depend on file size.
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded fingerprint.
pub const HASH_HEX_LEN: usize = 64;

const READ_BLOCK: usize = 8 * 1024;

/// Compute the hex-encoded SHA-256 of everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; READ_BLOCK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the fingerprint of the file at `path`.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let file = File::open(path)?;
    hash_reader(BufReader::with_capacity(READ_BLOCK, file))
}
