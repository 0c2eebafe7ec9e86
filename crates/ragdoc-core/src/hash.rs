//! Content fingerprints.
//!
//! A document's identity is the lowercase hex SHA-256 of its bytes. The
//! source is consumed in fixed 8 KiB blocks so arbitrarily large files hash
//! in constant memory; the digest depends only on the byte content, never on
//! how the reader happens to split it.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Read block size used while hashing.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// Length of a hex-encoded fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

/// Hash everything `reader` yields and return the hex digest.
pub fn digest<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn digest_file(path: &Path) -> io::Result<String> {
    digest(File::open(path)?)
}

/// True if `s` looks like a fingerprint produced by this module.
pub fn is_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
