// This file holds the Verifier: SHA-256 over fetched payloads and installed files.
//
// Digests in a manifest may carry a `sha256:` prefix and any letter case; both sides are
// normalised to bare lowercase hex before comparing. A mismatch is always an error.

use crate::log_debug;
use crate::schemas::errors::ProvisionError;
use colored::Colorize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Lowercase hex SHA-256 of a file, streamed in chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    // Stream in fixed chunks so large binaries are never held in memory twice.
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Strips an optional `sha256:` prefix and lowercases.
pub fn normalize_digest(digest: &str) -> String {
    let trimmed = digest.trim();
    let bare = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed);
    bare.to_ascii_lowercase()
}

pub fn is_valid_sha256(digest: &str) -> bool {
    let d = normalize_digest(digest);
    d.len() == 64 && d.chars().all(|c| c.is_ascii_hexdigit())
}

/// Verifies `data` against `expected`, case-insensitively. Fails closed.
pub fn verify(url: &str, data: &[u8], expected: &str) -> Result<(), ProvisionError> {
    let expected = normalize_digest(expected);
    let actual = sha256_hex(data);
    // `actual` is always lowercase hex, so a plain comparison after normalising suffices.
    if actual != expected {
        return Err(ProvisionError::Integrity {
            url: url.to_string(),
            expected,
            actual,
        });
    }
    log_debug!("[Verifier] sha256 {} matches for {}", actual.green(), url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("abc")
    const ABC: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_vector() {
        assert_eq!(sha256_hex(b"abc"), ABC);
    }

    #[test]
    fn verify_is_case_insensitive_and_accepts_prefix() {
        assert!(verify("u", b"abc", &ABC.to_uppercase()).is_ok());
        assert!(verify("u", b"abc", &format!("sha256:{}", ABC)).is_ok());
    }

    #[test]
    fn single_flipped_byte_is_an_integrity_error() {
        let err = verify("u", b"abd", ABC).unwrap_err();
        match err {
            ProvisionError::Integrity { expected, actual, .. } => {
                assert_eq!(expected, ABC);
                assert_ne!(actual, ABC);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn digest_shape_validation() {
        assert!(is_valid_sha256(ABC));
        assert!(!is_valid_sha256("abc"));
        assert!(!is_valid_sha256(&"g".repeat(64)));
    }

    #[test]
    fn file_digest_matches_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(sha256_file(&path).unwrap(), ABC);
    }
}
