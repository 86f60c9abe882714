//! Opaque one-way digests for credentials and session tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the given string.
fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Computes the comparable digest stored in place of a plaintext password.
pub fn password_digest(password: &str) -> String {
    sha256_hex(password.as_bytes())
}

/// Issues a fresh session token derived from an account's password digest
/// and the current wall-clock time.
pub fn session_token(digest: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    sha256_hex(format!("{}{}", digest, nanos).as_bytes())
}

#[cfg(test)]
mod digest_tests {
    use super::*;

    #[test]
    fn password_digest_stable() {
        assert_eq!(password_digest("pw1"), password_digest("pw1"));
        assert_ne!(password_digest("pw1"), password_digest("pw2"));
        assert_eq!(password_digest("pw1").len(), 64);
        assert_ne!(password_digest("pw1"), "pw1");
    }

    #[test]
    fn session_token_fresh() {
        let digest = password_digest("pw1");
        let token = session_token(&digest);
        assert_eq!(token.len(), 64);
        assert_ne!(token, digest);
    }
}
