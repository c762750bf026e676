//! Per-session reload secret.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

/// A random per-session secret authenticating control-endpoint requests.
/// 128 bits from the OS generator, base64url-encoded, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ReloadToken(String);

impl ReloadToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare a presented key without early exit on the first mismatch.
    pub fn matches(&self, presented: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = presented.as_bytes();
        if ours.len() != theirs.len() {
            return false;
        }
        ours.iter()
            .zip(theirs)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for ReloadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret stays out of logs.
        f.write_str("ReloadToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_urlsafe() {
        let a = ReloadToken::generate();
        let b = ReloadToken::generate();
        assert_ne!(a.as_str(), b.as_str());
        // 16 bytes -> 22 base64url chars, no padding.
        assert_eq!(a.as_str().len(), 22);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn matches_exact_key_only() {
        let token = ReloadToken::generate();
        assert!(token.matches(token.as_str()));
        assert!(!token.matches(""));
        assert!(!token.matches("wrong-key"));
        let mut truncated = token.as_str().to_owned();
        truncated.pop();
        assert!(!token.matches(&truncated));
    }

    #[test]
    fn debug_redacts_the_secret() {
        let token = ReloadToken::generate();
        assert_eq!(format!("{token:?}"), "ReloadToken(..)");
    }
}
