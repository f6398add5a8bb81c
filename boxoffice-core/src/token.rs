use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// One-time ticket credential. Only `hash()` is ever persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Hex SHA-256 of the raw token
    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Constant-time comparison against a stored hash.
    pub fn matches(&self, stored_hash: &str) -> bool {
        let computed = self.hash();
        constant_time_eq::constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
    }
}

pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(********)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        let token = AccessToken::generate();
        assert_eq!(token.expose().len(), 64);
        assert!(token.expose().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, AccessToken::generate());
    }

    #[test]
    fn test_matches_only_own_hash() {
        let token = AccessToken::generate();
        let stored = token.hash();
        assert_eq!(stored.len(), 64);
        assert!(token.matches(&stored));
        assert!(!AccessToken::generate().matches(&stored));
        assert!(!token.matches(""));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_never_formats_raw_value() {
        let token = AccessToken::from_raw("deadbeef");
        assert!(!format!("{:?}", token).contains("deadbeef"));
        assert!(!format!("{}", token).contains("deadbeef"));
    }
}
