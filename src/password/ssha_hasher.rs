use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use crate::models::AttrValue;

const SCHEME: &str = "{SSHA}";
const SHA1_LEN: usize = 20;

/// SSHA (Salted SHA-1) `userPassword` hasher
///
/// SSHA format: {SSHA}base64(sha1(password + salt) + salt)
pub struct SshaHasher {
    salt_length: usize,
}

impl SshaHasher {
    /// Create a new SSHA hasher
    pub fn new() -> Self {
        Self {
            salt_length: 8, // 8 bytes salt is standard for SSHA
        }
    }

    /// Create SSHA hasher with custom salt length
    pub fn with_salt_length(salt_length: usize) -> Self {
        Self { salt_length }
    }

    fn generate_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.salt_length];
        rand::thread_rng().fill_bytes(&mut salt);
        salt
    }

    fn hash_with_salt(&self, password: &str, salt: &[u8]) -> Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(password.as_bytes());
        hasher.update(salt);
        hasher.finalize().to_vec()
    }

    fn decode(stored: &[u8]) -> Option<Vec<u8>> {
        let encoded = stored.strip_prefix(SCHEME.as_bytes())?;
        let combined = general_purpose::STANDARD.decode(encoded).ok()?;
        (combined.len() >= SHA1_LEN).then_some(combined)
    }
}

impl Default for SshaHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for SshaHasher {
    fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
        let salt = self.generate_salt();
        let mut combined = self.hash_with_salt(password, &salt);
        combined.extend_from_slice(&salt);

        let encoded = general_purpose::STANDARD.encode(&combined);
        Ok(AttrValue::from(format!("{}{}", SCHEME, encoded)))
    }

    fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
        let combined = Self::decode(stored)
            .ok_or_else(|| AppError::Password("Invalid SSHA hash format".to_string()))?;

        let (stored_hash, salt) = combined.split_at(SHA1_LEN);
        let computed_hash = self.hash_with_salt(password, salt);

        Ok(stored_hash == computed_hash.as_slice())
    }

    fn is_hash(&self, stored: &[u8]) -> bool {
        Self::decode(stored).is_some()
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::Ssha
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(value: AttrValue) -> Vec<u8> {
        value.to_raw().remove(0)
    }

    #[test]
    fn test_ssha_hash_and_verify() {
        let hasher = SshaHasher::new();
        let password = "TestPassword123!";

        let hash = stored(hasher.hash_password(password).unwrap());

        assert!(hash.starts_with(b"{SSHA}"));
        assert!(hasher.is_hash(&hash));
        assert!(hasher.verify_password(password, &hash).unwrap());
        assert!(!hasher.verify_password("WrongPassword", &hash).unwrap());
    }

    #[test]
    fn test_ssha_is_hash() {
        let hasher = SshaHasher::new();

        assert!(!hasher.is_hash(b"not-a-hash"));
        assert!(!hasher.is_hash(b"{CRYPT}$2b$12$example"));
        assert!(!hasher.is_hash(b"{SSHA}invalid-base64!@#"));
        assert!(!hasher.is_hash(b"{SSHA}dGVzdA==")); // only 4 bytes
    }

    #[test]
    fn test_ssha_different_salts() {
        let hasher = SshaHasher::with_salt_length(16);
        let password = "SamePassword123!";

        let hash1 = stored(hasher.hash_password(password).unwrap());
        let hash2 = stored(hasher.hash_password(password).unwrap());

        assert_ne!(hash1, hash2);
        assert!(hasher.verify_password(password, &hash1).unwrap());
        assert!(hasher.verify_password(password, &hash2).unwrap());
    }

    #[test]
    fn test_ssha_known_vector() {
        let hasher = SshaHasher::new();

        let salt = b"testsalt";
        let mut combined = hasher.hash_with_salt("password", salt);
        combined.extend_from_slice(salt);
        let ssha = format!("{{SSHA}}{}", general_purpose::STANDARD.encode(&combined));

        assert!(hasher.verify_password("password", ssha.as_bytes()).unwrap());
        assert!(!hasher.verify_password("wrongpassword", ssha.as_bytes()).unwrap());
    }
}
