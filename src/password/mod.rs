//! Pluggable password strategies.
//!
//! POSIX directories store a hashed `userPassword` tagged with its RFC 2307
//! scheme (`{SSHA}`, `{CRYPT}`, `{ARGON2}`); Active Directory accepts a
//! cleartext `unicodePwd` in its quoted UTF-16LE encoding and hashes it itself.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::AttrValue;

/// Password hashing algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordAlgorithm {
    /// bcrypt through the `{CRYPT}` scheme
    Bcrypt,
    /// SSHA (Salted SHA-1), understood by every LDAP server
    #[default]
    Ssha,
    /// Argon2id through the `{ARGON2}` scheme
    Argon2id,
    /// Active Directory `unicodePwd` encoding
    AdUnicode,
}

impl std::fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bcrypt => write!(f, "bcrypt"),
            Self::Ssha => write!(f, "SSHA"),
            Self::Argon2id => write!(f, "Argon2id"),
            Self::AdUnicode => write!(f, "unicodePwd"),
        }
    }
}

/// Strategy turning a cleartext password into the value written to the directory
pub trait PasswordHasher: Send + Sync {
    /// Produce the stored form of a plaintext password
    fn hash_password(&self, password: &str) -> AppResult<AttrValue>;

    /// Verify a plaintext password against a stored value
    fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool>;

    /// Check if a stored value was produced by this algorithm
    fn is_hash(&self, stored: &[u8]) -> bool;

    /// Get the algorithm identifier
    fn algorithm(&self) -> PasswordAlgorithm;
}

pub mod ad_unicode;
pub mod argon2_hasher;
pub mod bcrypt_hasher;
pub mod ssha_hasher;

pub use ad_unicode::AdUnicodeEncoder;
pub use argon2_hasher::Argon2idHasher;
pub use bcrypt_hasher::BcryptHasher;
pub use ssha_hasher::SshaHasher;

/// Password manager with support for multiple algorithms
pub struct PasswordManager {
    /// Current algorithm for new passwords
    current_algorithm: PasswordAlgorithm,
    enforce_strength: bool,
    /// Available hashers
    hashers: Vec<Box<dyn PasswordHasher>>,
}

impl Default for PasswordManager {
    fn default() -> Self {
        Self::new(PasswordAlgorithm::default())
    }
}

impl std::fmt::Debug for PasswordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordManager")
            .field("current_algorithm", &self.current_algorithm)
            .field("enforce_strength", &self.enforce_strength)
            .finish()
    }
}

impl PasswordManager {
    /// Create a new PasswordManager with specified default algorithm
    pub fn new(default_algorithm: PasswordAlgorithm) -> Self {
        let hashers: Vec<Box<dyn PasswordHasher>> = vec![
            Box::new(BcryptHasher::new()),
            Box::new(SshaHasher::new()),
            Box::new(Argon2idHasher::new()),
            Box::new(AdUnicodeEncoder),
        ];

        Self {
            current_algorithm: default_algorithm,
            enforce_strength: false,
            hashers,
        }
    }

    /// Require `validate_password_strength` to pass before hashing
    pub fn with_strength_policy(mut self, enforce: bool) -> Self {
        self.enforce_strength = enforce;
        self
    }

    /// Replace the hasher registered for an algorithm with a custom strategy
    pub fn with_hasher(mut self, hasher: Box<dyn PasswordHasher>) -> Self {
        let algorithm = hasher.algorithm();
        self.hashers.retain(|h| h.algorithm() != algorithm);
        self.hashers.push(hasher);
        self
    }

    /// Encode a plaintext password using the current algorithm
    pub fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
        if password.is_empty() {
            return Err(AppError::Password("Password cannot be empty".to_string()));
        }

        if self.enforce_strength {
            self.validate_password_strength(password)?;
        }

        let hasher = self
            .hashers
            .iter()
            .find(|h| h.algorithm() == self.current_algorithm)
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "Hasher not found for algorithm: {}",
                    self.current_algorithm
                ))
            })?;

        hasher.hash_password(password)
    }

    /// Verify a plaintext password against any supported stored format
    pub fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
        for hasher in &self.hashers {
            if hasher.is_hash(stored) {
                return hasher.verify_password(password, stored);
            }
        }

        Err(AppError::Password("Unsupported hash format".to_string()))
    }

    /// Check if a value is already in a stored format (any supported algorithm)
    pub fn is_hashed_password(&self, stored: &[u8]) -> bool {
        self.hashers.iter().any(|hasher| hasher.is_hash(stored))
    }

    /// Detect the algorithm used for a given stored value
    pub fn detect_algorithm(&self, stored: &[u8]) -> Option<PasswordAlgorithm> {
        self.hashers
            .iter()
            .find(|hasher| hasher.is_hash(stored))
            .map(|hasher| hasher.algorithm())
    }

    /// Validate password strength
    pub fn validate_password_strength(&self, password: &str) -> AppResult<()> {
        // Minimum length requirement
        if password.chars().count() < 8 {
            return Err(AppError::Password(
                "Password must be at least 8 characters long".to_string(),
            ));
        }

        // Maximum length to prevent DoS attacks
        if password.len() > 128 {
            return Err(AppError::Password(
                "Password must be no more than 128 characters long".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_lowercase()) {
            return Err(AppError::Password(
                "Password must contain at least one lowercase letter".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_uppercase()) {
            return Err(AppError::Password(
                "Password must contain at least one uppercase letter".to_string(),
            ));
        }

        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AppError::Password(
                "Password must contain at least one digit".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the current default algorithm
    pub fn current_algorithm(&self) -> PasswordAlgorithm {
        self.current_algorithm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_manager_default() {
        let pm = PasswordManager::default();
        assert_eq!(pm.current_algorithm(), PasswordAlgorithm::Ssha);
    }

    #[test]
    fn test_password_strength_validation() {
        let pm = PasswordManager::default().with_strength_policy(true);

        assert!(pm.validate_password_strength("TestPassword123").is_ok());
        assert!(pm.validate_password_strength("Test1").is_err());
        assert!(pm.validate_password_strength("testpassword123").is_err());
        assert!(pm.validate_password_strength("TESTPASSWORD123").is_err());
        assert!(pm.validate_password_strength("TestPassword").is_err());

        assert!(pm.hash_password("weak").is_err());
        assert!(pm.hash_password("Str0ngEnough").is_ok());
    }

    #[test]
    fn test_empty_password_rejected() {
        let pm = PasswordManager::new(PasswordAlgorithm::AdUnicode);
        assert!(matches!(pm.hash_password(""), Err(AppError::Password(_))));
    }

    #[test]
    fn test_detect_algorithm() {
        let pm = PasswordManager::new(PasswordAlgorithm::Ssha);
        let stored = pm.hash_password("secret").unwrap().to_raw().remove(0);

        assert_eq!(pm.detect_algorithm(&stored), Some(PasswordAlgorithm::Ssha));
        assert!(pm.is_hashed_password(&stored));
        assert!(pm.verify_password("secret", &stored).unwrap());
        assert!(!pm.is_hashed_password(b"plaintext"));
    }

    #[test]
    fn test_custom_hasher_replaces_builtin() {
        struct Cleartext;
        impl PasswordHasher for Cleartext {
            fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
                Ok(AttrValue::from(format!("{{CLEARTEXT}}{}", password)))
            }
            fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
                Ok(stored == format!("{{CLEARTEXT}}{}", password).as_bytes())
            }
            fn is_hash(&self, stored: &[u8]) -> bool {
                stored.starts_with(b"{CLEARTEXT}")
            }
            fn algorithm(&self) -> PasswordAlgorithm {
                PasswordAlgorithm::Bcrypt
            }
        }

        let pm = PasswordManager::new(PasswordAlgorithm::Bcrypt).with_hasher(Box::new(Cleartext));
        assert_eq!(
            pm.hash_password("pw").unwrap(),
            AttrValue::from("{CLEARTEXT}pw")
        );
    }

    #[test]
    fn test_algorithm_display() {
        assert_eq!(PasswordAlgorithm::Bcrypt.to_string(), "bcrypt");
        assert_eq!(PasswordAlgorithm::Ssha.to_string(), "SSHA");
        assert_eq!(PasswordAlgorithm::Argon2id.to_string(), "Argon2id");
        assert_eq!(PasswordAlgorithm::AdUnicode.to_string(), "unicodePwd");
    }
}
