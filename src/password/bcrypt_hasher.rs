use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use crate::models::AttrValue;
use bcrypt::{hash, verify, DEFAULT_COST};

const SCHEME: &str = "{CRYPT}";

/// bcrypt `userPassword` hasher, stored through the `{CRYPT}` scheme so that
/// servers delegating to the system crypt(3) accept it.
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    /// Create a new bcrypt hasher with default cost (12)
    pub fn new() -> Self {
        Self { cost: DEFAULT_COST }
    }

    /// Create a new bcrypt hasher with custom cost
    ///
    /// Cost should be between 4 and 31.
    pub fn with_cost(cost: u32) -> AppResult<Self> {
        if !(4..=31).contains(&cost) {
            return Err(AppError::Configuration(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }

        Ok(Self { cost })
    }

    fn crypt_part(stored: &[u8]) -> Option<&str> {
        let text = std::str::from_utf8(stored).ok()?;
        let crypt = text.strip_prefix(SCHEME)?;
        // $2a$, $2b$, $2x$ or $2y$ followed by cost and 53 characters of salt + hash
        let looks_like_bcrypt =
            crypt.starts_with("$2") && crypt.len() == 60 && crypt.matches('$').count() == 3;
        looks_like_bcrypt.then_some(crypt)
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
        let hashed = hash(password, self.cost)
            .map_err(|e| AppError::Password(format!("Failed to hash password with bcrypt: {}", e)))?;
        Ok(AttrValue::from(format!("{}{}", SCHEME, hashed)))
    }

    fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
        let crypt = Self::crypt_part(stored)
            .ok_or_else(|| AppError::Password("Invalid {CRYPT} bcrypt value".to_string()))?;
        verify(password, crypt)
            .map_err(|e| AppError::Password(format!("Failed to verify bcrypt password: {}", e)))
    }

    fn is_hash(&self, stored: &[u8]) -> bool {
        Self::crypt_part(stored).is_some()
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::Bcrypt
    }
}
