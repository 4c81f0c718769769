use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use crate::models::AttrValue;
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as Argon2PasswordHasher, PasswordVerifier, Version,
};

const SCHEME: &str = "{ARGON2}";

/// Argon2id `userPassword` hasher using the `{ARGON2}` scheme of the OpenLDAP
/// `pw-argon2` module.
///
/// OWASP recommendations:
/// - Use Argon2id with a minimum configuration of 19 MiB of memory
/// - An iteration count of 2
/// - 1 degree of parallelism
pub struct Argon2idHasher {
    argon2: Argon2<'static>,
}

impl Argon2idHasher {
    /// Create a new Argon2id hasher with OWASP recommended settings
    pub fn new() -> Self {
        let argon2 = match Params::new(19456, 2, 1, Some(32)) {
            Ok(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            Err(_) => Argon2::default(),
        };

        Self { argon2 }
    }

    fn phc_part(stored: &[u8]) -> Option<&str> {
        let text = std::str::from_utf8(stored).ok()?;
        let phc = text.strip_prefix(SCHEME)?;
        (phc.starts_with("$argon2id$") && PasswordHash::new(phc).is_ok()).then_some(phc)
    }
}

impl Default for Argon2idHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for Argon2idHasher {
    fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
        let salt = SaltString::generate(&mut rand::thread_rng());

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Password(format!("Failed to hash password with Argon2id: {}", e)))?;

        Ok(AttrValue::from(format!("{}{}", SCHEME, password_hash)))
    }

    fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
        let phc = Self::phc_part(stored)
            .ok_or_else(|| AppError::Password("Invalid {ARGON2} value".to_string()))?;
        let parsed_hash = PasswordHash::new(phc)
            .map_err(|e| AppError::Password(format!("Failed to parse Argon2id hash: {}", e)))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Password(format!(
                "Failed to verify Argon2id password: {}",
                e
            ))),
        }
    }

    fn is_hash(&self, stored: &[u8]) -> bool {
        Self::phc_part(stored).is_some()
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::Argon2id
    }
}
