use super::{PasswordAlgorithm, PasswordHasher};
use crate::error::{AppError, AppResult};
use crate::models::AttrValue;

/// Active Directory `unicodePwd` encoding.
///
/// AD hashes the password itself; the client sends the cleartext surrounded
/// by double quotes and encoded as UTF-16LE. The attribute is write-only so
/// a stored value can never be read back, which makes verification a plain
/// comparison of encodings.
pub struct AdUnicodeEncoder;

impl AdUnicodeEncoder {
    pub fn encode(password: &str) -> AppResult<Vec<u8>> {
        if password.is_empty() {
            return Err(AppError::Password("Password cannot be empty".to_string()));
        }

        let quoted = format!("\"{password}\"");
        Ok(quoted.encode_utf16().flat_map(u16::to_le_bytes).collect())
    }
}

impl PasswordHasher for AdUnicodeEncoder {
    fn hash_password(&self, password: &str) -> AppResult<AttrValue> {
        Ok(AttrValue::binary(Self::encode(password)?))
    }

    fn verify_password(&self, password: &str, stored: &[u8]) -> AppResult<bool> {
        Ok(Self::encode(password)? == stored)
    }

    fn is_hash(&self, stored: &[u8]) -> bool {
        // UTF-16LE `"` at both ends
        stored.len() >= 4
            && stored.len() % 2 == 0
            && stored.starts_with(&[0x22, 0x00])
            && stored.ends_with(&[0x22, 0x00])
    }

    fn algorithm(&self) -> PasswordAlgorithm {
        PasswordAlgorithm::AdUnicode
    }
}
