use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::SchemaVariant;
use crate::password::PasswordAlgorithm;

/// gidNumber parked on a POSIX group while its replacement claims the real one.
pub const DEFAULT_RENAME_SENTINEL_GID: u32 = 2_147_483_646;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DirectoryConfig {
    pub variant: SchemaVariant,
    pub users: EntityConfig,
    pub groups: EntityConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub posix: PosixConfig,
    #[serde(default)]
    pub ad: AdConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EntityConfig {
    /// Root of the subtree this entity type lives under.
    pub base: String,
    /// Site specific attributes on top of the static schema.
    #[serde(default)]
    pub extra_attributes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PasswordConfig {
    /// Defaults to SSHA for POSIX and the unicodePwd encoding for AD.
    #[serde(default)]
    pub algorithm: Option<PasswordAlgorithm>,
    /// Enforce the strength policy before hashing.
    #[serde(default)]
    pub enforce_strength: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PosixConfig {
    #[serde(default = "default_rename_sentinel_gid")]
    pub rename_sentinel_gid: u32,
    /// Floor for automatically allocated uidNumbers.
    #[serde(default = "default_first_uid_number")]
    pub first_uid_number: u32,
    #[serde(default = "default_login_shell")]
    pub login_shell: String,
    #[serde(default = "default_home_root")]
    pub home_root: String,
}

impl Default for PosixConfig {
    fn default() -> Self {
        Self {
            rename_sentinel_gid: default_rename_sentinel_gid(),
            first_uid_number: default_first_uid_number(),
            login_shell: default_login_shell(),
            home_root: default_home_root(),
        }
    }
}

fn default_rename_sentinel_gid() -> u32 {
    DEFAULT_RENAME_SENTINEL_GID
}

fn default_first_uid_number() -> u32 {
    10000
}

fn default_login_shell() -> String {
    "/bin/bash".to_string()
}

fn default_home_root() -> String {
    "/home".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AdConfig {
    /// Suffix used to derive `userPrincipalName` (e.g. `corp.example.com`).
    #[serde(default)]
    pub upn_suffix: Option<String>,
}

impl DirectoryConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> AppResult<Self> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(AppError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml_str(&content).map_err(|e| match e {
            AppError::Configuration(msg) => AppError::Configuration(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                msg
            )),
            other => other,
        })
    }

    /// Parse YAML content, expanding `${VAR}` / `${VAR:-default}` first.
    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let expanded = Self::expand_env_vars(content).map_err(AppError::Configuration)?;
        let config: DirectoryConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Conventional layout below a naming context.
    pub fn default_config(base_dn: &str, variant: SchemaVariant) -> Self {
        let (users, groups) = match variant {
            SchemaVariant::Posix => (
                format!("ou=People,{}", base_dn),
                format!("ou=Group,{}", base_dn),
            ),
            SchemaVariant::Ad => (
                format!("CN=Users,{}", base_dn),
                format!("CN=Users,{}", base_dn),
            ),
        };

        DirectoryConfig {
            variant,
            users: EntityConfig {
                base: users,
                extra_attributes: Vec::new(),
            },
            groups: EntityConfig {
                base: groups,
                extra_attributes: Vec::new(),
            },
            password: PasswordConfig::default(),
            posix: PosixConfig::default(),
            ad: AdConfig::default(),
        }
    }

    /// Password strategy for this directory.
    pub fn password_algorithm(&self) -> PasswordAlgorithm {
        match (self.password.algorithm, self.variant) {
            (Some(algorithm), _) => algorithm,
            (None, SchemaVariant::Posix) => PasswordAlgorithm::Ssha,
            (None, SchemaVariant::Ad) => PasswordAlgorithm::AdUnicode,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.users.base.trim().is_empty() || self.groups.base.trim().is_empty() {
            return Err(AppError::Configuration(
                "Both users.base and groups.base are required".to_string(),
            ));
        }
        if self.posix.rename_sentinel_gid == 0 {
            return Err(AppError::Configuration(
                "posix.rename_sentinel_gid cannot be 0".to_string(),
            ));
        }
        let algorithm = self.password_algorithm();
        let algorithm_fits = match self.variant {
            SchemaVariant::Ad => algorithm == PasswordAlgorithm::AdUnicode,
            SchemaVariant::Posix => algorithm != PasswordAlgorithm::AdUnicode,
        };
        if !algorithm_fits {
            return Err(AppError::Configuration(format!(
                "Password algorithm {} does not fit the {:?} schema",
                algorithm, self.variant
            )));
        }
        Ok(())
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let chars: Vec<char> = content.chars().collect();
        let mut expanded = String::new();
        let mut i = 0;

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
                // Find the closing brace
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }

                if j < chars.len() {
                    let var_expr: String = chars[i + 2..j].iter().collect();

                    let (var_name, default_value) = match var_expr.find(":-") {
                        Some(pos) => (
                            var_expr[..pos].to_string(),
                            Some(var_expr[pos + 2..].to_string()),
                        ),
                        None => (var_expr, None),
                    };

                    let value = match (std::env::var(&var_name), default_value) {
                        (Ok(val), _) => val,
                        (Err(_), Some(default)) => default,
                        (Err(_), None) => {
                            return Err(format!(
                                "Environment variable {} not found and no default provided",
                                var_name
                            ));
                        }
                    };

                    expanded.push_str(&value);
                    i = j + 1;
                } else {
                    expanded.push(chars[i]);
                    i += 1;
                }
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("LDAP_ORM_TEST_SUFFIX", "dc=example,dc=org");

        let yaml = "base: \"ou=People,${LDAP_ORM_TEST_SUFFIX:-dc=example,dc=com}\"";
        let expanded = DirectoryConfig::expand_env_vars(yaml).unwrap();
        assert!(expanded.contains("dc=example,dc=org"));

        let yaml_with_default = "base: \"${LDAP_ORM_MISSING_VAR:-dc=fallback}\"";
        let expanded = DirectoryConfig::expand_env_vars(yaml_with_default).unwrap();
        assert!(expanded.contains("dc=fallback"));

        assert!(DirectoryConfig::expand_env_vars("${LDAP_ORM_MISSING_VAR}").is_err());

        std::env::remove_var("LDAP_ORM_TEST_SUFFIX");
    }

    #[test]
    fn test_config_file_loading() {
        let config_content = r#"
variant: posix
users:
  base: "ou=People,dc=example,dc=com"
  extra_attributes: ["employeeNumber"]
groups:
  base: "ou=Group,dc=example,dc=com"
password:
  algorithm: ssha
  enforce_strength: true
posix:
  rename_sentinel_gid: 99999
  login_shell: /bin/zsh
"#;

        let temp_file = std::env::temp_dir().join("ldap_orm_test_config.yaml");
        std::fs::write(&temp_file, config_content).unwrap();

        let config = DirectoryConfig::load_from_file(&temp_file).unwrap();

        assert_eq!(config.variant, SchemaVariant::Posix);
        assert_eq!(config.users.extra_attributes, vec!["employeeNumber"]);
        assert_eq!(config.password_algorithm(), PasswordAlgorithm::Ssha);
        assert_eq!(config.posix.rename_sentinel_gid, 99999);
        assert_eq!(config.posix.login_shell, "/bin/zsh");
        assert_eq!(config.posix.first_uid_number, 10000);
        assert!(config.ad.upn_suffix.is_none());

        std::fs::remove_file(&temp_file).unwrap();
    }

    #[test]
    fn test_missing_config_file() {
        let result = DirectoryConfig::load_from_file("/nonexistent/path/directory.yaml");
        match result {
            Err(AppError::Configuration(msg)) => assert!(msg.contains("Configuration file not found")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_yaml() {
        let result = DirectoryConfig::from_yaml_str("invalid: yaml: content: [");
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_default_config() {
        let config = DirectoryConfig::default_config("dc=example,dc=com", SchemaVariant::Posix);
        assert_eq!(config.users.base, "ou=People,dc=example,dc=com");
        assert_eq!(config.groups.base, "ou=Group,dc=example,dc=com");
        assert!(config.validate().is_ok());

        let ad = DirectoryConfig::default_config("DC=corp,DC=example", SchemaVariant::Ad);
        assert_eq!(ad.users.base, "CN=Users,DC=corp,DC=example");
        assert_eq!(ad.password_algorithm(), PasswordAlgorithm::AdUnicode);
        assert!(ad.validate().is_ok());
    }

    #[test]
    fn test_mismatched_password_algorithm() {
        let yaml = r#"
variant: ad
users: { base: "CN=Users,DC=corp" }
groups: { base: "CN=Users,DC=corp" }
password: { algorithm: bcrypt }
"#;
        assert!(matches!(
            DirectoryConfig::from_yaml_str(yaml),
            Err(AppError::Configuration(_))
        ));
    }
}
