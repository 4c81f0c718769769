use std::sync::Arc;

use ldap_orm::config::DirectoryConfig;
use ldap_orm::password::PasswordAlgorithm;
use ldap_orm::{AppError, Directory, Filter, MemoryDirectory, SchemaVariant};

mod common;

const CONFIG: &str = r#"
variant: posix
users:
  base: "ou=People,dc=example,dc=com"
  extra_attributes: ["employeeNumber"]
groups:
  base: "ou=Group,dc=example,dc=com"
password:
  enforce_strength: true
posix:
  first_uid_number: 5000
  home_root: /srv/home
"#;

fn setup_from_yaml() -> (Arc<MemoryDirectory>, Directory) {
    let memory = Arc::new(
        MemoryDirectory::new()
            .with_container("ou=People,dc=example,dc=com")
            .unwrap()
            .with_container("ou=Group,dc=example,dc=com")
            .unwrap(),
    );
    let config = DirectoryConfig::from_yaml_str(CONFIG).unwrap();
    let directory = Directory::new(memory.clone(), &config).unwrap();
    (memory, directory)
}

#[test]
fn test_mismatched_password_algorithm_is_rejected() {
    let memory = Arc::new(MemoryDirectory::new());
    let mut config = DirectoryConfig::default_config(common::AD_BASE, SchemaVariant::Ad);
    config.password.algorithm = Some(PasswordAlgorithm::Ssha);

    assert!(matches!(
        Directory::new(memory, &config),
        Err(AppError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_site_settings_and_extra_attributes() {
    let (_memory, directory) = setup_from_yaml();
    let eng = common::create_posix_group(&directory, "eng", 1000).await;

    let mut alice = directory.new_user().unwrap();
    alice.set_uid("alice").unwrap();
    alice.set_primary_group(&eng).unwrap();
    alice.set("employeeNumber", "42").unwrap();
    assert!(matches!(
        alice.set("favouriteColour", "blue"),
        Err(AppError::Validation(_))
    ));
    alice.create().await.unwrap();

    assert_eq!(alice.uid_number().unwrap().as_deref(), Some("5000"));
    assert_eq!(alice.home_directory().unwrap().as_deref(), Some("/srv/home/alice"));

    let found = directory
        .search_users(Filter::eq("employeeNumber", "42"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0] == alice);
}

#[tokio::test]
async fn test_strength_policy_applies_to_passwords() {
    let (_memory, directory) = setup_from_yaml();
    let mut user = directory.new_user().unwrap();

    assert!(matches!(user.set_password("short"), Err(AppError::Password(_))));
    user.set_password("Longer-Passw0rd").unwrap();
    assert!(user.get("userPassword").unwrap().is_some());
}

#[tokio::test]
async fn test_search_groups_and_lookup_helpers() {
    let (_memory, directory) = common::setup_posix();
    common::create_posix_group(&directory, "eng", 1000).await;
    common::create_posix_group(&directory, "ops", 1001).await;

    let all = directory.search_groups(Filter::any()).await.unwrap();
    assert_eq!(common::names(&all), vec!["eng", "ops"]);

    let ops = directory.find_group("ops").await.unwrap().unwrap();
    assert_eq!(ops.gid_number().unwrap().as_deref(), Some("1001"));
    assert!(directory.find_group("qa").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_create_is_rejected_by_directory() {
    let (memory, directory) = common::setup_posix();
    let eng = common::create_posix_group(&directory, "eng", 1000).await;
    common::create_posix_user(&directory, "alice", &eng).await;
    let before = memory.snapshot().await;

    let mut twin = directory.new_user().unwrap();
    twin.set_uid("alice").unwrap();
    twin.set_primary_group(&eng).unwrap();

    assert!(matches!(twin.create().await, Err(AppError::BatchFailed(_))));
    assert_eq!(memory.snapshot().await, before);
}
