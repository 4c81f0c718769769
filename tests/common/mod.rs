#![allow(dead_code)]

use std::sync::Arc;

use ldap_orm::config::DirectoryConfig;
use ldap_orm::{Directory, Group, MemoryDirectory, SchemaVariant, User};

pub const POSIX_BASE: &str = "dc=example,dc=com";
pub const AD_BASE: &str = "DC=corp,DC=example";
pub const DOMAIN_SID: &str = "S-1-5-21-1-2-3";

/// In-memory POSIX tree with the usual People and Group containers.
pub fn setup_posix() -> (Arc<MemoryDirectory>, Directory) {
    let memory = MemoryDirectory::new()
        .with_container("ou=People,dc=example,dc=com")
        .unwrap()
        .with_container("ou=Group,dc=example,dc=com")
        .unwrap()
        .with_unique_constraint("posixAccount", "uid")
        .with_unique_constraint("posixAccount", "uidNumber")
        .with_unique_constraint("posixGroup", "gidNumber");
    let memory = Arc::new(memory);
    let config = DirectoryConfig::default_config(POSIX_BASE, SchemaVariant::Posix);
    let directory = Directory::new(memory.clone(), &config).unwrap();
    (memory, directory)
}

/// In-memory domain controller with a single Users container.
pub fn setup_ad() -> (Arc<MemoryDirectory>, Directory) {
    let memory = MemoryDirectory::new()
        .with_container("CN=Users,DC=corp,DC=example")
        .unwrap()
        .with_ad_emulation(DOMAIN_SID)
        .with_unique_constraint("user", "sAMAccountName");
    let memory = Arc::new(memory);
    let mut config = DirectoryConfig::default_config(AD_BASE, SchemaVariant::Ad);
    config.ad.upn_suffix = Some("corp.example".to_string());
    let directory = Directory::new(memory.clone(), &config).unwrap();
    (memory, directory)
}

pub async fn create_posix_group(directory: &Directory, cn: &str, gid: u32) -> Group {
    let mut group = directory.new_group().unwrap();
    group.set_cn(cn).unwrap();
    group.set_gid_number(gid).unwrap();
    group.create().await.unwrap();
    group
}

pub async fn create_posix_user(directory: &Directory, uid: &str, primary: &Group) -> User {
    let mut user = directory.new_user().unwrap();
    user.set_uid(uid).unwrap();
    user.set_primary_group(primary).unwrap();
    user.create().await.unwrap();
    user
}

pub async fn create_ad_group(directory: &Directory, cn: &str) -> Group {
    let mut group = directory.new_group().unwrap();
    group.set_cn(cn).unwrap();
    group.create().await.unwrap();
    group
}

pub async fn create_ad_user(directory: &Directory, sam: &str, primary: &Group) -> User {
    let mut user = directory.new_user().unwrap();
    user.set_sam_account_name(sam).unwrap();
    user.set_primary_group(primary).unwrap();
    user.create().await.unwrap();
    user
}

pub fn names(groups: &[Group]) -> Vec<String> {
    let mut names: Vec<String> = groups
        .iter()
        .filter_map(|g| g.cn().unwrap())
        .collect();
    names.sort();
    names
}
