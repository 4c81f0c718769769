//! Directory schema knowledge
//!
//! This module centralizes the static attribute metadata of the four entity
//! types (POSIX and Active Directory users and groups). Any schema
//! customization beyond extra attributes should be done here.

use lazy_static::lazy_static;

use crate::models::{EntityKind, EntityType, SchemaVariant};

/// RFC 2307 / AD attribute and object class names used by the planners.
pub mod attr {
    pub const OBJECT_CLASS: &str = "objectClass";
    pub const CN: &str = "cn";
    pub const SN: &str = "sn";
    pub const OU: &str = "ou";
    pub const DESCRIPTION: &str = "description";

    pub const UID: &str = "uid";
    pub const UID_NUMBER: &str = "uidNumber";
    pub const GID_NUMBER: &str = "gidNumber";
    pub const HOME_DIRECTORY: &str = "homeDirectory";
    pub const LOGIN_SHELL: &str = "loginShell";
    pub const USER_PASSWORD: &str = "userPassword";
    pub const MEMBER_UID: &str = "memberUid";

    pub const SAM_ACCOUNT_NAME: &str = "sAMAccountName";
    pub const USER_PRINCIPAL_NAME: &str = "userPrincipalName";
    pub const PRIMARY_GROUP_ID: &str = "primaryGroupID";
    pub const PRIMARY_GROUP_TOKEN: &str = "primaryGroupToken";
    pub const OBJECT_SID: &str = "objectSid";
    pub const OBJECT_GUID: &str = "objectGUID";
    pub const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
    pub const UNICODE_PWD: &str = "unicodePwd";
    pub const GROUP_TYPE: &str = "groupType";
    pub const MEMBER: &str = "member";
    pub const MEMBER_OF: &str = "memberOf";
}

/// userAccountControl flags used when provisioning AD accounts.
pub mod account_control {
    pub const ACCOUNTDISABLE: u32 = 0x0002;
    pub const NORMAL_ACCOUNT: u32 = 0x0200;
    pub const DISABLED_ACCOUNT: u32 = NORMAL_ACCOUNT | ACCOUNTDISABLE;
}

/// Global security group (`ADS_GROUP_TYPE_GLOBAL_GROUP | ADS_GROUP_TYPE_SECURITY_ENABLED`).
pub const AD_GLOBAL_SECURITY_GROUP: i64 = -2147483646;

/// Mutability of attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Computed by the directory server; never written by the planner.
    ReadOnly,
    ReadWrite,
    /// Accepted on write, never returned by a search (passwords).
    WriteOnly,
}

/// Complete attribute definition
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    pub name: &'static str,
    pub multi_valued: bool,
    pub mutability: Mutability,
    pub description: &'static str,
}

/// Static description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub entity_type: EntityType,
    pub object_classes: &'static [&'static str],
    /// Attribute embedded in the leaf RDN of the entry's path.
    pub rdn_attribute: &'static str,
    /// Lookup keys, in preference order.
    pub unique_attributes: &'static [&'static str],
    /// Attribute on a group listing its secondary members.
    pub membership_attribute: Option<&'static str>,
    pub attributes: Vec<AttributeDefinition>,
}

const fn rw(name: &'static str, description: &'static str) -> AttributeDefinition {
    AttributeDefinition {
        name,
        multi_valued: false,
        mutability: Mutability::ReadWrite,
        description,
    }
}

const fn multi(name: &'static str, description: &'static str) -> AttributeDefinition {
    AttributeDefinition {
        name,
        multi_valued: true,
        mutability: Mutability::ReadWrite,
        description,
    }
}

const fn ro(name: &'static str, description: &'static str) -> AttributeDefinition {
    AttributeDefinition {
        name,
        multi_valued: false,
        mutability: Mutability::ReadOnly,
        description,
    }
}

const fn wo(name: &'static str, description: &'static str) -> AttributeDefinition {
    AttributeDefinition {
        name,
        multi_valued: false,
        mutability: Mutability::WriteOnly,
        description,
    }
}

lazy_static! {
    pub static ref POSIX_USER: EntityDefinition = EntityDefinition {
        entity_type: EntityType::new(EntityKind::User, SchemaVariant::Posix),
        object_classes: &[
            "top",
            "person",
            "organizationalPerson",
            "inetOrgPerson",
            "posixAccount",
            "shadowAccount",
        ],
        rdn_attribute: attr::UID,
        unique_attributes: &[attr::UID, attr::UID_NUMBER],
        membership_attribute: None,
        attributes: vec![
            rw(attr::UID, "Login name"),
            rw(attr::UID_NUMBER, "Numeric user id"),
            rw(attr::GID_NUMBER, "Numeric id of the primary group"),
            rw(attr::CN, "Common name"),
            rw(attr::SN, "Surname"),
            rw("givenName", "Given name"),
            rw("gecos", "GECOS field"),
            multi("mail", "Mail addresses"),
            rw(attr::HOME_DIRECTORY, "Home directory"),
            rw(attr::LOGIN_SHELL, "Login shell"),
            rw(attr::DESCRIPTION, "Free form description"),
            wo(attr::USER_PASSWORD, "Hashed password"),
            ro("createTimestamp", "Creation time"),
            ro("modifyTimestamp", "Last modification time"),
            ro("entryUUID", "Server assigned identifier"),
        ],
    };

    pub static ref POSIX_GROUP: EntityDefinition = EntityDefinition {
        entity_type: EntityType::new(EntityKind::Group, SchemaVariant::Posix),
        object_classes: &["top", "posixGroup"],
        rdn_attribute: attr::CN,
        unique_attributes: &[attr::CN, attr::GID_NUMBER],
        membership_attribute: Some(attr::MEMBER_UID),
        attributes: vec![
            rw(attr::CN, "Group name"),
            rw(attr::GID_NUMBER, "Numeric group id"),
            rw(attr::DESCRIPTION, "Free form description"),
            multi(attr::MEMBER_UID, "Login names of secondary members"),
            ro("createTimestamp", "Creation time"),
            ro("modifyTimestamp", "Last modification time"),
            ro("entryUUID", "Server assigned identifier"),
        ],
    };

    pub static ref AD_USER: EntityDefinition = EntityDefinition {
        entity_type: EntityType::new(EntityKind::User, SchemaVariant::Ad),
        object_classes: &["top", "person", "organizationalPerson", "user"],
        rdn_attribute: attr::CN,
        unique_attributes: &[attr::SAM_ACCOUNT_NAME, attr::OBJECT_SID],
        membership_attribute: None,
        attributes: vec![
            rw(attr::SAM_ACCOUNT_NAME, "Pre-Windows 2000 logon name"),
            rw(attr::CN, "Common name"),
            rw(attr::SN, "Surname"),
            rw("givenName", "Given name"),
            rw("displayName", "Display name"),
            rw("mail", "Mail address"),
            rw(attr::USER_PRINCIPAL_NAME, "UPN logon name"),
            rw(attr::DESCRIPTION, "Free form description"),
            rw(attr::PRIMARY_GROUP_ID, "RID of the primary group"),
            rw(attr::USER_ACCOUNT_CONTROL, "Account flags"),
            wo(attr::UNICODE_PWD, "Password, quoted UTF-16LE"),
            ro(attr::OBJECT_SID, "Security identifier"),
            ro(attr::OBJECT_GUID, "Object GUID"),
            AttributeDefinition {
                name: attr::MEMBER_OF,
                multi_valued: true,
                mutability: Mutability::ReadOnly,
                description: "Back-link to groups listing this user",
            },
            ro("distinguishedName", "Entry path"),
            ro("whenCreated", "Creation time"),
            ro("whenChanged", "Last modification time"),
        ],
    };

    pub static ref AD_GROUP: EntityDefinition = EntityDefinition {
        entity_type: EntityType::new(EntityKind::Group, SchemaVariant::Ad),
        object_classes: &["top", "group"],
        rdn_attribute: attr::CN,
        unique_attributes: &[attr::CN, attr::OBJECT_SID],
        membership_attribute: Some(attr::MEMBER),
        attributes: vec![
            rw(attr::CN, "Group name"),
            rw(attr::SAM_ACCOUNT_NAME, "Pre-Windows 2000 group name"),
            rw(attr::DESCRIPTION, "Free form description"),
            rw(attr::GROUP_TYPE, "Scope and security flags"),
            multi(attr::MEMBER, "DNs of secondary members"),
            ro(attr::PRIMARY_GROUP_TOKEN, "RID used as primaryGroupID"),
            ro(attr::OBJECT_SID, "Security identifier"),
            ro(attr::OBJECT_GUID, "Object GUID"),
            AttributeDefinition {
                name: attr::MEMBER_OF,
                multi_valued: true,
                mutability: Mutability::ReadOnly,
                description: "Back-link to groups listing this group",
            },
            ro("distinguishedName", "Entry path"),
            ro("whenCreated", "Creation time"),
            ro("whenChanged", "Last modification time"),
        ],
    };
}

/// Static definition for an entity type.
pub fn definition_for(entity_type: EntityType) -> &'static EntityDefinition {
    match (entity_type.kind, entity_type.variant) {
        (EntityKind::User, SchemaVariant::Posix) => &POSIX_USER,
        (EntityKind::Group, SchemaVariant::Posix) => &POSIX_GROUP,
        (EntityKind::User, SchemaVariant::Ad) => &AD_USER,
        (EntityKind::Group, SchemaVariant::Ad) => &AD_GROUP,
    }
}
