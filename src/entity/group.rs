use std::ops::{Deref, DerefMut};

use tracing::debug;

use super::{attribute_accessors, Entity, User};
use crate::directory::Directory;
use crate::error::{AppError, AppResult};
use crate::models::{AttrValue, DirectoryEntry, EntityKind, SchemaVariant};
use crate::planner::user_plan::same_member;
use crate::planner::{posix, Operation, Plan, PlanContext};
use crate::schema::attr;

/// A group with cached views of its members.
///
/// Member caches are filled on first use and dropped whenever the group
/// is written or its membership list changes.
#[derive(Debug)]
pub struct Group {
    entity: Entity,
    primary_cache: Option<Vec<DirectoryEntry>>,
    secondary_cache: Option<Vec<DirectoryEntry>>,
}

impl Group {
    pub(crate) fn new(directory: Directory) -> AppResult<Self> {
        Ok(Self::wrap(Entity::new(directory, EntityKind::Group)?))
    }

    pub(crate) fn from_entry(directory: Directory, entry: DirectoryEntry) -> AppResult<Self> {
        Ok(Self::wrap(Entity::from_entry(directory, EntityKind::Group, entry)?))
    }

    fn wrap(entity: Entity) -> Self {
        Self {
            entity,
            primary_cache: None,
            secondary_cache: None,
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    attribute_accessors! {
        cn, set_cn => attr::CN;
        description, set_description => attr::DESCRIPTION;
    }

    attribute_accessors! {
        gid_number, set_gid_number => attr::GID_NUMBER;
    }

    attribute_accessors! {
        sam_account_name, set_sam_account_name => attr::SAM_ACCOUNT_NAME;
        group_type, set_group_type => attr::GROUP_TYPE;
    }

    /// Users whose primary group this is.
    pub async fn primary_members(&mut self) -> AppResult<Vec<User>> {
        if self.primary_cache.is_none() {
            let bound = self.entity.ensure_bound()?;
            let found = self
                .entity
                .directory()
                .relationships()?
                .primary_members(bound)
                .await?;
            self.primary_cache = Some(found);
        }
        self.users_from(self.primary_cache.as_deref())
    }

    /// Users listed in the membership attribute, as last synchronized.
    pub async fn secondary_members(&mut self) -> AppResult<Vec<User>> {
        if self.secondary_cache.is_none() {
            let bound = self.entity.ensure_bound()?;
            let found = self
                .entity
                .directory()
                .relationships()?
                .secondary_members(bound)
                .await?;
            self.secondary_cache = Some(found);
        }
        self.users_from(self.secondary_cache.as_deref())
    }

    fn users_from(&self, entries: Option<&[DirectoryEntry]>) -> AppResult<Vec<User>> {
        entries
            .unwrap_or_default()
            .iter()
            .map(|entry| User::from_entry(self.entity.directory().clone(), entry.clone()))
            .collect()
    }

    /// Reload from the directory, dropping cached members.
    pub async fn read(&mut self) -> AppResult<bool> {
        self.clear_member_cache();
        self.entity.read().await
    }

    pub fn clear_member_cache(&mut self) {
        self.primary_cache = None;
        self.secondary_cache = None;
    }

    /// [`Entity::set`] that also drops cached members when it writes the
    /// membership list.
    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) -> AppResult<()> {
        self.entity.set(name, value)?;
        self.membership_written(name);
        Ok(())
    }

    /// [`Entity::unset`] with the same cache rule as [`Group::set`].
    pub fn unset(&mut self, name: &str) -> AppResult<()> {
        self.entity.unset(name)?;
        self.membership_written(name);
        Ok(())
    }

    fn membership_written(&mut self, name: &str) {
        if name.eq_ignore_ascii_case(attr::MEMBER_UID) || name.eq_ignore_ascii_case(attr::MEMBER) {
            self.secondary_cache = None;
        }
    }

    fn membership(&self, user: &User) -> AppResult<(&'static str, String, Vec<String>)> {
        let attribute = match self.entity.directory().variant() {
            SchemaVariant::Posix => attr::MEMBER_UID,
            SchemaVariant::Ad => attr::MEMBER,
        };
        let bound = user.ensure_bound()?;
        let value = self
            .entity
            .directory()
            .relationships()?
            .member_value(bound)
            .ok_or_else(|| {
                AppError::Validation(format!("{} has no value to list as a member", user.entity()))
            })?;
        let current = self.entity.get_all(attribute)?;
        Ok((attribute, value, current))
    }

    /// Stage `user` as a secondary member; written by the next `update`.
    pub fn add_member(&mut self, user: &User) -> AppResult<()> {
        let (attribute, value, mut members) = self.membership(user)?;
        if members.iter().any(|m| same_member(m, &value)) {
            return Err(AppError::AlreadyMember {
                group: self.entity.to_string(),
                member: value,
            });
        }
        members.push(value);
        self.set(attribute, members)
    }

    /// Stage the removal of `user` from the secondary members.
    pub fn remove_member(&mut self, user: &User) -> AppResult<()> {
        let (attribute, value, members) = self.membership(user)?;
        let remaining: Vec<String> = members
            .iter()
            .filter(|m| !same_member(m, &value))
            .cloned()
            .collect();
        if remaining.len() == members.len() {
            return Err(AppError::NotAMember {
                group: self.entity.to_string(),
                member: value,
            });
        }
        self.set(attribute, remaining)
    }

    async fn context(&self, operation: Operation) -> AppResult<PlanContext> {
        let mut context = PlanContext::default();
        if operation == Operation::Create {
            return Ok(context);
        }
        let bound = self.entity.ensure_bound()?;
        let directory = self.entity.directory();
        let resolver = directory.relationships()?;
        let is_posix = directory.variant() == SchemaVariant::Posix;
        let renaming = operation == Operation::Update && self.entity.changes().contains(attr::CN);

        if operation == Operation::Delete || (is_posix && renaming) {
            context.primary_members = resolver.primary_members(bound).await?;
        }
        if operation == Operation::Delete {
            context.secondary_members = resolver.secondary_members(bound).await?;
        }
        if is_posix && (operation == Operation::Delete || renaming) {
            if let Some(cn) = bound.get_str(attr::CN) {
                let users = directory.registry().users()?;
                let container = posix::group_container(&users, &cn);
                if directory.exists(&container).await? {
                    context.auxiliary.push(container);
                }
            }
        }
        if is_posix && renaming {
            context.sentinel_holders = directory
                .interrupted_renames()
                .await?
                .iter()
                .filter_map(|group| group.dn().cloned())
                .collect();
        }
        Ok(context)
    }

    /// The mutations `operation` would perform, without touching the directory.
    pub async fn plan(&self, operation: Operation) -> AppResult<Plan> {
        let context = self.context(operation).await?;
        self.entity.plan(operation, &context)
    }

    pub async fn create(&mut self) -> AppResult<()> {
        if self.entity.is_bound() {
            return Err(AppError::Validation(format!(
                "{} already exists in the directory",
                self.entity
            )));
        }
        let context = self.context(Operation::Create).await?;
        self.entity.commit(Operation::Create, &context).await?;
        self.clear_member_cache();
        Ok(())
    }

    pub async fn update(&mut self) -> AppResult<()> {
        self.entity.ensure_bound()?;
        if !self.entity.is_dirty() {
            debug!(group = %self.entity, "No changes to write");
            return Ok(());
        }
        let context = self.context(Operation::Update).await?;
        self.entity.commit(Operation::Update, &context).await?;
        self.clear_member_cache();
        Ok(())
    }

    pub async fn delete(&mut self) -> AppResult<()> {
        let context = self.context(Operation::Delete).await?;
        self.entity.commit(Operation::Delete, &context).await?;
        self.clear_member_cache();
        Ok(())
    }
}

impl Deref for Group {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

impl DerefMut for Group {
    fn deref_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}
