use std::ops::{Deref, DerefMut};

use tracing::debug;

use super::{attribute_accessors, Entity, Group};
use crate::directory::Directory;
use crate::error::{AppError, AppResult};
use crate::models::{DirectoryEntry, EntityKind, SchemaVariant};
use crate::planner::{Operation, Plan, PlanContext};
use crate::relationship::RelationshipResolver;
use crate::schema::attr;

/// A user account with its primary and secondary group relationships.
#[derive(Debug)]
pub struct User {
    entity: Entity,
    /// Group handed to `set_primary_group`, saving a lookup at planning time.
    primary_hint: Option<DirectoryEntry>,
    /// Secondary groups replacing the current set on the next write.
    staged_groups: Option<Vec<DirectoryEntry>>,
}

impl User {
    pub(crate) fn new(directory: Directory) -> AppResult<Self> {
        Ok(Self::wrap(Entity::new(directory, EntityKind::User)?))
    }

    pub(crate) fn from_entry(directory: Directory, entry: DirectoryEntry) -> AppResult<Self> {
        Ok(Self::wrap(Entity::from_entry(directory, EntityKind::User, entry)?))
    }

    fn wrap(entity: Entity) -> Self {
        Self {
            entity,
            primary_hint: None,
            staged_groups: None,
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
        /// POSIX login name.
        uid, set_uid => attr::UID;
        uid_number, set_uid_number => attr::UID_NUMBER;
        gid_number, set_gid_number => attr::GID_NUMBER;
        sn, set_sn => attr::SN;
        home_directory, set_home_directory => attr::HOME_DIRECTORY;
        login_shell, set_login_shell => attr::LOGIN_SHELL;
    }

    attribute_accessors! {
        /// Active Directory login name.
        sam_account_name, set_sam_account_name => attr::SAM_ACCOUNT_NAME;
        user_principal_name, set_user_principal_name => attr::USER_PRINCIPAL_NAME;
        primary_group_id, set_primary_group_id => attr::PRIMARY_GROUP_ID;
        user_account_control, set_user_account_control => attr::USER_ACCOUNT_CONTROL;
    }

    /// Hash `password` with the directory's strategy and stage it on the
    /// write-only password attribute.
    pub fn set_password(&mut self, password: &str) -> AppResult<()> {
        let value = self
            .entity
            .directory()
            .passwords()
            .hash_password(password)?;
        let attribute = match self.entity.directory().variant() {
            SchemaVariant::Posix => attr::USER_PASSWORD,
            SchemaVariant::Ad => attr::UNICODE_PWD,
        };
        self.entity.set(attribute, value)
    }

    /// Point the user at `group` as its primary group.
    pub fn set_primary_group(&mut self, group: &Group) -> AppResult<()> {
        let entry = group.ensure_bound()?.clone();
        let resolver = self.entity.directory().relationships()?;
        let reference = resolver.primary_reference(&entry)?;
        self.entity.set(resolver.primary_attribute(), reference)?;
        self.primary_hint = Some(entry);
        Ok(())
    }

    /// The group the primary reference currently points at, pending changes included.
    pub async fn primary_group(&self) -> AppResult<Option<Group>> {
        let resolver = self.entity.directory().relationships()?;
        let found = self.resolve_primary(resolver.as_ref()).await?;
        found
            .map(|entry| Group::from_entry(self.entity.directory().clone(), entry))
            .transpose()
    }

    /// Secondary groups: the staged list if there is one, else what the
    /// directory records.
    pub async fn groups(&self) -> AppResult<Vec<Group>> {
        let directory = self.entity.directory();
        let entries = match (&self.staged_groups, self.entity.bound_entry()) {
            (Some(staged), _) => staged.clone(),
            (None, Some(bound)) => directory.relationships()?.secondary_groups(bound).await?,
            (None, None) => Vec::new(),
        };
        entries
            .into_iter()
            .map(|entry| Group::from_entry(directory.clone(), entry))
            .collect()
    }

    /// Replace the secondary group set on the next create or update.
    pub fn set_groups(&mut self, groups: &[&Group]) -> AppResult<()> {
        let mut entries: Vec<DirectoryEntry> = Vec::with_capacity(groups.len());
        for group in groups {
            let entry = group.ensure_bound()?;
            if !entries.iter().any(|e| e.dn == entry.dn) {
                entries.push(entry.clone());
            }
        }
        self.staged_groups = Some(entries);
        Ok(())
    }

    pub fn has_staged_groups(&self) -> bool {
        self.staged_groups.is_some()
    }

    async fn resolve_primary(
        &self,
        resolver: &dyn RelationshipResolver,
    ) -> AppResult<Option<DirectoryEntry>> {
        let Some(reference) = self.entity.text(resolver.primary_attribute()) else {
            // POSIX users may be created from the hint alone; the planner
            // copies its gidNumber.
            return Ok(self.primary_hint.clone());
        };
        if let Some(hint) = &self.primary_hint {
            if resolver.primary_reference(hint).is_ok_and(|r| r == reference) {
                return Ok(Some(hint.clone()));
            }
        }
        resolver
            .group_by_reference(&reference, self.entity.bound_entry())
            .await
    }

    async fn context(&self, operation: Operation) -> AppResult<PlanContext> {
        let directory = self.entity.directory();
        let resolver = directory.relationships()?;
        let mut context = PlanContext {
            staged_groups: self.staged_groups.clone(),
            ..PlanContext::default()
        };

        match operation {
            Operation::Create => {
                context.primary_group = self.resolve_primary(resolver.as_ref()).await?;
                if directory.variant() == SchemaVariant::Posix
                    && self.entity.text(attr::UID_NUMBER).is_none()
                {
                    context.next_uid_number = Some(directory.next_uid_number().await?);
                }
            }
            Operation::Update => {
                let bound = self.entity.ensure_bound()?;
                if self.entity.changes().contains(resolver.primary_attribute()) {
                    context.primary_group = self.resolve_primary(resolver.as_ref()).await?;
                }
                context.secondary_groups = resolver.secondary_groups(bound).await?;
            }
            Operation::Delete => {
                let bound = self.entity.ensure_bound()?;
                context.secondary_groups = resolver.secondary_groups(bound).await?;
            }
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
        self.reset_relationships();
        Ok(())
    }

    pub async fn update(&mut self) -> AppResult<()> {
        self.entity.ensure_bound()?;
        if !self.entity.is_dirty() && self.staged_groups.is_none() {
            debug!(user = %self.entity, "No changes to write");
            return Ok(());
        }
        let context = self.context(Operation::Update).await?;
        self.entity.commit(Operation::Update, &context).await?;
        self.reset_relationships();
        Ok(())
    }

    pub async fn delete(&mut self) -> AppResult<()> {
        let context = self.context(Operation::Delete).await?;
        self.entity.commit(Operation::Delete, &context).await?;
        self.reset_relationships();
        Ok(())
    }

    fn reset_relationships(&mut self) {
        self.primary_hint = None;
        self.staged_groups = None;
    }
}

impl Deref for User {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}
