//! Entry point tying configuration, schemas, transport and passwords together.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DirectoryConfig;
use crate::dn::Dn;
use crate::entity::{Group, User};
use crate::error::{AppError, AppResult};
use crate::executor::BatchExecutor;
use crate::filter::Filter;
use crate::models::{DirectoryEntry, SchemaVariant};
use crate::password::PasswordManager;
use crate::planner::{Plan, PlannerSettings};
use crate::relationship::{resolver_for, RelationshipResolver};
use crate::schema::{attr, SchemaRegistry};
use crate::transport::{DirectoryTransport, Scope};

/// Cheap to clone; every entity carries one.
#[derive(Clone)]
pub struct Directory {
    transport: Arc<dyn DirectoryTransport>,
    registry: Arc<SchemaRegistry>,
    passwords: Arc<PasswordManager>,
    settings: Arc<PlannerSettings>,
}

impl Directory {
    pub fn new(transport: Arc<dyn DirectoryTransport>, config: &DirectoryConfig) -> AppResult<Self> {
        config.validate()?;
        let registry = SchemaRegistry::from_config(config)?;
        let passwords = PasswordManager::new(config.password_algorithm())
            .with_strength_policy(config.password.enforce_strength);
        info!(
            variant = ?config.variant,
            users = %config.users.base,
            groups = %config.groups.base,
            password = %passwords.current_algorithm(),
            "Directory initialized"
        );
        Ok(Self {
            transport,
            registry: Arc::new(registry),
            passwords: Arc::new(passwords),
            settings: Arc::new(PlannerSettings::from_config(config)),
        })
    }

    pub fn variant(&self) -> SchemaVariant {
        self.registry.variant()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn passwords(&self) -> &PasswordManager {
        &self.passwords
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn DirectoryTransport> {
        &self.transport
    }

    pub fn relationships(&self) -> AppResult<Box<dyn RelationshipResolver>> {
        resolver_for(self.transport.clone(), &self.registry)
    }

    pub fn new_user(&self) -> AppResult<User> {
        User::new(self.clone())
    }

    pub fn new_group(&self) -> AppResult<Group> {
        Group::new(self.clone())
    }

    /// User by its login name (`uid` or `sAMAccountName`).
    pub async fn find_user(&self, name: &str) -> AppResult<Option<User>> {
        let mut user = self.new_user()?;
        let key = self.login_attribute();
        user.set(key, name)?;
        Ok(if user.read().await? { Some(user) } else { None })
    }

    /// Group by `cn`.
    pub async fn find_group(&self, name: &str) -> AppResult<Option<Group>> {
        let mut group = self.new_group()?;
        group.set(attr::CN, name)?;
        Ok(if group.read().await? { Some(group) } else { None })
    }

    fn login_attribute(&self) -> &'static str {
        match self.variant() {
            SchemaVariant::Posix => attr::UID,
            SchemaVariant::Ad => attr::SAM_ACCOUNT_NAME,
        }
    }

    /// Users matching `filter` below the user base.
    pub async fn search_users(&self, filter: Filter) -> AppResult<Vec<User>> {
        let schema = self.registry.users()?;
        let found = self
            .search(&schema.base, &schema.type_filter(filter), &schema.readable_attributes())
            .await?;
        found.into_iter().map(|entry| User::from_entry(self.clone(), entry)).collect()
    }

    /// Groups matching `filter` below the group base.
    pub async fn search_groups(&self, filter: Filter) -> AppResult<Vec<Group>> {
        let schema = self.registry.groups()?;
        let found = self
            .search(&schema.base, &schema.type_filter(filter), &schema.readable_attributes())
            .await?;
        found.into_iter().map(|entry| Group::from_entry(self.clone(), entry)).collect()
    }

    /// POSIX groups still parked on the rename sentinel gid, left behind by
    /// a rename that did not finish.
    pub async fn interrupted_renames(&self) -> AppResult<Vec<Group>> {
        if self.variant() != SchemaVariant::Posix {
            return Ok(Vec::new());
        }
        let sentinel = self.settings.rename_sentinel_gid.to_string();
        self.search_groups(Filter::eq(attr::GID_NUMBER, sentinel)).await
    }

    pub(crate) async fn search(
        &self,
        base: &Dn,
        filter: &Filter,
        attributes: &[String],
    ) -> AppResult<Vec<DirectoryEntry>> {
        let found = self
            .transport
            .search(base, Scope::Subtree, filter, attributes)
            .await?;
        debug!(base = %base, filter = %filter, count = found.len(), "Subtree search");
        Ok(found)
    }

    pub(crate) async fn exists(&self, dn: &Dn) -> AppResult<bool> {
        match self
            .transport
            .search(dn, Scope::Base, &Filter::any(), &["1.1".to_string()])
            .await
        {
            Ok(found) => Ok(!found.is_empty()),
            Err(e) if e.is_no_such_object() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Highest `uidNumber` under the user base plus one, never below the
    /// configured floor.
    pub(crate) async fn next_uid_number(&self) -> AppResult<u32> {
        let schema = self.registry.users()?;
        let found = self
            .search(
                &schema.base,
                &schema.type_filter(Filter::present(attr::UID_NUMBER)),
                &[attr::UID_NUMBER.to_string()],
            )
            .await?;
        let highest = found
            .iter()
            .filter_map(|entry| entry.get_str(attr::UID_NUMBER))
            .filter_map(|value| value.parse::<u32>().ok())
            .max();
        let next = match highest {
            Some(n) => n.checked_add(1).ok_or_else(|| {
                AppError::Planning("uidNumber space is exhausted".to_string())
            })?,
            None => 0,
        };
        Ok(next.max(self.settings.first_uid_number))
    }

    pub async fn execute(&self, plan: &Plan) -> AppResult<()> {
        BatchExecutor::new(self.transport.as_ref()).execute(plan).await
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("variant", &self.registry.variant())
            .field("passwords", &self.passwords)
            .finish()
    }
}
