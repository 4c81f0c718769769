//! In-memory directory records.
//!
//! An [`Entity`] holds the attribute values of one user or group together
//! with the entry it was last synchronized with. Writes go through the
//! [`ChangeLedger`] once the entity is bound; before that they are pending
//! and get reconciled against the baseline by the first successful read.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::directory::Directory;
use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::{AttrValue, DirectoryEntry, EntityKind, EntityType};
use crate::planner::{self, Operation, Plan, PlanContext, PlanInput};
use crate::schema::EntitySchema;

/// Generates typed getters and setters over [`Entity::get_str`] and
/// [`Entity::set`] for a list of schema attributes.
macro_rules! attribute_accessors {
    ($($(#[$meta:meta])* $getter:ident, $setter:ident => $name:expr;)+) => {
        $(
            $(#[$meta])*
            pub fn $getter(&self) -> $crate::error::AppResult<Option<String>> {
                self.entity.get_str($name)
            }

            pub fn $setter(
                &mut self,
                value: impl Into<$crate::models::AttrValue>,
            ) -> $crate::error::AppResult<()> {
                self.entity.set($name, value)
            }
        )+
    };
}
pub(crate) use attribute_accessors;

pub mod change_ledger;
pub mod group;
pub mod user;

pub use change_ledger::{Change, ChangeLedger};
pub use group::Group;
pub use user::User;

pub struct Entity {
    directory: Directory,
    schema: Arc<EntitySchema>,
    peer: Arc<EntitySchema>,
    bound: Option<DirectoryEntry>,
    /// Current values keyed by canonical attribute name.
    values: BTreeMap<String, AttrValue>,
    ledger: ChangeLedger,
    deleted: bool,
}

impl Entity {
    pub(crate) fn new(directory: Directory, kind: EntityKind) -> AppResult<Self> {
        let (schema, peer) = match kind {
            EntityKind::User => (directory.registry().users()?, directory.registry().groups()?),
            EntityKind::Group => (directory.registry().groups()?, directory.registry().users()?),
        };
        Ok(Self {
            directory,
            schema,
            peer,
            bound: None,
            values: BTreeMap::new(),
            ledger: ChangeLedger::new(),
            deleted: false,
        })
    }

    /// An entity bound to an entry found by a search.
    pub(crate) fn from_entry(directory: Directory, kind: EntityKind, entry: DirectoryEntry) -> AppResult<Self> {
        let mut entity = Self::new(directory, kind)?;
        entity.bind(entry, false);
        Ok(entity)
    }

    pub fn entity_type(&self) -> EntityType {
        self.schema.entity_type
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    pub(crate) fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Path of the bound entry.
    pub fn dn(&self) -> Option<&Dn> {
        self.bound.as_ref().map(|entry| &entry.dn)
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Entry as last synchronized with the directory.
    pub fn bound_entry(&self) -> Option<&DirectoryEntry> {
        self.bound.as_ref()
    }

    pub fn changes(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn is_dirty(&self) -> bool {
        !self.ledger.is_empty()
    }

    fn ensure_live(&self) -> AppResult<()> {
        if self.deleted {
            return Err(AppError::Validation(format!(
                "{} has been deleted",
                self.schema.entity_type
            )));
        }
        Ok(())
    }

    pub(crate) fn ensure_bound(&self) -> AppResult<&DirectoryEntry> {
        self.ensure_live()?;
        self.bound.as_ref().ok_or_else(|| {
            AppError::Validation(format!(
                "{} has not been read from the directory",
                self.schema.entity_type
            ))
        })
    }

    pub fn get(&self, name: &str) -> AppResult<Option<AttrValue>> {
        self.ensure_live()?;
        let name = self.schema.resolve(name)?;
        Ok(self.values.get(name).cloned())
    }

    /// First text value of an attribute.
    pub fn get_str(&self, name: &str) -> AppResult<Option<String>> {
        Ok(self
            .get(name)?
            .and_then(|value| value.texts().into_iter().next()))
    }

    pub fn get_all(&self, name: &str) -> AppResult<Vec<String>> {
        Ok(self.get(name)?.map(|value| value.texts()).unwrap_or_default())
    }

    pub fn set(&mut self, name: &str, value: impl Into<AttrValue>) -> AppResult<()> {
        self.write(name, Some(value.into()))
    }

    pub fn unset(&mut self, name: &str) -> AppResult<()> {
        self.write(name, None)
    }

    fn write(&mut self, name: &str, value: Option<AttrValue>) -> AppResult<()> {
        self.ensure_live()?;
        let name = self.schema.resolve(name)?.to_string();
        let new = value.filter(|v| !v.is_empty());
        let old = match &new {
            Some(value) => self.values.insert(name.clone(), value.clone()),
            None => self.values.remove(&name),
        };
        if self.bound.is_some() {
            self.ledger.record(&name, old, new);
        }
        Ok(())
    }

    /// First text value without name validation, for internal lookups.
    pub(crate) fn text(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.texts().into_iter().next())
    }

    /// `(&(objectClass=<structural>)(<first unique attribute>=<value>))`
    fn lookup_filter(&self, values: &BTreeMap<String, AttrValue>) -> AppResult<Filter> {
        for name in &self.schema.unique_attributes {
            let value = values
                .get(name)
                .and_then(|v| v.texts().into_iter().next());
            if let Some(value) = value {
                return Ok(self.schema.type_filter(Filter::eq(name.clone(), value)));
            }
        }
        Err(AppError::Validation(format!(
            "{} needs one of {} to be set",
            self.schema.entity_type,
            self.schema.unique_attributes.join(", ")
        )))
    }

    async fn fetch(&self, filter: Filter) -> AppResult<Option<DirectoryEntry>> {
        let mut found = self
            .directory
            .search(&self.schema.base, &filter, &self.schema.readable_attributes())
            .await?;
        if found.len() > 1 {
            let paths: Vec<String> = found.iter().map(|e| e.dn.to_string()).collect();
            return Err(AppError::Integrity(format!(
                "{} matches {} entries: {}",
                filter,
                found.len(),
                paths.join("; ")
            )));
        }
        Ok(found.pop())
    }

    /// Load the entity from the directory by its first defined unique
    /// attribute. Returns `false` when no entry matches.
    pub async fn read(&mut self) -> AppResult<bool> {
        self.ensure_live()?;
        let filter = match &self.bound {
            Some(entry) => self.lookup_filter(&baseline(&self.schema, entry))?,
            None => self.lookup_filter(&self.values)?,
        };
        match self.fetch(filter).await? {
            Some(entry) => {
                self.bind(entry, true);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Adopt `entry` as the synchronized baseline. Pending values of an
    /// unbound entity are kept as changes against it when `keep_pending`.
    pub(crate) fn bind(&mut self, entry: DirectoryEntry, keep_pending: bool) {
        let pending = if keep_pending && self.bound.is_none() {
            std::mem::take(&mut self.values)
        } else {
            BTreeMap::new()
        };
        self.values = baseline(&self.schema, &entry);
        self.ledger.clear();
        self.bound = Some(entry);

        for (name, value) in pending {
            let old = self.values.get(&name).cloned();
            if old.as_ref() != Some(&value) {
                self.values.insert(name.clone(), value.clone());
                self.ledger.record(&name, old, Some(value));
            }
        }
    }

    /// Drop unsaved changes.
    pub fn discard_changes(&mut self) {
        if let Some(entry) = &self.bound {
            self.values = baseline(&self.schema, entry);
        }
        self.ledger.clear();
    }

    pub(crate) fn plan(&self, operation: Operation, context: &PlanContext) -> AppResult<Plan> {
        self.ensure_live()?;
        let input = PlanInput {
            schema: &self.schema,
            peer: &self.peer,
            settings: self.directory.settings(),
            bound: self.bound.as_ref(),
            values: &self.values,
            changes: &self.ledger,
            context,
        };
        planner::plan(operation, &input)
    }

    /// Plan, execute and resynchronize.
    pub(crate) async fn commit(&mut self, operation: Operation, context: &PlanContext) -> AppResult<()> {
        let plan = self.plan(operation, context)?;
        if plan.is_empty() {
            debug!(entity_type = %self.schema.entity_type, "Nothing to write");
            self.discard_changes();
            return Ok(());
        }
        debug!(entity_type = %self.schema.entity_type, plan = %plan.to_json(), "Executing plan");
        self.directory.execute(&plan).await?;

        match operation {
            Operation::Create | Operation::Update => {
                let filter = self.lookup_filter(&self.values)?;
                let entry = self.fetch(filter.clone()).await?.ok_or_else(|| {
                    AppError::Reconciliation(format!(
                        "{} written but not found again with {}",
                        self.schema.entity_type, filter
                    ))
                })?;
                info!(entity_type = %self.schema.entity_type, dn = %entry.dn, ?operation, "Entity synchronized");
                self.bind(entry, false);
            }
            Operation::Delete => {
                info!(entity_type = %self.schema.entity_type, dn = ?self.dn().map(Dn::to_string), "Entity deleted");
                self.bound = None;
                self.values.clear();
                self.ledger.clear();
                self.deleted = true;
            }
        }
        Ok(())
    }
}

/// Schema attributes of an entry, keyed by canonical name.
fn baseline(schema: &EntitySchema, entry: &DirectoryEntry) -> BTreeMap<String, AttrValue> {
    let mut values = BTreeMap::new();
    for (name, raw) in &entry.attrs {
        let Ok(canonical) = schema.resolve(name) else {
            continue;
        };
        if let Some(value) = AttrValue::from_raw(raw) {
            values.insert(canonical.to_string(), value);
        }
    }
    values
}

/// Same type and the same value for the first unique attribute both define.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        if self.entity_type() != other.entity_type() {
            return false;
        }
        for name in &self.schema.unique_attributes {
            if let (Some(a), Some(b)) = (self.values.get(name), other.values.get(name)) {
                let (a, b) = (a.texts(), b.texts());
                return a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_ignore_ascii_case(y));
            }
        }
        false
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.schema.entity_type)
            .field("dn", &self.dn().map(Dn::to_string))
            .field("dirty", &self.ledger.dirty_attributes())
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dn(), self.text(&self.schema.rdn_attribute)) {
            (Some(dn), _) => write!(f, "{}", dn),
            (None, Some(name)) => write!(f, "{} {} (unsaved)", self.schema.entity_type, name),
            (None, None) => write!(f, "{} (unsaved)", self.schema.entity_type),
        }
    }
}
