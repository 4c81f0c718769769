//! Turns an entity's dirty state into an ordered list of directory mutations.
//!
//! Planning is pure: everything the planners need from the directory is
//! fetched up front into a [`PlanContext`], so a plan can be inspected or
//! tested without a transport.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{json, Value};

use crate::config::{DirectoryConfig, PosixConfig};
use crate::dn::Dn;
use crate::entity::change_ledger::{Change, ChangeLedger};
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::{AttrValue, Attributes, DirectoryEntry, EntityKind, SchemaVariant};
use crate::schema::{attr, EntitySchema};
use crate::transport::Replacement;

pub mod ad;
pub mod group_plan;
pub mod posix;
pub mod user_plan;

pub use group_plan::{GroupPlanProcessor, GroupPlanner, UnifiedGroupPlan};
pub use user_plan::{UnifiedUserPlan, UserPlanProcessor, UserPlanner};

/// Where an action applies: one entry, or every entry a search returns at
/// execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Path(Dn),
    Search { base: Dn, filter: Filter },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Path(dn) => write!(f, "{}", dn),
            Target::Search { base, filter } => write!(f, "each {} under {}", filter, base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Add {
        dn: Dn,
        attributes: Attributes,
    },
    Delete(Target),
    Update {
        target: Target,
        replacements: Vec<Replacement>,
        /// Attributes whose previous value cannot be read back for rollback.
        write_only: Vec<String>,
    },
    Move {
        from: Dn,
        to: Dn,
    },
}

impl Action {
    pub fn delete(dn: Dn) -> Self {
        Action::Delete(Target::Path(dn))
    }

    pub fn update(dn: Dn, replacements: Vec<Replacement>) -> Self {
        Action::Update {
            target: Target::Path(dn),
            replacements,
            write_only: Vec::new(),
        }
    }

    pub fn update_each(base: Dn, filter: Filter, replacements: Vec<Replacement>) -> Self {
        Action::Update {
            target: Target::Search { base, filter },
            replacements,
            write_only: Vec::new(),
        }
    }

    /// Entry the action names directly, if any.
    pub fn dn(&self) -> Option<&Dn> {
        match self {
            Action::Add { dn, .. } => Some(dn),
            Action::Delete(Target::Path(dn)) => Some(dn),
            Action::Update {
                target: Target::Path(dn),
                ..
            } => Some(dn),
            Action::Move { from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Add { .. } => "add",
            Action::Delete(_) => "delete",
            Action::Update { .. } => "update",
            Action::Move { .. } => "move",
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Action::Add { dn, attributes } => json!({
                "action": "add",
                "dn": dn.to_string(),
                "attributes": attributes
                    .iter()
                    .map(|(name, values)| (name.clone(), render_values(name, Some(values))))
                    .collect::<serde_json::Map<String, Value>>(),
            }),
            Action::Delete(target) => json!({
                "action": "delete",
                "target": target_json(target),
            }),
            Action::Update {
                target,
                replacements,
                ..
            } => json!({
                "action": "update",
                "target": target_json(target),
                "replace": replacements
                    .iter()
                    .map(|r| (r.attribute.clone(), render_values(&r.attribute, r.values.as_ref())))
                    .collect::<serde_json::Map<String, Value>>(),
            }),
            Action::Move { from, to } => json!({
                "action": "move",
                "from": from.to_string(),
                "to": to.to_string(),
            }),
        }
    }
}

fn target_json(target: &Target) -> Value {
    match target {
        Target::Path(dn) => json!({ "dn": dn.to_string() }),
        Target::Search { base, filter } => json!({
            "base": base.to_string(),
            "filter": filter.to_string(),
        }),
    }
}

fn render_values(name: &str, values: Option<&Vec<Vec<u8>>>) -> Value {
    let Some(values) = values else {
        return Value::Null;
    };
    let secret = name.eq_ignore_ascii_case(attr::USER_PASSWORD)
        || name.eq_ignore_ascii_case(attr::UNICODE_PWD);
    values
        .iter()
        .map(|v| {
            if secret {
                Value::String("********".to_string())
            } else {
                match std::str::from_utf8(v) {
                    Ok(text) => Value::String(text.to_string()),
                    Err(_) => Value::String(format!("<{} bytes>", v.len())),
                }
            }
        })
        .collect()
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add { dn, .. } => write!(f, "add {}", dn),
            Action::Delete(target) => write!(f, "delete {}", target),
            Action::Update {
                target,
                replacements,
                ..
            } => {
                let names: Vec<String> = replacements.iter().map(|r| r.to_string()).collect();
                write!(f, "update {} ({})", target, names.join(", "))
            }
            Action::Move { from, to } => write!(f, "move {} -> {}", from, to),
        }
    }
}

/// An ordered batch of actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn extend(&mut self, other: Plan) {
        self.actions.extend(other.actions);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Position of the first action matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Action) -> bool) -> Option<usize> {
        self.actions.iter().position(predicate)
    }

    /// JSON rendering for logs and dry runs. Password values are masked.
    pub fn to_json(&self) -> Value {
        Value::Array(self.actions.iter().map(Action::to_json).collect())
    }
}

impl From<Vec<Action>> for Plan {
    fn from(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Site settings the planners consult.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub rename_sentinel_gid: u32,
    pub first_uid_number: u32,
    pub login_shell: String,
    pub home_root: String,
    pub upn_suffix: Option<String>,
}

impl PlannerSettings {
    pub fn from_config(config: &DirectoryConfig) -> Self {
        Self {
            rename_sentinel_gid: config.posix.rename_sentinel_gid,
            first_uid_number: config.posix.first_uid_number,
            login_shell: config.posix.login_shell.clone(),
            home_root: config.posix.home_root.clone(),
            upn_suffix: config.ad.upn_suffix.clone(),
        }
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        let posix = PosixConfig::default();
        Self {
            rename_sentinel_gid: posix.rename_sentinel_gid,
            first_uid_number: posix.first_uid_number,
            login_shell: posix.login_shell,
            home_root: posix.home_root,
            upn_suffix: None,
        }
    }
}

/// Directory state a plan depends on, fetched before planning.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// User: the primary group the user has (or is moving to).
    pub primary_group: Option<DirectoryEntry>,
    /// User: groups currently listing the user as a secondary member.
    pub secondary_groups: Vec<DirectoryEntry>,
    /// User: replacement secondary group list staged on the entity.
    pub staged_groups: Option<Vec<DirectoryEntry>>,
    /// Group: users whose primary group this is.
    pub primary_members: Vec<DirectoryEntry>,
    /// Group: users listed as secondary members.
    pub secondary_members: Vec<DirectoryEntry>,
    /// Group: auxiliary entries that exist for the group.
    pub auxiliary: Vec<Dn>,
    /// POSIX group: groups currently parked on the rename sentinel gid.
    pub sentinel_holders: Vec<Dn>,
    /// POSIX user: next free uidNumber.
    pub next_uid_number: Option<u32>,
}

/// Everything a planner reads.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub schema: &'a EntitySchema,
    /// Schema of the other entity kind (groups for a user, users for a group).
    pub peer: &'a EntitySchema,
    pub settings: &'a PlannerSettings,
    pub bound: Option<&'a DirectoryEntry>,
    pub values: &'a BTreeMap<String, AttrValue>,
    pub changes: &'a ChangeLedger,
    pub context: &'a PlanContext,
}

impl<'a> PlanInput<'a> {
    pub fn value(&self, name: &str) -> Option<&'a AttrValue> {
        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }

    /// First text value of an attribute.
    pub fn text(&self, name: &str) -> Option<String> {
        self.value(name)
            .and_then(|value| value.texts().into_iter().next())
    }

    /// Value at the last synchronization.
    pub fn original(&self, name: &str) -> Option<String> {
        self.bound.and_then(|entry| entry.get_str(name))
    }

    pub fn bound_dn(&self) -> AppResult<&'a Dn> {
        self.bound.map(|entry| &entry.dn).ok_or_else(|| {
            AppError::Validation(format!(
                "{} has not been read from the directory",
                self.schema.entity_type
            ))
        })
    }

    pub fn change(&self, name: &str) -> Option<&'a Change> {
        self.changes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, change)| change)
    }

    pub fn changed(&self, name: &str) -> bool {
        self.change(name).is_some()
    }

    /// Old and new text value of a changed attribute.
    pub fn text_change(&self, name: &str) -> Option<(Option<String>, Option<String>)> {
        self.change(name).map(|change| {
            let first = |v: &Option<AttrValue>| v.as_ref().and_then(|v| v.texts().into_iter().next());
            (first(&change.old), first(&change.new))
        })
    }

    /// A change that only alters letter case. Directory matching ignores case,
    /// so such a value still names the same entry.
    pub fn case_only_change(&self, name: &str) -> bool {
        matches!(
            self.text_change(name),
            Some((Some(old), Some(new))) if old != new && old.eq_ignore_ascii_case(&new)
        )
    }

    /// Dirty attributes the planner may write, minus `skip`.
    pub fn writable_changes(&self, skip: &[&str]) -> Vec<(&'a str, &'a Change)> {
        self.changes
            .iter()
            .filter(|(name, _)| !self.schema.is_read_only(name))
            .filter(|(name, _)| !skip.iter().any(|s| s.eq_ignore_ascii_case(name)))
            .collect()
    }

    /// Replace action for the writable dirty attributes, if there are any.
    pub fn update_action(&self, dn: &Dn, skip: &[&str]) -> Option<Action> {
        let changes = self.writable_changes(skip);
        if changes.is_empty() {
            return None;
        }
        let mut write_only = Vec::new();
        let replacements = changes
            .into_iter()
            .map(|(name, change)| {
                if self.schema.is_write_only(name) {
                    write_only.push(name.to_string());
                }
                match &change.new {
                    Some(value) => Replacement::set(name, value.to_raw()),
                    None => Replacement::remove(name),
                }
            })
            .collect();
        Some(Action::Update {
            target: Target::Path(dn.clone()),
            replacements,
            write_only,
        })
    }

    /// Attributes for adding the entity: object classes plus every writable
    /// value, minus `skip`.
    pub fn creation_attributes(&self, skip: &[&str]) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            attr::OBJECT_CLASS.to_string(),
            self.schema
                .object_classes
                .iter()
                .map(|class| class.as_bytes().to_vec())
                .collect(),
        );
        for (name, value) in self.values {
            if value.is_empty()
                || self.schema.is_read_only(name)
                || skip.iter().any(|s| s.eq_ignore_ascii_case(name))
            {
                continue;
            }
            attributes.insert(name.clone(), value.to_raw());
        }
        attributes
    }
}

/// Set `name` in `attributes` unless it already holds a value.
pub(crate) fn set_default(attributes: &mut Attributes, name: &str, value: impl Into<AttrValue>) {
    let present = attributes
        .keys()
        .any(|key| key.eq_ignore_ascii_case(name));
    if !present {
        attributes.insert(name.to_string(), value.into().to_raw());
    }
}

/// Plan `operation` for the entity described by `input`.
pub fn plan(operation: Operation, input: &PlanInput<'_>) -> AppResult<Plan> {
    let entity_type = input.schema.entity_type;
    match (entity_type.kind, entity_type.variant) {
        (EntityKind::User, SchemaVariant::Posix) => {
            UnifiedUserPlan::new(posix::PosixUserPlanner).plan(operation, input)
        }
        (EntityKind::User, SchemaVariant::Ad) => {
            UnifiedUserPlan::new(ad::AdUserPlanner).plan(operation, input)
        }
        (EntityKind::Group, SchemaVariant::Posix) => {
            UnifiedGroupPlan::new(posix::PosixGroupPlanner).plan(operation, input)
        }
        (EntityKind::Group, SchemaVariant::Ad) => {
            UnifiedGroupPlan::new(ad::AdGroupPlanner).plan(operation, input)
        }
    }
}
