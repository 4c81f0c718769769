//! In-process directory.
//!
//! Behaves like a small LDAP server for the operations the core uses: parent
//! checks, leaf-only deletes, subtree moves, per-objectClass uniqueness and
//! (optionally) the Active Directory behaviours the planners depend on.
//! Tests use its journal to assert operation order and its fault hooks to
//! break batches part-way through.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use super::{DirectoryTransport, Replacement, Scope};
use crate::dn::Dn;
use crate::error::{result_code, AppResult, TransportError, TransportResult};
use crate::filter::Filter;
use crate::models::{Attributes, DirectoryEntry, RawValues};
use crate::schema::attr;

/// First RID handed out by the AD emulation.
const FIRST_RID: u32 = 1100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Search,
    Add,
    Delete,
    Modify,
    Move,
}

/// One successful write, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: OpKind,
    pub dn: Dn,
    /// Destination of a move.
    pub new_dn: Option<Dn>,
}

/// An injected failure for every operation of a kind, optionally on one entry.
#[derive(Debug, Clone)]
pub struct Fault {
    op: OpKind,
    dn: Option<Dn>,
    code: u32,
}

impl Fault {
    pub fn on(op: OpKind) -> Self {
        Self {
            op,
            dn: None,
            code: result_code::UNAVAILABLE,
        }
    }

    pub fn at(mut self, dn: &str) -> AppResult<Self> {
        self.dn = Some(Dn::parse(dn)?);
        Ok(self)
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = code;
        self
    }

    fn matches(&self, op: OpKind, dn: &Dn) -> bool {
        self.op == op && self.dn.as_ref().map_or(true, |target| target == dn)
    }
}

#[derive(Debug, Clone)]
struct UniqueConstraint {
    object_class: String,
    attribute: String,
}

#[derive(Debug, Clone)]
struct AdEmulation {
    domain_sid: String,
    next_rid: u32,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Dn, DirectoryEntry>,
    constraints: Vec<UniqueConstraint>,
    ad: Option<AdEmulation>,
    hidden: Vec<String>,
    journal: Vec<JournalEntry>,
    faults: Vec<Fault>,
    writes: usize,
    disconnect_after: Option<usize>,
}

impl State {
    fn check(&self, op: OpKind, dn: &Dn) -> TransportResult<()> {
        if self.disconnect_after.is_some_and(|limit| self.writes >= limit) {
            return Err(TransportError::server_down("connection to directory lost"));
        }
        if let Some(fault) = self.faults.iter().find(|f| f.matches(op, dn)) {
            return Err(TransportError::new(
                fault.code,
                format!("injected {:?} failure on {}", op, dn),
            ));
        }
        Ok(())
    }

    fn record(&mut self, op: OpKind, dn: &Dn, new_dn: Option<&Dn>) {
        self.writes += 1;
        self.journal.push(JournalEntry {
            op,
            dn: dn.clone(),
            new_dn: new_dn.cloned(),
        });
    }

    fn require_parent(&self, dn: &Dn) -> TransportResult<()> {
        match dn.parent() {
            Some(parent) if !parent.is_root() && !self.entries.contains_key(&parent) => {
                Err(TransportError::new(
                    result_code::NO_SUCH_OBJECT,
                    format!("parent entry {} does not exist", parent),
                ))
            }
            _ => Ok(()),
        }
    }

    fn stamp_created(&mut self, entry: &mut DirectoryEntry) {
        let now = Utc::now();
        match self.ad.as_mut() {
            Some(ad) => {
                let is_principal = entry.has_object_class("user") || entry.has_object_class("group");
                if is_principal && entry.raw(attr::OBJECT_SID).is_none() {
                    let rid = ad.next_rid;
                    ad.next_rid += 1;
                    put(entry, attr::OBJECT_SID, text(format!("{}-{}", ad.domain_sid, rid)));
                }
                if is_principal && entry.raw(attr::OBJECT_GUID).is_none() {
                    put(entry, attr::OBJECT_GUID, text(Uuid::new_v4().to_string()));
                }
                if entry.has_object_class("group") && entry.raw(attr::PRIMARY_GROUP_TOKEN).is_none() {
                    if let Some(rid) = entry.get_str(attr::OBJECT_SID).as_deref().and_then(rid_of) {
                        put(entry, attr::PRIMARY_GROUP_TOKEN, text(rid.to_string()));
                    }
                }
                let stamp = now.format("%Y%m%d%H%M%S.0Z").to_string();
                if entry.raw("whenCreated").is_none() {
                    put(entry, "whenCreated", text(stamp.clone()));
                }
                put(entry, "whenChanged", text(stamp));
                let dn = entry.dn.to_string();
                put(entry, "distinguishedName", text(dn));
            }
            None => {
                let stamp = now.format("%Y%m%d%H%M%SZ").to_string();
                if entry.raw("entryUUID").is_none() {
                    put(entry, "entryUUID", text(Uuid::new_v4().to_string()));
                }
                if entry.raw("createTimestamp").is_none() {
                    put(entry, "createTimestamp", text(stamp.clone()));
                }
                put(entry, "modifyTimestamp", text(stamp));
            }
        }
    }

    fn stamp_modified(&self, entry: &mut DirectoryEntry) {
        let now = Utc::now();
        if self.ad.is_some() {
            put(entry, "whenChanged", text(now.format("%Y%m%d%H%M%S.0Z").to_string()));
            let dn = entry.dn.to_string();
            put(entry, "distinguishedName", text(dn));
        } else {
            put(entry, "modifyTimestamp", text(now.format("%Y%m%d%H%M%SZ").to_string()));
        }
    }

    fn check_unique(&self, entry: &DirectoryEntry, ignore: &[Dn]) -> TransportResult<()> {
        for constraint in &self.constraints {
            if !entry.has_object_class(&constraint.object_class) {
                continue;
            }
            let Some(values) = entry.raw(&constraint.attribute) else {
                continue;
            };
            let clash = self.entries.values().find(|other| {
                other.dn != entry.dn
                    && !ignore.contains(&other.dn)
                    && other.has_object_class(&constraint.object_class)
                    && other.raw(&constraint.attribute).is_some_and(|theirs| {
                        theirs
                            .iter()
                            .any(|t| values.iter().any(|v| v.eq_ignore_ascii_case(t)))
                    })
            });
            if let Some(other) = clash {
                return Err(TransportError::new(
                    result_code::CONSTRAINT_VIOLATION,
                    format!(
                        "{} of {} is already used by {}",
                        constraint.attribute, entry.dn, other.dn
                    ),
                ));
            }
        }
        Ok(())
    }

    /// AD only accepts a primaryGroupID naming a group the user is already a
    /// member of. The group stops listing the user explicitly and the previous
    /// primary group starts to.
    fn apply_primary_group_change(
        &self,
        user: &DirectoryEntry,
        new_id: &[u8],
        staged: &mut HashMap<Dn, DirectoryEntry>,
    ) -> TransportResult<()> {
        let new_group = self.group_by_token(new_id).ok_or_else(|| {
            TransportError::new(
                result_code::UNWILLING_TO_PERFORM,
                format!(
                    "no group has primaryGroupToken {}",
                    String::from_utf8_lossy(new_id)
                ),
            )
        })?;
        let mut new_group = staged.get(&new_group.dn).cloned().unwrap_or_else(|| new_group.clone());
        if !lists_member(&new_group, &user.dn) {
            return Err(TransportError::new(
                result_code::UNWILLING_TO_PERFORM,
                format!("{} must be a member of {} first", user.dn, new_group.dn),
            ));
        }
        remove_member(&mut new_group, &user.dn);
        staged.insert(new_group.dn.clone(), new_group);

        let old_id = user
            .raw(attr::PRIMARY_GROUP_ID)
            .and_then(|values| values.first())
            .filter(|old| old.as_slice() != new_id);
        if let Some(old_group) = old_id.and_then(|old| self.group_by_token(old)) {
            let mut old_group = staged.get(&old_group.dn).cloned().unwrap_or_else(|| old_group.clone());
            if !lists_member(&old_group, &user.dn) {
                let mut values = old_group.raw(attr::MEMBER).cloned().unwrap_or_default();
                values.push(user.dn.to_string().into_bytes());
                put(&mut old_group, attr::MEMBER, values);
            }
            staged.insert(old_group.dn.clone(), old_group);
        }
        Ok(())
    }

    fn group_by_token(&self, token: &[u8]) -> Option<&DirectoryEntry> {
        self.entries.values().find(|e| {
            e.raw(attr::PRIMARY_GROUP_TOKEN)
                .is_some_and(|values| values.iter().any(|v| v.as_slice() == token))
        })
    }
}

fn text(value: String) -> RawValues {
    vec![value.into_bytes()]
}

fn rid_of(sid: &str) -> Option<u32> {
    sid.rsplit('-').next().and_then(|rid| rid.parse().ok())
}

/// Replace an attribute, matching its name case-insensitively.
fn put(entry: &mut DirectoryEntry, name: &str, values: RawValues) {
    entry.attrs.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
    if !values.is_empty() {
        entry.attrs.insert(name.to_string(), values);
    }
}

fn lists_member(group: &DirectoryEntry, member: &Dn) -> bool {
    group.get_all(attr::MEMBER).iter().any(|value| {
        Dn::parse(value).map_or(false, |dn| &dn == member)
    })
}

fn remove_member(group: &mut DirectoryEntry, member: &Dn) {
    let kept: RawValues = group
        .get_all(attr::MEMBER)
        .into_iter()
        .filter(|value| Dn::parse(value).map_or(true, |dn| &dn != member))
        .map(String::into_bytes)
        .collect();
    put(group, attr::MEMBER, kept);
}

fn default_object_classes(rdn_attr: &str) -> Vec<&'static str> {
    match rdn_attr.to_ascii_lowercase().as_str() {
        "dc" => vec!["top", "domain"],
        "ou" => vec!["top", "organizationalUnit"],
        "o" => vec!["top", "organization"],
        "cn" => vec!["top", "container"],
        _ => vec!["top"],
    }
}

/// A directory kept entirely in memory.
#[derive(Debug)]
pub struct MemoryDirectory {
    state: RwLock<State>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                hidden: vec![attr::UNICODE_PWD.to_string()],
                ..State::default()
            }),
        }
    }

    /// Create a container entry and any missing ancestors.
    pub fn with_container(mut self, dn: &str) -> AppResult<Self> {
        let dn = Dn::parse(dn)?;
        let state = self.state.get_mut();
        let mut chain = Vec::new();
        let mut current = Some(dn);
        while let Some(dn) = current.filter(|d| !d.is_root()) {
            current = dn.parent();
            chain.push(dn);
        }
        for dn in chain.into_iter().rev() {
            if state.entries.contains_key(&dn) {
                continue;
            }
            let Some(rdn) = dn.rdn().cloned() else {
                continue;
            };
            let mut entry = DirectoryEntry::new(dn.clone())
                .with(attr::OBJECT_CLASS, default_object_classes(&rdn.attr))
                .with(&rdn.attr, rdn.value.as_str());
            state.stamp_created(&mut entry);
            state.entries.insert(dn, entry);
        }
        Ok(self)
    }

    /// Insert an entry as-is, bypassing every check.
    pub fn with_entry(mut self, entry: DirectoryEntry) -> Self {
        self.state.get_mut().entries.insert(entry.dn.clone(), entry);
        self
    }

    /// Reject a second entry of `object_class` carrying the same `attribute` value.
    pub fn with_unique_constraint(mut self, object_class: &str, attribute: &str) -> Self {
        self.state.get_mut().constraints.push(UniqueConstraint {
            object_class: object_class.to_string(),
            attribute: attribute.to_string(),
        });
        self
    }

    /// Behave like a domain controller of `domain_sid` (e.g. `S-1-5-21-1-2-3`).
    pub fn with_ad_emulation(mut self, domain_sid: &str) -> Self {
        self.state.get_mut().ad = Some(AdEmulation {
            domain_sid: domain_sid.to_string(),
            next_rid: FIRST_RID,
        });
        self
    }

    /// Fail every matching operation until [`clear_faults`](Self::clear_faults).
    pub async fn inject(&self, fault: Fault) {
        self.state.write().await.faults.push(fault);
    }

    pub async fn clear_faults(&self) {
        self.state.write().await.faults.clear();
    }

    /// Drop the "connection" once `writes` more writes have succeeded.
    pub async fn disconnect_after(&self, writes: usize) {
        let mut state = self.state.write().await;
        state.disconnect_after = Some(state.writes + writes);
    }

    pub async fn reconnect(&self) {
        self.state.write().await.disconnect_after = None;
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.read().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.state.write().await.journal.clear();
    }

    /// Raw stored entry, hidden attributes included.
    pub async fn entry(&self, dn: &Dn) -> Option<DirectoryEntry> {
        self.state.read().await.entries.get(dn).cloned()
    }

    pub async fn contains(&self, dn: &Dn) -> bool {
        self.state.read().await.entries.contains_key(dn)
    }

    /// Every stored entry, sorted by path.
    pub async fn snapshot(&self) -> Vec<DirectoryEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<DirectoryEntry> = state.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.dn.to_string().to_lowercase());
        entries
    }
}

#[async_trait]
impl DirectoryTransport for MemoryDirectory {
    async fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: &Filter,
        attributes: &[String],
    ) -> TransportResult<Vec<DirectoryEntry>> {
        let state = self.state.read().await;
        state.check(OpKind::Search, base)?;
        if !base.is_root() && !state.entries.contains_key(base) {
            return Err(TransportError::no_such_object(base));
        }

        let all = attributes.is_empty() || attributes.iter().any(|a| a == "*");
        let mut found: Vec<DirectoryEntry> = state
            .entries
            .values()
            .filter(|entry| match scope {
                Scope::Base => &entry.dn == base,
                Scope::OneLevel => entry.dn.parent().as_ref() == Some(base),
                Scope::Subtree => entry.dn.is_within(base),
            })
            .filter(|entry| filter.matches(&|name: &str| entry.raw(name).cloned().unwrap_or_default()))
            .map(|entry| {
                let mut projected = entry.clone();
                projected.attrs.retain(|name, _| {
                    let wanted = all || attributes.iter().any(|a| a.eq_ignore_ascii_case(name));
                    wanted && !state.hidden.iter().any(|h| h.eq_ignore_ascii_case(name))
                });
                projected
            })
            .collect();
        found.sort_by_key(|e| (e.dn.len(), e.dn.to_string().to_lowercase()));

        trace!(base = %base, filter = %filter, count = found.len(), "memory search");
        Ok(found)
    }

    async fn add(&self, dn: &Dn, attributes: &Attributes) -> TransportResult<()> {
        let mut state = self.state.write().await;
        state.check(OpKind::Add, dn)?;
        let Some(rdn) = dn.rdn().cloned() else {
            return Err(TransportError::new(
                result_code::INVALID_DN_SYNTAX,
                "cannot add the root entry",
            ));
        };
        if state.entries.contains_key(dn) {
            return Err(TransportError::already_exists(dn));
        }
        state.require_parent(dn)?;

        let mut entry = DirectoryEntry::new(dn.clone());
        for (name, values) in attributes {
            put(&mut entry, name, values.clone());
        }
        if entry.raw(attr::OBJECT_CLASS).is_none() {
            return Err(TransportError::new(
                result_code::OBJECT_CLASS_VIOLATION,
                format!("{} has no objectClass", dn),
            ));
        }
        let names_rdn = entry
            .get_all(&rdn.attr)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(&rdn.value));
        if !names_rdn {
            return Err(TransportError::new(
                result_code::NAMING_VIOLATION,
                format!("{} does not carry its RDN value", dn),
            ));
        }
        state.stamp_created(&mut entry);
        state.check_unique(&entry, &[])?;

        state.entries.insert(dn.clone(), entry);
        state.record(OpKind::Add, dn, None);
        Ok(())
    }

    async fn delete(&self, dn: &Dn) -> TransportResult<()> {
        let mut state = self.state.write().await;
        state.check(OpKind::Delete, dn)?;
        if !state.entries.contains_key(dn) {
            return Err(TransportError::no_such_object(dn));
        }
        if state.entries.keys().any(|other| other.is_descendant_of(dn)) {
            return Err(TransportError::new(
                result_code::NOT_ALLOWED_ON_NON_LEAF,
                format!("{} has subordinate entries", dn),
            ));
        }

        state.entries.remove(dn);
        state.record(OpKind::Delete, dn, None);
        Ok(())
    }

    async fn modify(&self, dn: &Dn, replacements: &[Replacement]) -> TransportResult<()> {
        let mut state = self.state.write().await;
        state.check(OpKind::Modify, dn)?;
        let Some(original) = state.entries.get(dn).cloned() else {
            return Err(TransportError::no_such_object(dn));
        };

        let mut staged: HashMap<Dn, DirectoryEntry> = HashMap::new();
        let mut entry = original.clone();
        for replacement in replacements {
            let is_primary_group = replacement
                .attribute
                .eq_ignore_ascii_case(attr::PRIMARY_GROUP_ID);
            if let (true, Some(_), Some(new_id)) = (
                is_primary_group,
                state.ad.as_ref(),
                replacement.values.as_ref().and_then(|v| v.first()),
            ) {
                state.apply_primary_group_change(&original, new_id, &mut staged)?;
            }
            match &replacement.values {
                Some(values) => put(&mut entry, &replacement.attribute, values.clone()),
                None => put(&mut entry, &replacement.attribute, Vec::new()),
            }
        }
        state.stamp_modified(&mut entry);
        state.check_unique(&entry, &[])?;

        state.entries.insert(dn.clone(), entry);
        for (group_dn, mut group) in staged {
            state.stamp_modified(&mut group);
            state.entries.insert(group_dn, group);
        }
        state.record(OpKind::Modify, dn, None);
        Ok(())
    }

    async fn move_entry(&self, from: &Dn, to: &Dn) -> TransportResult<()> {
        let mut state = self.state.write().await;
        state.check(OpKind::Move, from)?;
        if !state.entries.contains_key(from) {
            return Err(TransportError::no_such_object(from));
        }
        // A target equal to the source only recases the RDN.
        if to != from && state.entries.contains_key(to) {
            return Err(TransportError::already_exists(to));
        }
        state.require_parent(to)?;
        if to.is_descendant_of(from) {
            return Err(TransportError::new(
                result_code::UNWILLING_TO_PERFORM,
                format!("cannot move {} below itself", from),
            ));
        }

        let moving: Vec<Dn> = state
            .entries
            .keys()
            .filter(|dn| dn.is_within(from))
            .cloned()
            .collect();
        let mut moved = Vec::with_capacity(moving.len());
        for old_dn in &moving {
            let Some(mut entry) = state.entries.get(old_dn).cloned() else {
                continue;
            };
            let Some(new_dn) = old_dn.rebase(from, to) else {
                continue;
            };
            entry.dn = new_dn;
            if old_dn == from {
                if let (Some(old_rdn), Some(new_rdn)) = (from.rdn(), to.rdn()) {
                    let mut values: RawValues = entry
                        .raw(&old_rdn.attr)
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|v| !v.eq_ignore_ascii_case(old_rdn.value.as_bytes()))
                        .collect();
                    put(&mut entry, &old_rdn.attr, values.clone());
                    values = entry.raw(&new_rdn.attr).cloned().unwrap_or_default();
                    if !values.iter().any(|v| v.eq_ignore_ascii_case(new_rdn.value.as_bytes())) {
                        values.insert(0, new_rdn.value.clone().into_bytes());
                    }
                    put(&mut entry, &new_rdn.attr, values);
                }
                state.stamp_modified(&mut entry);
            } else if state.ad.is_some() {
                let dn = entry.dn.to_string();
                put(&mut entry, "distinguishedName", text(dn));
            }
            moved.push(entry);
        }
        for entry in &moved {
            state.check_unique(entry, &moving)?;
        }

        for old_dn in &moving {
            state.entries.remove(old_dn);
        }
        for entry in moved {
            state.entries.insert(entry.dn.clone(), entry);
        }
        state.record(OpKind::Move, from, Some(to));
        Ok(())
    }
}
