//! Group and user relationships derived from attribute values.
//!
//! POSIX schemas answer "who is in this group" with reverse filters on the
//! users (`gidNumber`, `memberUid`); AD schemas hold a forward list of member
//! DNs that has to be resolved entry by entry. Both sit behind
//! [`RelationshipResolver`] so entities never branch on the variant.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::{DirectoryEntry, SchemaVariant};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::transport::{DirectoryTransport, Scope};

pub mod ad;
pub mod posix;

pub use ad::AdRelationships;
pub use posix::PosixRelationships;

/// Variant-specific relationship lookups.
#[async_trait]
pub trait RelationshipResolver: Send + Sync {
    /// User attribute referencing the primary group.
    fn primary_attribute(&self) -> &'static str;

    /// Value a user's primary attribute holds to reference `group`.
    fn primary_reference(&self, group: &DirectoryEntry) -> AppResult<String>;

    /// Value naming `user` in a group's membership list.
    fn member_value(&self, user: &DirectoryEntry) -> Option<String>;

    /// Group a primary reference points at. `user` supplies context some
    /// variants need (the domain of an AD account).
    async fn group_by_reference(
        &self,
        reference: &str,
        user: Option<&DirectoryEntry>,
    ) -> AppResult<Option<DirectoryEntry>>;

    async fn primary_group(&self, user: &DirectoryEntry) -> AppResult<Option<DirectoryEntry>> {
        match user.get_str(self.primary_attribute()) {
            Some(reference) => self.group_by_reference(&reference, Some(user)).await,
            None => Ok(None),
        }
    }

    /// Groups listing `user` as a secondary member.
    async fn secondary_groups(&self, user: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>>;

    /// Users whose primary group is `group`.
    async fn primary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>>;

    /// Users listed in the group's membership attribute.
    async fn secondary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>>;
}

/// Transport and schemas shared by the resolver strategies.
#[derive(Clone)]
pub struct Lookup {
    transport: Arc<dyn DirectoryTransport>,
    pub users: Arc<EntitySchema>,
    pub groups: Arc<EntitySchema>,
}

impl Lookup {
    pub fn new(transport: Arc<dyn DirectoryTransport>, registry: &SchemaRegistry) -> AppResult<Self> {
        Ok(Self {
            transport,
            users: registry.users()?,
            groups: registry.groups()?,
        })
    }

    /// Subtree search below the schema's base, restricted to its structural class.
    pub async fn search(&self, schema: &EntitySchema, filter: Filter) -> AppResult<Vec<DirectoryEntry>> {
        let filter = schema.type_filter(filter);
        let found = self
            .transport
            .search(&schema.base, Scope::Subtree, &filter, &schema.readable_attributes())
            .await?;
        debug!(entity_type = %schema.entity_type, filter = %filter, count = found.len(), "Relationship search");
        Ok(found)
    }

    /// At most one entry, or an `Integrity` error.
    pub async fn search_one(&self, schema: &EntitySchema, filter: Filter) -> AppResult<Option<DirectoryEntry>> {
        let mut found = self.search(schema, filter.clone()).await?;
        if found.len() > 1 {
            return Err(AppError::Integrity(format!(
                "{} entries of {} match {}",
                found.len(),
                schema.entity_type,
                filter
            )));
        }
        Ok(found.pop())
    }

    /// Read one entry of `schema` by path; a missing entry is `None`.
    pub async fn read(&self, schema: &EntitySchema, dn: &Dn) -> AppResult<Option<DirectoryEntry>> {
        let filter = schema.type_filter(Filter::any());
        match self
            .transport
            .search(dn, Scope::Base, &filter, &schema.readable_attributes())
            .await
        {
            Ok(mut found) => Ok(found.pop()),
            Err(e) if e.is_no_such_object() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// The resolver for a registry's variant.
pub fn resolver_for(
    transport: Arc<dyn DirectoryTransport>,
    registry: &SchemaRegistry,
) -> AppResult<Box<dyn RelationshipResolver>> {
    let lookup = Lookup::new(transport, registry)?;
    Ok(match registry.variant() {
        SchemaVariant::Posix => Box::new(PosixRelationships::new(lookup)),
        SchemaVariant::Ad => Box::new(AdRelationships::new(lookup)),
    })
}
