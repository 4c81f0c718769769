use async_trait::async_trait;

use super::{Lookup, RelationshipResolver};
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::DirectoryEntry;
use crate::schema::attr;

/// RFC 2307 relationships: `gidNumber` on the user, `memberUid` on the group.
pub struct PosixRelationships {
    lookup: Lookup,
}

impl PosixRelationships {
    pub fn new(lookup: Lookup) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl RelationshipResolver for PosixRelationships {
    fn primary_attribute(&self) -> &'static str {
        attr::GID_NUMBER
    }

    fn primary_reference(&self, group: &DirectoryEntry) -> AppResult<String> {
        group.get_str(attr::GID_NUMBER).ok_or_else(|| {
            AppError::Integrity(format!("group {} has no gidNumber", group.dn))
        })
    }

    fn member_value(&self, user: &DirectoryEntry) -> Option<String> {
        user.get_str(attr::UID)
    }

    async fn group_by_reference(
        &self,
        reference: &str,
        _user: Option<&DirectoryEntry>,
    ) -> AppResult<Option<DirectoryEntry>> {
        self.lookup
            .search_one(&self.lookup.groups, Filter::eq(attr::GID_NUMBER, reference))
            .await
    }

    async fn secondary_groups(&self, user: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        match self.member_value(user) {
            Some(uid) => {
                self.lookup
                    .search(&self.lookup.groups, Filter::eq(attr::MEMBER_UID, uid))
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn primary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        let gid = self.primary_reference(group)?;
        self.lookup
            .search(&self.lookup.users, Filter::eq(attr::GID_NUMBER, gid))
            .await
    }

    async fn secondary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        let uids = group.get_all(attr::MEMBER_UID);
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        self.lookup
            .search(&self.lookup.users, Filter::any_of(attr::UID, uids))
            .await
    }
}
