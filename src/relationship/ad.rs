use async_trait::async_trait;
use tracing::warn;

use super::{Lookup, RelationshipResolver};
use crate::dn::Dn;
use crate::error::AppResult;
use crate::filter::Filter;
use crate::models::DirectoryEntry;
use crate::planner::ad::{primary_group_token, rid};
use crate::schema::attr;

/// Active Directory relationships: `primaryGroupID` (a RID) on the user,
/// a `member` DN list on the group.
pub struct AdRelationships {
    lookup: Lookup,
}

impl AdRelationships {
    pub fn new(lookup: Lookup) -> Self {
        Self { lookup }
    }
}

/// Domain part of an account SID.
fn domain_of(sid: &str) -> Option<&str> {
    rid(sid).and_then(|rid| sid.strip_suffix(rid)).map(|s| s.trim_end_matches('-'))
}

#[async_trait]
impl RelationshipResolver for AdRelationships {
    fn primary_attribute(&self) -> &'static str {
        attr::PRIMARY_GROUP_ID
    }

    fn primary_reference(&self, group: &DirectoryEntry) -> AppResult<String> {
        primary_group_token(group)
    }

    fn member_value(&self, user: &DirectoryEntry) -> Option<String> {
        Some(user.dn.to_string())
    }

    async fn group_by_reference(
        &self,
        reference: &str,
        user: Option<&DirectoryEntry>,
    ) -> AppResult<Option<DirectoryEntry>> {
        let domain = user
            .and_then(|u| u.get_str(attr::OBJECT_SID))
            .and_then(|sid| domain_of(&sid).map(str::to_string));
        if let Some(domain) = domain {
            let sid = format!("{}-{}", domain, reference);
            return self
                .lookup
                .search_one(&self.lookup.groups, Filter::eq(attr::OBJECT_SID, sid))
                .await;
        }

        // primaryGroupToken is computed and cannot be filtered on; match the
        // RID of every group instead.
        let groups = self.lookup.search(&self.lookup.groups, Filter::any()).await?;
        Ok(groups
            .into_iter()
            .find(|group| primary_group_token(group).is_ok_and(|token| token == reference)))
    }

    async fn secondary_groups(&self, user: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        self.lookup
            .search(&self.lookup.groups, Filter::eq(attr::MEMBER, user.dn.to_string()))
            .await
    }

    async fn primary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        let token = primary_group_token(group)?;
        self.lookup
            .search(&self.lookup.users, Filter::eq(attr::PRIMARY_GROUP_ID, token))
            .await
    }

    async fn secondary_members(&self, group: &DirectoryEntry) -> AppResult<Vec<DirectoryEntry>> {
        let mut members = Vec::new();
        for value in group.get_all(attr::MEMBER) {
            let dn = match Dn::parse(&value) {
                Ok(dn) => dn,
                Err(e) => {
                    warn!(group = %group.dn, member = %value, error = %e, "Skipping unparsable member value");
                    continue;
                }
            };
            // Nested groups and dangling references are not user members.
            if let Some(user) = self.lookup.read(&self.lookup.users, &dn).await? {
                members.push(user);
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::SchemaVariant;
    use crate::relationship::resolver_for;
    use crate::schema::SchemaRegistry;
    use crate::transport::MemoryDirectory;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    const DOMAIN: &str = "S-1-5-21-1-2-3";

    fn group(cn: &str, rid: u32, members: Vec<&str>) -> DirectoryEntry {
        DirectoryEntry::new(dn(&format!("CN={},CN=Users,DC=corp,DC=example", cn)))
            .with("objectClass", vec!["top", "group"])
            .with("cn", cn)
            .with("objectSid", format!("{}-{}", DOMAIN, rid))
            .with("primaryGroupToken", rid)
            .with("member", members)
    }

    fn user(cn: &str, rid: u32, primary: u32) -> DirectoryEntry {
        DirectoryEntry::new(dn(&format!("CN={},CN=Users,DC=corp,DC=example", cn)))
            .with("objectClass", vec!["top", "person", "organizationalPerson", "user"])
            .with("cn", cn)
            .with("sAMAccountName", cn)
            .with("objectSid", format!("{}-{}", DOMAIN, rid))
            .with("primaryGroupID", primary)
    }

    fn resolver() -> Box<dyn RelationshipResolver> {
        let directory = MemoryDirectory::new()
            .with_container("CN=Users,DC=corp,DC=example")
            .unwrap()
            .with_entry(group("Domain Users", 513, vec![]))
            .with_entry(group(
                "eng",
                1101,
                vec![
                    "CN=bob,CN=Users,DC=corp,DC=example",
                    "CN=ops,CN=Users,DC=corp,DC=example",
                    "CN=gone,CN=Users,DC=corp,DC=example",
                ],
            ))
            .with_entry(group("ops", 1102, vec![]))
            .with_entry(user("alice", 1105, 1101))
            .with_entry(user("bob", 1106, 513));
        let registry = SchemaRegistry::builder(SchemaVariant::Ad)
            .user_base("CN=Users,DC=corp,DC=example")
            .group_base("CN=Users,DC=corp,DC=example")
            .build()
            .unwrap();
        resolver_for(Arc::new(directory), &registry).unwrap()
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("S-1-5-21-1-2-3-1105"), Some("S-1-5-21-1-2-3"));
        assert_eq!(domain_of("garbage"), None);
    }

    #[tokio::test]
    async fn test_primary_group_by_sid() {
        let resolver = resolver();
        let alice = user("alice", 1105, 1101);
        let primary = resolver.primary_group(&alice).await.unwrap().unwrap();
        assert_eq!(primary.get_str("cn").as_deref(), Some("eng"));

        let members = resolver.primary_members(&primary).await.unwrap();
        let names: Vec<String> = members.iter().filter_map(|m| m.get_str("cn")).collect();
        assert_eq!(names, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_reference_without_domain_scans_tokens() {
        let resolver = resolver();
        let group = resolver.group_by_reference("513", None).await.unwrap().unwrap();
        assert_eq!(group.get_str("cn").as_deref(), Some("Domain Users"));
        assert!(resolver.group_by_reference("9999", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_secondary_members_resolve_forward_list() {
        let resolver = resolver();
        let bob = user("bob", 1106, 513);

        let groups = resolver.secondary_groups(&bob).await.unwrap();
        assert_eq!(groups.len(), 1);

        let members = resolver.secondary_members(&groups[0]).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].dn, bob.dn);
    }
}
