use super::group_container;
use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::filter::Filter;
use crate::models::Attributes;
use crate::planner::group_plan::GroupPlanner;
use crate::planner::{Action, Plan, PlanInput, Target};
use crate::schema::attr;
use crate::transport::Replacement;

/// POSIX implementation of GroupPlanner
///
/// The group's users live in the container `ou=<cn>` below the user base,
/// so a cn change recreates the group and its container and moves every
/// primary member across before the old pair is removed.
pub struct PosixGroupPlanner;

impl PosixGroupPlanner {
    fn required(input: &PlanInput<'_>, name: &str, cn: Option<&str>) -> AppResult<String> {
        input.text(name).ok_or_else(|| match cn {
            Some(cn) => AppError::Validation(format!("POSIX group {} requires {}", cn, name)),
            None => AppError::Validation(format!("POSIX group requires {}", name)),
        })
    }

    /// The sentinel marks a group parked by a rename; no group may hold it
    /// otherwise.
    fn check_gid(input: &PlanInput<'_>, cn: &str, gid: &str) -> AppResult<()> {
        if gid.trim() == input.settings.rename_sentinel_gid.to_string() {
            return Err(AppError::Validation(format!(
                "gidNumber {} of group {} is reserved for renames",
                gid, cn
            )));
        }
        Ok(())
    }

    /// Add the group entry and its user container.
    fn create_actions(input: &PlanInput<'_>, cn: &str, attributes: Attributes) -> Vec<Action> {
        let container = group_container(input.peer, cn);
        let mut container_attributes = Attributes::new();
        container_attributes.insert(
            attr::OBJECT_CLASS.to_string(),
            vec![b"top".to_vec(), b"organizationalUnit".to_vec()],
        );
        container_attributes.insert(attr::OU.to_string(), vec![cn.as_bytes().to_vec()]);

        vec![
            Action::Add {
                dn: input.schema.base.child(input.schema.rdn_attribute.clone(), cn),
                attributes,
            },
            Action::Add {
                dn: container,
                attributes: container_attributes,
            },
        ]
    }

    /// Point every user holding `old_gid` at `new_gid`.
    fn repoint_users(input: &PlanInput<'_>, old_gid: &str, new_gid: &str) -> Action {
        Action::update_each(
            input.peer.base.clone(),
            input.peer.type_filter(Filter::eq(attr::GID_NUMBER, old_gid)),
            vec![Replacement::set(
                attr::GID_NUMBER,
                vec![new_gid.as_bytes().to_vec()],
            )],
        )
    }

    /// Between parking the old group on the sentinel gid and the final delete
    /// the directory is not consistent. A batch that dies there without
    /// rolling back leaves the old group on the sentinel; later renames are
    /// refused until it is repaired by hand.
    fn plan_rename(input: &PlanInput<'_>, dn: &Dn) -> AppResult<Plan> {
        let old_cn = input
            .original(attr::CN)
            .or_else(|| dn.rdn_value().map(str::to_string))
            .unwrap_or_default();
        let new_cn = Self::required(input, attr::CN, Some(&old_cn))?;
        let gid = Self::required(input, attr::GID_NUMBER, Some(&new_cn))?;
        let old_gid = input.original(attr::GID_NUMBER);
        let gid_changed = input.changed(attr::GID_NUMBER);
        let sentinel = input.settings.rename_sentinel_gid.to_string();

        if !input.context.sentinel_holders.is_empty() {
            let holders: Vec<String> = input
                .context
                .sentinel_holders
                .iter()
                .map(Dn::to_string)
                .collect();
            return Err(AppError::Planning(format!(
                "cannot rename {}: gidNumber {} is still held by {} from an interrupted rename",
                old_cn,
                sentinel,
                holders.join("; ")
            )));
        }

        let mut plan = Plan::new();

        // 1. Park the old group so the new one can claim its gidNumber.
        let mut replacements = match input.update_action(dn, &[attr::CN, attr::GID_NUMBER]) {
            Some(Action::Update { replacements, .. }) => replacements,
            _ => Vec::new(),
        };
        if !gid_changed {
            replacements.push(Replacement::set(
                attr::GID_NUMBER,
                vec![sentinel.into_bytes()],
            ));
        }
        if !replacements.is_empty() {
            plan.push(Action::update(dn.clone(), replacements));
        }

        // 2. The new identity, carrying every current value.
        let attributes = input.creation_attributes(&[]);
        for action in Self::create_actions(input, &new_cn, attributes) {
            plan.push(action);
        }

        // 3. Relink dependents.
        if gid_changed {
            if let Some(old_gid) = &old_gid {
                plan.push(Self::repoint_users(input, old_gid, &gid));
            }
        }
        let new_container = group_container(input.peer, &new_cn);
        for member in &input.context.primary_members {
            if member.dn.parent().as_ref() != Some(&new_container) {
                plan.push(Action::Move {
                    from: member.dn.clone(),
                    to: member.dn.with_parent(&new_container),
                });
            }
        }

        // 4. Retire the old identity.
        let old_container = group_container(input.peer, &old_cn);
        if input.context.auxiliary.contains(&old_container) {
            plan.push(Action::delete(old_container));
        }
        plan.push(Action::delete(dn.clone()));
        Ok(plan)
    }
}

impl GroupPlanner for PosixGroupPlanner {
    fn plan_group_create(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let cn = Self::required(input, attr::CN, None)?;
        let gid = Self::required(input, attr::GID_NUMBER, Some(&cn))?;
        Self::check_gid(input, &cn, &gid)?;

        let attributes = input.creation_attributes(&[]);
        Ok(Plan::from(Self::create_actions(input, &cn, attributes)))
    }

    fn plan_group_update(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        if input.changed(attr::GID_NUMBER) {
            let cn = input.text(attr::CN).unwrap_or_else(|| dn.to_string());
            let gid = input.text(attr::GID_NUMBER).ok_or_else(|| {
                AppError::Validation(format!("gidNumber of {} cannot be removed", dn))
            })?;
            Self::check_gid(input, &cn, &gid)?;
        }
        if input.changed(attr::CN) && !input.case_only_change(attr::CN) {
            return Self::plan_rename(input, dn);
        }

        let mut plan = Plan::new();
        let mut target = dn.clone();
        if input.changed(attr::CN) {
            // Same group under a recased name: rename the entry in place and
            // leave the container, whose name still matches.
            let new_cn = Self::required(input, attr::CN, None)?;
            target = dn.with_rdn_value(new_cn.as_str());
            plan.push(Action::Move {
                from: dn.clone(),
                to: target.clone(),
            });
        }
        if let Some(action) = input.update_action(&target, &[attr::CN]) {
            plan.push(action);
        }
        if let Some((Some(old_gid), Some(new_gid))) = input.text_change(attr::GID_NUMBER) {
            plan.push(Self::repoint_users(input, &old_gid, &new_gid));
        }
        Ok(plan)
    }

    fn plan_group_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let mut plan = Plan::new();
        for auxiliary in &input.context.auxiliary {
            plan.push(Action::Delete(Target::Path(auxiliary.clone())));
        }
        plan.push(Action::delete(dn.clone()));
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::models::{DirectoryEntry, EntityKind, SchemaVariant};
    use crate::planner::test_support::*;
    use crate::planner::{Action, Operation, Target};
    use crate::transport::Replacement;

    fn eng() -> DirectoryEntry {
        DirectoryEntry::new(dn("cn=eng,ou=Group,dc=example,dc=com"))
            .with("cn", "eng")
            .with("gidNumber", "1000")
            .with("memberUid", vec!["bob"])
    }

    fn groups() -> Fixture {
        Fixture::new(SchemaVariant::Posix, EntityKind::Group)
    }

    fn alice() -> DirectoryEntry {
        DirectoryEntry::new(dn("uid=alice,ou=eng,ou=People,dc=example,dc=com"))
            .with("uid", "alice")
            .with("gidNumber", "1000")
    }

    #[test]
    fn test_create_adds_group_and_container() {
        let fixture = groups().set("cn", "eng").set("gidNumber", "1000");
        let plan = fixture.plan(Operation::Create).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.actions()[0].dn(),
            Some(&dn("cn=eng,ou=Group,dc=example,dc=com"))
        );
        let Action::Add { dn: container, attributes } = &plan.actions()[1] else {
            panic!("expected add");
        };
        assert_eq!(container, &dn("ou=eng,ou=People,dc=example,dc=com"));
        assert_eq!(attributes["ou"], vec![b"eng".to_vec()]);
    }

    #[test]
    fn test_create_requires_gid_number() {
        let fixture = groups().set("cn", "eng");
        match fixture.plan(Operation::Create) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("gidNumber")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_gid_change_repoints_users() {
        let fixture = groups().bound(eng()).change("gidNumber", "2000");
        let plan = fixture.plan(Operation::Update).unwrap();

        assert_eq!(plan.len(), 2);
        let Action::Update { target, replacements, .. } = &plan.actions()[1] else {
            panic!("expected update");
        };
        assert_eq!(
            target.to_string(),
            "each (&(objectClass=posixAccount)(gidNumber=1000)) under ou=People,dc=example,dc=com"
        );
        assert_eq!(
            replacements,
            &vec![Replacement::set("gidNumber", vec![b"2000".to_vec()])]
        );
    }

    #[test]
    fn test_rename_choreography_order() {
        let mut fixture = groups().bound(eng()).change("cn", "engineering");
        fixture.context.primary_members = vec![alice()];
        fixture.context.auxiliary = vec![dn("ou=eng,ou=People,dc=example,dc=com")];

        let plan = fixture.plan(Operation::Update).unwrap();
        let rendered: Vec<String> = plan.actions().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "update cn=eng,ou=Group,dc=example,dc=com (gidNumber[1])".to_string(),
                "add cn=engineering,ou=Group,dc=example,dc=com".to_string(),
                "add ou=engineering,ou=People,dc=example,dc=com".to_string(),
                "move uid=alice,ou=eng,ou=People,dc=example,dc=com -> uid=alice,ou=engineering,ou=People,dc=example,dc=com".to_string(),
                "delete ou=eng,ou=People,dc=example,dc=com".to_string(),
                "delete cn=eng,ou=Group,dc=example,dc=com".to_string(),
            ]
        );

        // The parked value is the sentinel, the new group keeps the real gid.
        let Action::Update { replacements, .. } = &plan.actions()[0] else {
            panic!("expected update");
        };
        assert_eq!(
            replacements[0].values,
            Some(vec![fixture.settings.rename_sentinel_gid.to_string().into_bytes()])
        );
        let Action::Add { attributes, .. } = &plan.actions()[1] else {
            panic!("expected add");
        };
        assert_eq!(attributes["gidNumber"], vec![b"1000".to_vec()]);
        assert_eq!(attributes["memberUid"], vec![b"bob".to_vec()]);
    }

    #[test]
    fn test_rename_with_gid_change_skips_sentinel() {
        let fixture = groups()
            .bound(eng())
            .change("cn", "engineering")
            .change("gidNumber", "2000");

        let plan = fixture.plan(Operation::Update).unwrap();
        assert_eq!(plan.actions()[0].kind(), "add");
        assert!(plan
            .actions()
            .iter()
            .any(|a| matches!(a, Action::Update { target: Target::Search { .. }, .. })));
        assert_eq!(
            plan.actions().last(),
            Some(&Action::delete(dn("cn=eng,ou=Group,dc=example,dc=com")))
        );
    }

    #[test]
    fn test_rename_refused_while_sentinel_is_held() {
        let mut fixture = groups().bound(eng()).change("cn", "engineering");
        fixture.context.sentinel_holders = vec![dn("cn=old,ou=Group,dc=example,dc=com")];
        match fixture.plan(Operation::Update) {
            Err(AppError::Planning(msg)) => assert!(msg.contains("interrupted rename")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sentinel_gid_is_reserved() {
        let sentinel = groups().settings.rename_sentinel_gid.to_string();

        let fixture = groups().set("cn", "parked").set("gidNumber", sentinel.as_str());
        match fixture.plan(Operation::Create) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("reserved")),
            other => panic!("unexpected: {:?}", other),
        }

        let fixture = groups().bound(eng()).change("gidNumber", sentinel.as_str());
        assert!(matches!(
            fixture.plan(Operation::Update),
            Err(AppError::Validation(_))
        ));

        let fixture = groups()
            .bound(eng())
            .change("cn", "engineering")
            .change("gidNumber", sentinel.as_str());
        assert!(matches!(
            fixture.plan(Operation::Update),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_recased_cn_renames_in_place() {
        let mut fixture = groups()
            .bound(eng())
            .change("cn", "Eng")
            .change("description", "Engineering");
        fixture.context.primary_members = vec![alice()];
        fixture.context.auxiliary = vec![dn("ou=eng,ou=People,dc=example,dc=com")];

        let plan = fixture.plan(Operation::Update).unwrap();
        let rendered: Vec<String> = plan.actions().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "move cn=eng,ou=Group,dc=example,dc=com -> cn=Eng,ou=Group,dc=example,dc=com".to_string(),
                "update cn=Eng,ou=Group,dc=example,dc=com (description[1])".to_string(),
            ]
        );
    }

    #[test]
    fn test_delete_removes_container_first() {
        let mut fixture = groups().bound(eng());
        fixture.context.auxiliary = vec![dn("ou=eng,ou=People,dc=example,dc=com")];

        let plan = fixture.plan(Operation::Delete).unwrap();
        assert_eq!(
            plan.actions(),
            &[
                Action::delete(dn("ou=eng,ou=People,dc=example,dc=com")),
                Action::delete(dn("cn=eng,ou=Group,dc=example,dc=com")),
            ]
        );
    }
}
