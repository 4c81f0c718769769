use crate::error::{AppError, AppResult};
use crate::planner::group_plan::GroupPlanner;
use crate::planner::{set_default, Action, Plan, PlanInput};
use crate::schema::{attr, AD_GLOBAL_SECURITY_GROUP};
use crate::transport::Replacement;

/// Active Directory implementation of GroupPlanner
pub struct AdGroupPlanner;

impl GroupPlanner for AdGroupPlanner {
    fn plan_group_create(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let cn = input
            .text(attr::CN)
            .ok_or_else(|| AppError::Validation("AD group requires cn".to_string()))?;

        let mut attributes = input.creation_attributes(&[]);
        set_default(&mut attributes, attr::SAM_ACCOUNT_NAME, cn.as_str());
        set_default(&mut attributes, attr::GROUP_TYPE, AD_GLOBAL_SECURITY_GROUP);

        let mut plan = Plan::new();
        plan.push(Action::Add {
            dn: input.schema.base.child(input.schema.rdn_attribute.clone(), cn),
            attributes,
        });
        Ok(plan)
    }

    fn plan_group_update(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let mut plan = Plan::new();
        if !input.changed(attr::CN) {
            if let Some(action) = input.update_action(dn, &[]) {
                plan.push(action);
            }
            return Ok(plan);
        }

        let new_cn = input
            .text(attr::CN)
            .ok_or_else(|| AppError::Validation(format!("cn of {} cannot be removed", dn)))?;
        let old_cn = input
            .original(attr::CN)
            .or_else(|| dn.rdn_value().map(str::to_string))
            .unwrap_or_default();
        let target = dn.with_rdn_value(new_cn.as_str());
        plan.push(Action::Move {
            from: dn.clone(),
            to: target.clone(),
        });

        let mut replacements = match input.update_action(&target, &[attr::CN]) {
            Some(Action::Update { replacements, .. }) => replacements,
            _ => Vec::new(),
        };
        // sAMAccountName follows the cn unless it was set apart from it.
        let tracks_cn = input
            .original(attr::SAM_ACCOUNT_NAME)
            .is_some_and(|sam| sam.eq_ignore_ascii_case(&old_cn));
        if tracks_cn && !input.changed(attr::SAM_ACCOUNT_NAME) {
            replacements.push(Replacement::set(
                attr::SAM_ACCOUNT_NAME,
                vec![new_cn.into_bytes()],
            ));
        }
        if !replacements.is_empty() {
            plan.push(Action::update(target, replacements));
        }
        Ok(plan)
    }

    fn plan_group_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        Ok(Plan::from(vec![Action::delete(dn.clone())]))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;
    use crate::models::{DirectoryEntry, EntityKind, SchemaVariant};
    use crate::planner::test_support::*;
    use crate::planner::{Action, Operation};
    use crate::transport::Replacement;

    fn eng() -> DirectoryEntry {
        DirectoryEntry::new(dn("CN=eng,CN=Users,DC=corp,DC=example"))
            .with("cn", "eng")
            .with("sAMAccountName", "eng")
            .with("objectSid", "S-1-5-21-1-2-3-1101")
    }

    fn groups() -> Fixture {
        Fixture::new(SchemaVariant::Ad, EntityKind::Group)
    }

    #[test]
    fn test_create_defaults() {
        let plan = groups().set("cn", "eng").plan(Operation::Create).unwrap();
        let Action::Add { dn: path, attributes } = &plan.actions()[0] else {
            panic!("expected add");
        };
        assert_eq!(path, &dn("CN=eng,CN=Users,DC=corp,DC=example"));
        assert_eq!(attributes["sAMAccountName"], vec![b"eng".to_vec()]);
        assert_eq!(attributes["groupType"], vec![b"-2147483646".to_vec()]);
        assert_eq!(attributes["objectClass"], vec![b"top".to_vec(), b"group".to_vec()]);
    }

    #[test]
    fn test_rename_moves_then_follows_sam() {
        let fixture = groups()
            .bound(eng())
            .change("cn", "engineering")
            .change("description", "Engineering");

        let plan = fixture.plan(Operation::Update).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(
            plan.actions()[0],
            Action::Move {
                from: dn("CN=eng,CN=Users,DC=corp,DC=example"),
                to: dn("CN=engineering,CN=Users,DC=corp,DC=example"),
            }
        );
        assert_eq!(
            plan.actions()[1],
            Action::update(
                dn("CN=engineering,CN=Users,DC=corp,DC=example"),
                vec![
                    Replacement::set("description", vec![b"Engineering".to_vec()]),
                    Replacement::set("sAMAccountName", vec![b"engineering".to_vec()]),
                ],
            )
        );
    }

    #[test]
    fn test_rename_keeps_independent_sam() {
        let fixture = groups()
            .bound(eng().with("sAMAccountName", "ENG-SEC"))
            .change("cn", "engineering");

        let plan = fixture.plan(Operation::Update).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.actions()[0].kind(), "move");
    }

    #[test]
    fn test_create_requires_cn() {
        let fixture = groups().set("description", "nameless");
        assert!(matches!(
            fixture.plan(Operation::Create),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_recased_cn_moves_and_recases_sam() {
        let plan = groups()
            .bound(eng())
            .change("cn", "Eng")
            .plan(Operation::Update)
            .unwrap();
        let rendered: Vec<String> = plan.actions().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "move CN=eng,CN=Users,DC=corp,DC=example -> CN=Eng,CN=Users,DC=corp,DC=example"
                    .to_string(),
                "update CN=Eng,CN=Users,DC=corp,DC=example (sAMAccountName[1])".to_string(),
            ]
        );
    }

    #[test]
    fn test_delete_single_action() {
        let plan = groups().bound(eng()).plan(Operation::Delete).unwrap();
        assert_eq!(
            plan.actions(),
            &[Action::delete(dn("CN=eng,CN=Users,DC=corp,DC=example"))]
        );
    }
}
