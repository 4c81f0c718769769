use super::{group_container, user_dn};
use crate::error::{AppError, AppResult};
use crate::models::DirectoryEntry;
use crate::planner::user_plan::{UserPlanProcessor, UserPlanner};
use crate::planner::{set_default, Action, Plan, PlanInput};
use crate::schema::attr;

/// POSIX implementation of UserPlanner
///
/// Entries sit in the container of their primary group, so a uid change is a
/// move and so is a gidNumber change.
pub struct PosixUserPlanner;

impl PosixUserPlanner {
    fn required_uid(input: &PlanInput<'_>) -> AppResult<String> {
        input
            .text(attr::UID)
            .ok_or_else(|| AppError::Validation("POSIX user requires a uid".to_string()))
    }

    /// The resolved primary group with its cn and gidNumber, checked against
    /// the gidNumber set on the user.
    fn primary_group<'a>(
        input: &PlanInput<'a>,
        uid: &str,
    ) -> AppResult<(&'a DirectoryEntry, String, String)> {
        let group = input.context.primary_group.as_ref().ok_or_else(|| {
            AppError::Planning(format!(
                "user {} has no resolvable primary group (gidNumber {})",
                uid,
                input.text(attr::GID_NUMBER).unwrap_or_else(|| "unset".to_string())
            ))
        })?;
        let cn = group.get_str(attr::CN).ok_or_else(|| {
            AppError::Planning(format!("primary group {} has no cn", group.dn))
        })?;
        let gid = group.get_str(attr::GID_NUMBER).ok_or_else(|| {
            AppError::Planning(format!("primary group {} has no gidNumber", group.dn))
        })?;
        if let Some(own) = input.text(attr::GID_NUMBER) {
            if own != gid {
                return Err(AppError::Planning(format!(
                    "gidNumber {} of user {} does not match primary group {} ({})",
                    own, uid, cn, gid
                )));
            }
        }
        Ok((group, cn, gid))
    }
}

impl UserPlanner for PosixUserPlanner {
    fn plan_user_create(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let uid = Self::required_uid(input)?;
        let (_, group_cn, gid) = Self::primary_group(input, &uid)?;

        let mut attributes = input.creation_attributes(&[]);
        set_default(&mut attributes, attr::GID_NUMBER, gid.as_str());
        set_default(&mut attributes, attr::CN, uid.as_str());
        set_default(&mut attributes, attr::SN, uid.as_str());
        set_default(
            &mut attributes,
            attr::HOME_DIRECTORY,
            format!("{}/{}", input.settings.home_root.trim_end_matches('/'), uid),
        );
        set_default(
            &mut attributes,
            attr::LOGIN_SHELL,
            input.settings.login_shell.as_str(),
        );
        if input.value(attr::UID_NUMBER).is_none() {
            let next = input.context.next_uid_number.ok_or_else(|| {
                AppError::Planning(format!("no uidNumber available for user {}", uid))
            })?;
            set_default(&mut attributes, attr::UID_NUMBER, next);
        }

        let mut plan = Plan::new();
        plan.push(Action::Add {
            dn: user_dn(input.schema, &group_cn, &uid),
            attributes,
        });
        for action in UserPlanProcessor::membership_updates(input, None, Some(uid.as_str()), None)? {
            plan.push(action);
        }
        Ok(plan)
    }

    fn plan_user_update(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let uid = Self::required_uid(input)?;
        let old_uid = input
            .original(attr::UID)
            .or_else(|| dn.rdn_value().map(str::to_string))
            .unwrap_or_else(|| uid.clone());

        let parent = if input.changed(attr::GID_NUMBER) {
            let (_, group_cn, _) = Self::primary_group(input, &uid)?;
            group_container(input.schema, &group_cn)
        } else {
            dn.parent().unwrap_or_else(|| input.schema.base.clone())
        };
        let target = parent.child(input.schema.rdn_attribute.clone(), uid.as_str());
        let moved = &target != dn;

        let mut plan = Plan::new();
        // A move renames the RDN value, so uid is only replaced in place.
        let skip: &[&str] = if moved { &[attr::UID] } else { &[] };
        if let Some(action) = input.update_action(dn, skip) {
            plan.push(action);
        }
        if moved {
            plan.push(Action::Move {
                from: dn.clone(),
                to: target,
            });
        }
        for action in
            UserPlanProcessor::membership_updates(input, Some(old_uid.as_str()), Some(uid.as_str()), None)?
        {
            plan.push(action);
        }
        Ok(plan)
    }

    fn plan_user_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let uid = input
            .original(attr::UID)
            .or_else(|| dn.rdn_value().map(str::to_string))
            .unwrap_or_default();

        let mut plan = Plan::from(UserPlanProcessor::membership_updates(
            input,
            Some(uid.as_str()),
            None,
            None,
        )?);
        plan.push(Action::delete(dn.clone()));
        Ok(plan)
    }
}
