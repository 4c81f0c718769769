use super::{add_member_action, primary_group_token};
use crate::error::{AppError, AppResult};
use crate::models::DirectoryEntry;
use crate::planner::user_plan::{UserPlanProcessor, UserPlanner};
use crate::planner::{set_default, Action, Plan, PlanInput, Target};
use crate::schema::account_control::{DISABLED_ACCOUNT, NORMAL_ACCOUNT};
use crate::schema::attr;
use crate::transport::Replacement;

/// Active Directory implementation of UserPlanner
///
/// The server refuses `primaryGroupID`, `unicodePwd` and an enabled account
/// in the add request, so creation is an add of a disabled account followed
/// by a modify.
pub struct AdUserPlanner;

impl AdUserPlanner {
    /// The primary group named by the context, validated against the
    /// `primaryGroupID` set on the user.
    fn primary_group<'a>(input: &PlanInput<'a>) -> AppResult<Option<(&'a DirectoryEntry, String)>> {
        let wanted = input.text(attr::PRIMARY_GROUP_ID);
        let Some(group) = input.context.primary_group.as_ref() else {
            return match wanted {
                Some(id) => Err(AppError::Planning(format!(
                    "primaryGroupID {} does not name a known group",
                    id
                ))),
                None => Ok(None),
            };
        };
        let token = primary_group_token(group)?;
        if let Some(id) = wanted {
            if id != token {
                return Err(AppError::Planning(format!(
                    "primaryGroupID {} does not match group {} (token {})",
                    id, group.dn, token
                )));
            }
        }
        Ok(Some((group, token)))
    }
}

impl UserPlanner for AdUserPlanner {
    fn plan_user_create(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let sam = input.text(attr::SAM_ACCOUNT_NAME).ok_or_else(|| {
            AppError::Validation("AD user requires sAMAccountName".to_string())
        })?;
        let cn = input.text(attr::CN).unwrap_or_else(|| sam.clone());
        let dn = input.schema.base.child(input.schema.rdn_attribute.clone(), cn.as_str());

        let mut attributes = input.creation_attributes(&[
            attr::PRIMARY_GROUP_ID,
            attr::UNICODE_PWD,
            attr::USER_ACCOUNT_CONTROL,
        ]);
        set_default(&mut attributes, attr::CN, cn.as_str());
        if let Some(suffix) = &input.settings.upn_suffix {
            set_default(
                &mut attributes,
                attr::USER_PRINCIPAL_NAME,
                format!("{}@{}", sam, suffix),
            );
        }
        attributes.insert(
            attr::USER_ACCOUNT_CONTROL.to_string(),
            vec![DISABLED_ACCOUNT.to_string().into_bytes()],
        );

        let mut plan = Plan::new();
        plan.push(Action::Add {
            dn: dn.clone(),
            attributes,
        });

        let primary = Self::primary_group(input)?;
        let mut follow_up = Vec::new();
        let mut write_only = Vec::new();
        if let Some((group, token)) = &primary {
            if let Some(action) = add_member_action(group, &dn) {
                plan.push(action);
            }
            follow_up.push(Replacement::set(
                attr::PRIMARY_GROUP_ID,
                vec![token.as_bytes().to_vec()],
            ));
        }
        if let Some(password) = input.value(attr::UNICODE_PWD) {
            follow_up.push(Replacement::set(attr::UNICODE_PWD, password.to_raw()));
            write_only.push(attr::UNICODE_PWD.to_string());
        }
        let control = input
            .text(attr::USER_ACCOUNT_CONTROL)
            .unwrap_or_else(|| NORMAL_ACCOUNT.to_string());
        follow_up.push(Replacement::set(
            attr::USER_ACCOUNT_CONTROL,
            vec![control.into_bytes()],
        ));
        plan.push(Action::Update {
            target: Target::Path(dn.clone()),
            replacements: follow_up,
            write_only,
        });

        let member = dn.to_string();
        let skip = primary.map(|(group, _)| &group.dn);
        for action in UserPlanProcessor::membership_updates(input, None, Some(member.as_str()), skip)? {
            plan.push(action);
        }
        Ok(plan)
    }

    fn plan_user_update(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let target = if input.changed(attr::CN) {
            let cn = input.text(attr::CN).ok_or_else(|| {
                AppError::Validation(format!("cn of {} cannot be removed", dn))
            })?;
            dn.with_rdn_value(cn)
        } else {
            dn.clone()
        };

        let mut plan = Plan::new();
        if let Some(action) = input.update_action(dn, &[attr::CN, attr::PRIMARY_GROUP_ID]) {
            plan.push(action);
        }
        if &target != dn {
            plan.push(Action::Move {
                from: dn.clone(),
                to: target.clone(),
            });
        }

        let mut skip = None;
        if input.changed(attr::PRIMARY_GROUP_ID) {
            let (group, token) = Self::primary_group(input)?.ok_or_else(|| {
                AppError::Validation(format!("primaryGroupID of {} cannot be removed", dn))
            })?;
            if let Some(action) = add_member_action(group, &target) {
                plan.push(action);
            }
            plan.push(Action::update(
                target.clone(),
                vec![Replacement::set(
                    attr::PRIMARY_GROUP_ID,
                    vec![token.into_bytes()],
                )],
            ));
            skip = Some(&group.dn);
        }

        let old_member = dn.to_string();
        let new_member = target.to_string();
        for action in UserPlanProcessor::membership_updates(
            input,
            Some(old_member.as_str()),
            Some(new_member.as_str()),
            skip,
        )? {
            plan.push(action);
        }
        Ok(plan)
    }

    fn plan_user_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan> {
        let dn = input.bound_dn()?;
        let member = dn.to_string();
        let mut plan = Plan::from(UserPlanProcessor::membership_updates(
            input,
            Some(member.as_str()),
            None,
            None,
        )?);
        plan.push(Action::delete(dn.clone()));
        Ok(plan)
    }
}
