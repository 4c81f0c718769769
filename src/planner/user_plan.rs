use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::models::DirectoryEntry;
use crate::planner::{Action, Operation, Plan, PlanInput};
use crate::transport::Replacement;

/// Schema-specific planning of user changes
pub trait UserPlanner: Send + Sync {
    fn plan_user_create(&self, input: &PlanInput<'_>) -> AppResult<Plan>;

    /// Called with a non-empty change set or staged group list
    fn plan_user_update(&self, input: &PlanInput<'_>) -> AppResult<Plan>;

    fn plan_user_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan>;
}

/// Shared business logic for user plans
pub struct UserPlanProcessor;

impl UserPlanProcessor {
    /// At least one unique attribute must hold a value.
    pub fn validate_identity(input: &PlanInput<'_>) -> AppResult<()> {
        let defined = input
            .schema
            .unique_attributes
            .iter()
            .any(|name| input.value(name).is_some());
        if defined {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "{} needs one of {} to be set",
                input.schema.entity_type,
                input.schema.unique_attributes.join(", ")
            )))
        }
    }

    /// Membership list updates that make the user's secondary groups match
    /// the final set.
    ///
    /// `old_member` is the value groups list today (absent on create),
    /// `new_member` the value they should list afterwards (absent on delete).
    /// Groups staged on the entity replace the current set; without staging
    /// the current set is kept, rewriting the member value when it changed.
    /// `skip` excludes a group handled elsewhere (an AD primary group).
    pub fn membership_updates(
        input: &PlanInput<'_>,
        old_member: Option<&str>,
        new_member: Option<&str>,
        skip: Option<&Dn>,
    ) -> AppResult<Vec<Action>> {
        let Some(attribute) = input.peer.membership_attribute.as_deref() else {
            return Ok(Vec::new());
        };
        let current = &input.context.secondary_groups;
        let wanted: &[DirectoryEntry] = match &input.context.staged_groups {
            Some(staged) => staged,
            None => current,
        };

        let mut groups: Vec<&DirectoryEntry> = Vec::new();
        for group in current.iter().chain(wanted.iter()) {
            let seen = groups.iter().any(|g| g.dn == group.dn);
            let skipped = skip.is_some_and(|s| s == &group.dn);
            if !seen && !skipped {
                groups.push(group);
            }
        }

        let mut actions = Vec::new();
        for group in groups {
            let keep = new_member.is_some() && wanted.iter().any(|w| w.dn == group.dn);
            let values = group.get_all(attribute);
            let rewritten = rewrite_members(&values, old_member, new_member, keep);
            if rewritten != values {
                let raw = rewritten.into_iter().map(String::into_bytes).collect();
                actions.push(Action::update(
                    group.dn.clone(),
                    vec![Replacement::set(attribute, raw)],
                ));
            }
        }
        Ok(actions)
    }
}

/// Member values name users by login (POSIX) or by DN (AD).
pub(crate) fn same_member(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    match (Dn::parse(a), Dn::parse(b)) {
        (Ok(x), Ok(y)) => !x.is_root() && x == y,
        _ => false,
    }
}

/// Replace `old` with `new` in a member list, keeping positions; drop both
/// when `keep` is false, append `new` when `keep` is true and it is missing.
pub(crate) fn rewrite_members(
    values: &[String],
    old: Option<&str>,
    new: Option<&str>,
    keep: bool,
) -> Vec<String> {
    let listed = |out: &Vec<String>, v: &str| out.iter().any(|x| same_member(x, v));
    let mut out: Vec<String> = Vec::with_capacity(values.len() + 1);
    for value in values {
        let is_new = new.is_some_and(|n| same_member(value, n));
        let is_old = old.is_some_and(|o| same_member(value, o));
        if is_new {
            if keep && !listed(&out, value) {
                out.push(value.clone());
            }
        } else if is_old {
            if let (true, Some(n)) = (keep, new) {
                if !listed(&out, n) {
                    out.push(n.to_string());
                }
            }
        } else {
            out.push(value.clone());
        }
    }
    if let (true, Some(n)) = (keep, new) {
        if !listed(&out, n) {
            out.push(n.to_string());
        }
    }
    out
}

/// Unified user planning using the adapter pattern
pub struct UnifiedUserPlan<T: UserPlanner> {
    planner: T,
}

impl<T: UserPlanner> UnifiedUserPlan<T> {
    pub fn new(planner: T) -> Self {
        Self { planner }
    }

    pub fn plan(&self, operation: Operation, input: &PlanInput<'_>) -> AppResult<Plan> {
        UserPlanProcessor::validate_identity(input)?;

        match operation {
            Operation::Create => {
                if input.bound.is_some() {
                    return Err(AppError::Validation(format!(
                        "{} already exists in the directory",
                        input.schema.entity_type
                    )));
                }
                self.planner.plan_user_create(input)
            }
            Operation::Update => {
                input.bound_dn()?;
                if input.changes.is_empty() && input.context.staged_groups.is_none() {
                    return Ok(Plan::new());
                }
                self.planner.plan_user_update(input)
            }
            Operation::Delete => {
                input.bound_dn()?;
                self.planner.plan_user_delete(input)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_rewrite_adds_and_removes() {
        let values = list(&["bob", "carol"]);
        assert_eq!(
            rewrite_members(&values, None, Some("alice"), true),
            list(&["bob", "carol", "alice"])
        );
        assert_eq!(
            rewrite_members(&values, Some("bob"), None, false),
            list(&["carol"])
        );
    }

    #[test]
    fn test_rewrite_renames_in_place() {
        let values = list(&["bob", "alice", "carol"]);
        assert_eq!(
            rewrite_members(&values, Some("alice"), Some("alicia"), true),
            list(&["bob", "alicia", "carol"])
        );
    }

    #[test]
    fn test_rewrite_unchanged_member_is_stable() {
        let values = list(&["Alice", "bob"]);
        assert_eq!(
            rewrite_members(&values, Some("alice"), Some("alice"), true),
            values
        );
    }

    #[test]
    fn test_same_member_compares_dns() {
        assert!(same_member(
            "CN=Alice,CN=Users,DC=corp",
            "cn=alice,cn=users,dc=corp"
        ));
        assert!(same_member("alice", "ALICE"));
        assert!(!same_member("alice", "bob"));
    }
}
