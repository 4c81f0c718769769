//! Active Directory planners.
//!
//! AD keeps an object's identity (`objectSid`) across moves, so renames are
//! plain moves. A user's primary group is referenced by RID through
//! `primaryGroupID` and the server only accepts it for groups the user is
//! already a member of.

use crate::dn::Dn;
use crate::error::{AppError, AppResult};
use crate::models::DirectoryEntry;
use crate::planner::user_plan::same_member;
use crate::planner::Action;
use crate::schema::attr;
use crate::transport::Replacement;

pub mod group_plan_impl;
pub mod user_plan_impl;

pub use group_plan_impl::AdGroupPlanner;
pub use user_plan_impl::AdUserPlanner;

/// RID of a security identifier: its last dash separated component.
pub fn rid(sid: &str) -> Option<&str> {
    sid.rsplit_once('-')
        .map(|(_, rid)| rid)
        .filter(|rid| !rid.is_empty() && rid.bytes().all(|b| b.is_ascii_digit()))
}

/// Value a member's `primaryGroupID` must hold to reference `group`.
pub fn primary_group_token(group: &DirectoryEntry) -> AppResult<String> {
    if let Some(token) = group.get_str(attr::PRIMARY_GROUP_TOKEN) {
        return Ok(token);
    }
    group
        .get_str(attr::OBJECT_SID)
        .as_deref()
        .and_then(rid)
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Planning(format!(
                "group {} carries neither primaryGroupToken nor objectSid",
                group.dn
            ))
        })
}

/// Append `member` to the group's member list unless it is listed already.
pub(crate) fn add_member_action(group: &DirectoryEntry, member: &Dn) -> Option<Action> {
    let mut values = group.get_all(attr::MEMBER);
    let member = member.to_string();
    if values.iter().any(|v| same_member(v, &member)) {
        return None;
    }
    values.push(member);
    Some(Action::update(
        group.dn.clone(),
        vec![Replacement::set(
            attr::MEMBER,
            values.into_iter().map(String::into_bytes).collect(),
        )],
    ))
}
