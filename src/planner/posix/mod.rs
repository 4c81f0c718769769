//! RFC 2307 planners.
//!
//! A POSIX user's path encodes its primary group: users live in an
//! `ou=<group cn>` container below the user base, which the group planner
//! creates, renames and removes together with the group.

use crate::dn::Dn;
use crate::schema::{attr, EntitySchema};

pub mod group_plan_impl;
pub mod user_plan_impl;

pub use group_plan_impl::PosixGroupPlanner;
pub use user_plan_impl::PosixUserPlanner;

/// Container holding the users whose primary group is `group_cn`.
pub fn group_container(user_schema: &EntitySchema, group_cn: &str) -> Dn {
    user_schema.base.child(attr::OU, group_cn)
}

/// Path of a POSIX user.
pub fn user_dn(user_schema: &EntitySchema, group_cn: &str, uid: &str) -> Dn {
    group_container(user_schema, group_cn).child(user_schema.rdn_attribute.clone(), uid)
}
