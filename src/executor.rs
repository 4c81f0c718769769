//! All-or-nothing execution of a [`Plan`].
//!
//! Before each action the executor records how to undo it. When an action
//! fails, the recorded inverses run in reverse order and the caller receives a
//! [`BatchFailure`] carrying the original error plus any rollback errors.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::dn::Dn;
use crate::error::{AppResult, BatchFailure, TransportError, TransportResult};
use crate::filter::Filter;
use crate::logging::AUDIT_TARGET;
use crate::models::{Attributes, DirectoryEntry};
use crate::planner::{Action, Plan, Target};
use crate::transport::{DirectoryTransport, Replacement, Scope};

/// Attributes a server assigns itself and refuses in an add request.
const SERVER_OWNED: &[&str] = &[
    "objectSid",
    "objectGUID",
    "primaryGroupToken",
    "memberOf",
    "distinguishedName",
    "whenCreated",
    "whenChanged",
    "entryUUID",
    "createTimestamp",
    "modifyTimestamp",
];

/// Inverse of one applied write.
#[derive(Debug, Clone)]
enum Undo {
    /// Remove an added entry.
    Remove(Dn),
    /// Put back the previous values of replaced attributes.
    Restore {
        dn: Dn,
        replacements: Vec<Replacement>,
    },
    /// Return a moved entry from `from` to `to`.
    MoveBack { from: Dn, to: Dn },
    /// Add a deleted entry again.
    Recreate(DirectoryEntry),
}

impl Undo {
    fn describe(&self) -> String {
        match self {
            Undo::Remove(dn) => format!("delete {}", dn),
            Undo::Restore { dn, replacements } => {
                let names: Vec<String> = replacements.iter().map(|r| r.to_string()).collect();
                format!("restore {} ({})", dn, names.join(", "))
            }
            Undo::MoveBack { from, to } => format!("move {} -> {}", from, to),
            Undo::Recreate(entry) => format!("add {}", entry.dn),
        }
    }
}

pub struct BatchExecutor<'a> {
    transport: &'a dyn DirectoryTransport,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(transport: &'a dyn DirectoryTransport) -> Self {
        Self { transport }
    }

    /// Apply every action in order, or none of them.
    pub async fn execute(&self, plan: &Plan) -> AppResult<()> {
        if plan.is_empty() {
            debug!("Empty plan, nothing to execute");
            return Ok(());
        }

        let started = Instant::now();
        let mut undo: Vec<Undo> = Vec::new();
        for (step, action) in plan.actions().iter().enumerate() {
            match self.apply(action, &mut undo).await {
                Ok(()) => {
                    info!(target: AUDIT_TARGET, step, action = %action, "applied");
                }
                Err(cause) => {
                    warn!(
                        target: AUDIT_TARGET,
                        step,
                        action = %action,
                        error = %cause,
                        "failed, rolling back {} write(s)",
                        undo.len()
                    );
                    let (rolled_back, rollback_errors) = self.rollback(undo).await;
                    let failure = BatchFailure {
                        failed_step: step,
                        failed_action: action.to_string(),
                        cause,
                        rolled_back,
                        rollback_errors,
                    };
                    if !failure.rollback_complete() {
                        error!(
                            target: AUDIT_TARGET,
                            errors = failure.rollback_errors.len(),
                            "rollback incomplete, directory left partially modified"
                        );
                    }
                    return Err(failure.into());
                }
            }
        }

        debug!(
            actions = plan.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Plan executed"
        );
        Ok(())
    }

    async fn apply(&self, action: &Action, undo: &mut Vec<Undo>) -> TransportResult<()> {
        match action {
            Action::Add { dn, attributes } => {
                self.transport.add(dn, attributes).await?;
                undo.push(Undo::Remove(dn.clone()));
            }
            Action::Delete(target) => {
                for dn in self.resolve(target).await? {
                    let previous = self.read(&dn, &[]).await?;
                    self.transport.delete(&dn).await?;
                    undo.push(Undo::Recreate(previous));
                }
            }
            Action::Update {
                target,
                replacements,
                write_only,
            } => {
                let readable: Vec<String> = replacements
                    .iter()
                    .map(|r| r.attribute.clone())
                    .filter(|name| !write_only.iter().any(|w| w.eq_ignore_ascii_case(name)))
                    .collect();
                for dn in self.resolve(target).await? {
                    let previous = if readable.is_empty() {
                        DirectoryEntry::new(dn.clone())
                    } else {
                        self.read(&dn, &readable).await?
                    };
                    self.transport.modify(&dn, replacements).await?;
                    let restore = readable
                        .iter()
                        .map(|name| {
                            Replacement::set(name.clone(), previous.raw(name).cloned().unwrap_or_default())
                        })
                        .collect::<Vec<_>>();
                    if !restore.is_empty() {
                        undo.push(Undo::Restore {
                            dn,
                            replacements: restore,
                        });
                    }
                }
            }
            Action::Move { from, to } => {
                self.transport.move_entry(from, to).await?;
                undo.push(Undo::MoveBack {
                    from: to.clone(),
                    to: from.clone(),
                });
            }
        }
        Ok(())
    }

    /// Undo applied writes, newest first. Returns how many were undone and
    /// the errors of those that could not be.
    async fn rollback(&self, undo: Vec<Undo>) -> (usize, Vec<TransportError>) {
        let mut undone = 0;
        let mut errors = Vec::new();
        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::Remove(dn) => self.transport.delete(dn).await,
                Undo::Restore { dn, replacements } => self.transport.modify(dn, replacements).await,
                Undo::MoveBack { from, to } => self.transport.move_entry(from, to).await,
                Undo::Recreate(entry) => {
                    let attributes: Attributes = entry
                        .attrs
                        .iter()
                        .filter(|(name, _)| !SERVER_OWNED.iter().any(|s| s.eq_ignore_ascii_case(name)))
                        .map(|(name, values)| (name.clone(), values.clone()))
                        .collect();
                    self.transport.add(&entry.dn, &attributes).await
                }
            };
            match result {
                Ok(()) => {
                    undone += 1;
                    info!(target: AUDIT_TARGET, undo = %step.describe(), "rolled back");
                }
                Err(e) => {
                    error!(target: AUDIT_TARGET, undo = %step.describe(), error = %e, "rollback step failed");
                    errors.push(e);
                }
            }
        }
        (undone, errors)
    }

    async fn resolve(&self, target: &Target) -> TransportResult<Vec<Dn>> {
        match target {
            Target::Path(dn) => Ok(vec![dn.clone()]),
            Target::Search { base, filter } => {
                let found = self
                    .transport
                    .search(base, Scope::Subtree, filter, &["1.1".to_string()])
                    .await?;
                debug!(base = %base, filter = %filter, matched = found.len(), "Resolved search target");
                Ok(found.into_iter().map(|entry| entry.dn).collect())
            }
        }
    }

    async fn read(&self, dn: &Dn, attributes: &[String]) -> TransportResult<DirectoryEntry> {
        self.transport
            .search(dn, Scope::Base, &Filter::any(), attributes)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::no_such_object(dn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{result_code, AppError};
    use crate::models::AttrValue;
    use crate::transport::{Fault, MemoryDirectory, OpKind};

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn group_attrs(cn: &str, gid: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("objectClass".to_string(), AttrValue::from(vec!["top", "posixGroup"]).to_raw());
        attributes.insert("cn".to_string(), AttrValue::from(cn).to_raw());
        attributes.insert("gidNumber".to_string(), AttrValue::from(gid).to_raw());
        attributes
    }

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_container("ou=Group,dc=example,dc=com")
            .unwrap()
            .with_container("ou=People,dc=example,dc=com")
            .unwrap()
    }

    #[tokio::test]
    async fn test_executes_in_order() {
        let directory = directory();
        let plan = Plan::from(vec![
            Action::Add {
                dn: dn("cn=eng,ou=Group,dc=example,dc=com"),
                attributes: group_attrs("eng", "1000"),
            },
            Action::update(
                dn("cn=eng,ou=Group,dc=example,dc=com"),
                vec![Replacement::set("description", vec![b"Engineering".to_vec()])],
            ),
        ]);

        BatchExecutor::new(&directory).execute(&plan).await.unwrap();
        let entry = directory.entry(&dn("cn=eng,ou=Group,dc=example,dc=com")).await.unwrap();
        assert_eq!(entry.get_str("description").as_deref(), Some("Engineering"));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_every_applied_action() {
        let directory = directory().with_entry(
            DirectoryEntry::new(dn("cn=ops,ou=Group,dc=example,dc=com"))
                .with("objectClass", vec!["top", "posixGroup"])
                .with("cn", "ops")
                .with("gidNumber", "1001")
                .with("memberUid", vec!["bob"]),
        );
        directory
            .inject(Fault::on(OpKind::Add).at("ou=eng,ou=People,dc=example,dc=com").unwrap())
            .await;
        let before = directory.snapshot().await;

        let plan = Plan::from(vec![
            Action::update(
                dn("cn=ops,ou=Group,dc=example,dc=com"),
                vec![Replacement::set("memberUid", vec![b"bob".to_vec(), b"alice".to_vec()])],
            ),
            Action::Move {
                from: dn("cn=ops,ou=Group,dc=example,dc=com"),
                to: dn("cn=operations,ou=Group,dc=example,dc=com"),
            },
            Action::Add {
                dn: dn("cn=eng,ou=Group,dc=example,dc=com"),
                attributes: group_attrs("eng", "1000"),
            },
            Action::Add {
                dn: dn("ou=eng,ou=People,dc=example,dc=com"),
                attributes: {
                    let mut a = Attributes::new();
                    a.insert("objectClass".to_string(), vec![b"organizationalUnit".to_vec()]);
                    a.insert("ou".to_string(), vec![b"eng".to_vec()]);
                    a
                },
            },
        ]);

        let err = BatchExecutor::new(&directory).execute(&plan).await.unwrap_err();
        let AppError::BatchFailed(failure) = err else {
            panic!("expected batch failure");
        };
        assert_eq!(failure.failed_step, 3);
        assert_eq!(failure.rolled_back, 3);
        assert!(failure.rollback_complete());
        assert_eq!(failure.cause.code, result_code::UNAVAILABLE);

        let after = directory.snapshot().await;
        let names = |entries: &[DirectoryEntry]| entries.iter().map(|e| e.dn.to_string()).collect::<Vec<_>>();
        assert_eq!(names(&after), names(&before));
        let ops = directory.entry(&dn("cn=ops,ou=Group,dc=example,dc=com")).await.unwrap();
        assert_eq!(ops.get_all("memberUid"), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_both_errors() {
        let directory = directory();
        directory.disconnect_after(1).await;

        let plan = Plan::from(vec![
            Action::Add {
                dn: dn("cn=eng,ou=Group,dc=example,dc=com"),
                attributes: group_attrs("eng", "1000"),
            },
            Action::Add {
                dn: dn("cn=ops,ou=Group,dc=example,dc=com"),
                attributes: group_attrs("ops", "1001"),
            },
        ]);

        let err = BatchExecutor::new(&directory).execute(&plan).await.unwrap_err();
        let AppError::BatchFailed(failure) = err else {
            panic!("expected batch failure");
        };
        assert_eq!(failure.failed_step, 1);
        assert_eq!(failure.rolled_back, 0);
        assert_eq!(failure.rollback_errors.len(), 1);
        assert_eq!(failure.cause.code, result_code::SERVER_DOWN);

        directory.reconnect().await;
        assert!(directory.contains(&dn("cn=eng,ou=Group,dc=example,dc=com")).await);
    }

    #[tokio::test]
    async fn test_search_target_updates_every_match() {
        let user = |uid: &str, gid: &str| {
            DirectoryEntry::new(dn(&format!("uid={},ou=People,dc=example,dc=com", uid)))
                .with("objectClass", vec!["top", "posixAccount"])
                .with("uid", uid)
                .with("gidNumber", gid)
        };
        let directory = directory()
            .with_entry(user("alice", "1000"))
            .with_entry(user("bob", "1000"))
            .with_entry(user("carol", "1001"));

        let plan = Plan::from(vec![Action::update_each(
            dn("ou=People,dc=example,dc=com"),
            Filter::eq("gidNumber", "1000"),
            vec![Replacement::set("gidNumber", vec![b"2000".to_vec()])],
        )]);
        BatchExecutor::new(&directory).execute(&plan).await.unwrap();

        let gid = |entry: Option<DirectoryEntry>| entry.and_then(|e| e.get_str("gidNumber"));
        assert_eq!(gid(directory.entry(&dn("uid=alice,ou=People,dc=example,dc=com")).await).as_deref(), Some("2000"));
        assert_eq!(gid(directory.entry(&dn("uid=bob,ou=People,dc=example,dc=com")).await).as_deref(), Some("2000"));
        assert_eq!(gid(directory.entry(&dn("uid=carol,ou=People,dc=example,dc=com")).await).as_deref(), Some("1001"));
    }

    #[tokio::test]
    async fn test_deleted_entry_is_recreated_on_rollback() {
        let directory = directory().with_entry(
            DirectoryEntry::new(dn("cn=eng,ou=Group,dc=example,dc=com"))
                .with("objectClass", vec!["top", "posixGroup"])
                .with("cn", "eng")
                .with("gidNumber", "1000"),
        );
        directory
            .inject(Fault::on(OpKind::Modify).with_code(result_code::OTHER))
            .await;

        let plan = Plan::from(vec![
            Action::delete(dn("cn=eng,ou=Group,dc=example,dc=com")),
            Action::update(
                dn("ou=Group,dc=example,dc=com"),
                vec![Replacement::set("description", vec![b"x".to_vec()])],
            ),
        ]);
        assert!(BatchExecutor::new(&directory).execute(&plan).await.is_err());

        let restored = directory.entry(&dn("cn=eng,ou=Group,dc=example,dc=com")).await.unwrap();
        assert_eq!(restored.get_str("gidNumber").as_deref(), Some("1000"));
    }
}
