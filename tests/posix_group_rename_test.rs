use ldap_orm::config::DEFAULT_RENAME_SENTINEL_GID;
use ldap_orm::transport::{Fault, OpKind};
use ldap_orm::{AppError, Dn};

mod common;

fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

#[tokio::test]
async fn test_rename_moves_primary_members_and_retires_old_group() {
    let (memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;
    let mut alice = common::create_posix_user(&directory, "alice", &eng).await;
    memory.clear_journal().await;

    eng.set_cn("engineering").unwrap();
    eng.update().await.unwrap();

    let journal: Vec<(OpKind, String)> = memory
        .journal()
        .await
        .into_iter()
        .map(|entry| (entry.op, entry.dn.to_string()))
        .collect();
    assert_eq!(
        journal,
        vec![
            (OpKind::Modify, "cn=eng,ou=Group,dc=example,dc=com".to_string()),
            (OpKind::Add, "cn=engineering,ou=Group,dc=example,dc=com".to_string()),
            (OpKind::Add, "ou=engineering,ou=People,dc=example,dc=com".to_string()),
            (OpKind::Move, "uid=alice,ou=eng,ou=People,dc=example,dc=com".to_string()),
            (OpKind::Delete, "ou=eng,ou=People,dc=example,dc=com".to_string()),
            (OpKind::Delete, "cn=eng,ou=Group,dc=example,dc=com".to_string()),
        ]
    );

    assert_eq!(eng.dn(), Some(&dn("cn=engineering,ou=Group,dc=example,dc=com")));
    assert_eq!(eng.gid_number().unwrap().as_deref(), Some("1000"));
    assert!(directory.find_group("eng").await.unwrap().is_none());

    assert!(alice.read().await.unwrap());
    assert_eq!(
        alice.dn(),
        Some(&dn("uid=alice,ou=engineering,ou=People,dc=example,dc=com"))
    );
    let primary = alice.primary_group().await.unwrap().unwrap();
    assert_eq!(primary.cn().unwrap().as_deref(), Some("engineering"));
    assert!(directory.interrupted_renames().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rename_keeps_secondary_members() {
    let (_memory, directory) = common::setup_posix();
    let eng = common::create_posix_group(&directory, "eng", 1000).await;
    let mut ops = common::create_posix_group(&directory, "ops", 1001).await;
    let alice = common::create_posix_user(&directory, "alice", &eng).await;
    ops.add_member(&alice).unwrap();
    ops.update().await.unwrap();

    ops.set_cn("operations").unwrap();
    ops.set_description("Operations team").unwrap();
    ops.update().await.unwrap();

    assert_eq!(common::names(&alice.groups().await.unwrap()), vec!["operations"]);
    assert_eq!(ops.description().unwrap().as_deref(), Some("Operations team"));
}

#[tokio::test]
async fn test_rename_with_new_gid_repoints_users() {
    let (_memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;
    let mut alice = common::create_posix_user(&directory, "alice", &eng).await;

    eng.set_cn("engineering").unwrap();
    eng.set_gid_number(2000u32).unwrap();
    eng.update().await.unwrap();

    assert!(alice.read().await.unwrap());
    assert_eq!(alice.gid_number().unwrap().as_deref(), Some("2000"));
    assert_eq!(
        alice.dn(),
        Some(&dn("uid=alice,ou=engineering,ou=People,dc=example,dc=com"))
    );
}

#[tokio::test]
async fn test_recase_renames_in_place() {
    let (memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;
    let mut alice = common::create_posix_user(&directory, "alice", &eng).await;
    memory.clear_journal().await;

    eng.set_cn("Eng").unwrap();
    eng.update().await.unwrap();

    let ops: Vec<OpKind> = memory.journal().await.into_iter().map(|j| j.op).collect();
    assert_eq!(ops, vec![OpKind::Move]);
    assert_eq!(
        eng.dn().map(|d| d.to_string()).as_deref(),
        Some("cn=Eng,ou=Group,dc=example,dc=com")
    );
    assert_eq!(eng.cn().unwrap().as_deref(), Some("Eng"));
    assert_eq!(eng.gid_number().unwrap().as_deref(), Some("1000"));

    assert!(alice.read().await.unwrap());
    let primary = alice.primary_group().await.unwrap().unwrap();
    assert_eq!(primary.cn().unwrap().as_deref(), Some("Eng"));
    assert!(directory.interrupted_renames().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sentinel_gid_cannot_be_claimed() {
    let (_memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;

    let mut parked = directory.new_group().unwrap();
    parked.set_cn("parked").unwrap();
    parked.set_gid_number(DEFAULT_RENAME_SENTINEL_GID).unwrap();
    assert!(matches!(parked.create().await, Err(AppError::Validation(_))));

    let mut ops = common::create_posix_group(&directory, "ops", 1001).await;
    ops.set_gid_number(DEFAULT_RENAME_SENTINEL_GID).unwrap();
    assert!(matches!(ops.update().await, Err(AppError::Validation(_))));
    assert!(directory.interrupted_renames().await.unwrap().is_empty());

    // Other renames are unaffected.
    eng.set_cn("engineering").unwrap();
    eng.update().await.unwrap();
    assert_eq!(eng.cn().unwrap().as_deref(), Some("engineering"));
}

#[tokio::test]
async fn test_failed_rename_rolls_back() {
    let (memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;
    common::create_posix_user(&directory, "alice", &eng).await;
    let before: Vec<Dn> = memory.snapshot().await.into_iter().map(|e| e.dn).collect();

    memory
        .inject(
            Fault::on(OpKind::Add)
                .at("ou=engineering,ou=People,dc=example,dc=com")
                .unwrap(),
        )
        .await;
    eng.set_cn("engineering").unwrap();

    match eng.update().await {
        Err(AppError::BatchFailed(failure)) => {
            assert_eq!(failure.failed_step, 2);
            assert_eq!(failure.rolled_back, 2);
            assert!(failure.rollback_complete());
        }
        other => panic!("unexpected: {:?}", other),
    }

    let after: Vec<Dn> = memory.snapshot().await.into_iter().map(|e| e.dn).collect();
    assert_eq!(after, before);
    let stored = memory
        .entry(&dn("cn=eng,ou=Group,dc=example,dc=com"))
        .await
        .unwrap();
    assert_eq!(stored.get_str("gidNumber").as_deref(), Some("1000"));

    // The entity still holds the rename and can retry.
    assert!(eng.is_dirty());
    memory.clear_faults().await;
    eng.update().await.unwrap();
    assert_eq!(eng.dn(), Some(&dn("cn=engineering,ou=Group,dc=example,dc=com")));
}

#[tokio::test]
async fn test_lost_connection_leaves_detectable_sentinel() {
    let (memory, directory) = common::setup_posix();
    let mut eng = common::create_posix_group(&directory, "eng", 1000).await;
    common::create_posix_user(&directory, "alice", &eng).await;

    memory.disconnect_after(2).await;
    eng.set_cn("engineering").unwrap();
    match eng.update().await {
        Err(AppError::BatchFailed(failure)) => {
            assert_eq!(failure.failed_step, 2);
            assert!(!failure.rollback_complete());
            assert_eq!(failure.rollback_errors.len(), 2);
        }
        other => panic!("unexpected: {:?}", other),
    }
    memory.reconnect().await;

    let parked = directory.interrupted_renames().await.unwrap();
    assert_eq!(common::names(&parked), vec!["eng"]);
    assert_eq!(
        parked[0].gid_number().unwrap(),
        Some(DEFAULT_RENAME_SENTINEL_GID.to_string())
    );

    // A second rename is refused while the sentinel is held.
    let mut ops = common::create_posix_group(&directory, "ops", 1001).await;
    ops.set_cn("operations").unwrap();
    match ops.update().await {
        Err(AppError::Planning(msg)) => assert!(msg.contains("interrupted rename")),
        other => panic!("unexpected: {:?}", other),
    }
}
