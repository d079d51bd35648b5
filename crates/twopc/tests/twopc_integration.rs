//! Two-phase commit across several resource managers.

use std::sync::Arc;

use serde_json::json;
use twopc::{
    CoordinatorConfig, InMemoryResourceManager, ParticipantStatus, TransactionCoordinator,
    TransactionStatus, TwoPcError,
};

async fn setup() -> (Arc<TransactionCoordinator>, Vec<InMemoryResourceManager>) {
    let coordinator = Arc::new(TransactionCoordinator::new(
        "main-coordinator",
        CoordinatorConfig::default(),
    ));
    let managers: Vec<_> = ["database", "cache", "file-system"]
        .into_iter()
        .map(InMemoryResourceManager::new)
        .collect();
    for rm in &managers {
        coordinator.register(Arc::new(rm.clone())).await;
    }
    (coordinator, managers)
}

fn all_participants() -> Vec<String> {
    vec!["database".into(), "cache".into(), "file-system".into()]
}

#[tokio::test]
async fn concurrent_transactions_are_independent() {
    let (coordinator, managers) = setup().await;

    let handles: Vec<_> = (0..10)
        .map(|n| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(&all_participants(), &json!({ "n": n }))
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(coordinator.list().await.len(), 10);
    for rm in &managers {
        assert_eq!(rm.committed_count(), 10);
    }
}

#[tokio::test]
async fn failing_participant_leaves_no_partial_commit() {
    let (coordinator, managers) = setup().await;
    managers[2].set_fail_on_prepare(true);

    let tx = coordinator
        .execute(&all_participants(), &json!({"order_id": "o-1"}))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Aborted);
    let failed = tx.participant("file-system").unwrap();
    assert_eq!(failed.status, ParticipantStatus::Failed);
    assert!(failed.error.is_some());
    for rm in &managers {
        assert_eq!(rm.committed_count(), 0);
        assert!(!rm.is_prepared(tx.id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_commit_and_abort_reach_one_outcome() {
    let (coordinator, managers) = setup().await;

    for _ in 0..20 {
        let id = coordinator.begin(&all_participants()).await.unwrap();
        assert!(coordinator.prepare(id, &json!({})).await.unwrap());

        let committing = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.commit(id).await })
        };
        let aborting = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.abort(id).await })
        };
        let committed = committing.await.unwrap().unwrap();
        let aborted = aborting.await.unwrap();

        let tx = coordinator.transaction(id).await.unwrap();
        if committed {
            assert_eq!(tx.status, TransactionStatus::Committed);
            assert_eq!(aborted, Err(TwoPcError::AlreadyCommitted(id)));
            for rm in &managers {
                assert!(rm.is_committed(id));
            }
        } else {
            assert_eq!(tx.status, TransactionStatus::Aborted);
            assert_eq!(aborted, Ok(()));
            for rm in &managers {
                assert!(!rm.is_committed(id));
                assert!(!rm.is_prepared(id));
            }
        }
    }
}

#[tokio::test]
async fn registered_managers_are_listed() {
    let (coordinator, _managers) = setup().await;
    assert_eq!(
        coordinator.resource_managers().await,
        vec!["cache", "database", "file-system"]
    );
}
